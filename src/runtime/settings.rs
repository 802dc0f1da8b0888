//! Opaque nested settings (category -> key -> value) handed over by the
//! embedding application.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    categories: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Settings {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("settings must be an object of objects")
    }

    pub fn set(&mut self, category: &str, key: &str, value: Value) -> &mut Self {
        self.categories
            .entry(category.to_owned())
            .or_default()
            .insert(key.to_owned(), value);
        self
    }

    pub fn get(&self, category: &str, key: &str) -> Option<&Value> {
        self.categories
            .get(category)
            .and_then(|entries| entries.get(key))
            .filter(|value| !value.is_null())
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.contains_key(category)
    }

    pub fn get_str(&self, category: &str, key: &str) -> Result<Option<&str>> {
        match self.get(category, key) {
            None => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.as_str())),
            Some(other) => bail!("{category}.{key} must be a string, found {other}"),
        }
    }

    pub fn get_u64(&self, category: &str, key: &str) -> Result<Option<u64>> {
        match self.get(category, key) {
            None => Ok(None),
            Some(Value::Number(number)) => number
                .as_u64()
                .map(Some)
                .with_context(|| format!("{category}.{key} must be a non-negative integer")),
            Some(Value::String(text)) => text
                .trim()
                .parse()
                .map(Some)
                .with_context(|| format!("{category}.{key} must be a non-negative integer")),
            Some(other) => bail!("{category}.{key} must be an integer, found {other}"),
        }
    }

    pub fn get_i64(&self, category: &str, key: &str) -> Result<Option<i64>> {
        match self.get(category, key) {
            None => Ok(None),
            Some(Value::Number(number)) => number
                .as_i64()
                .map(Some)
                .with_context(|| format!("{category}.{key} must be an integer")),
            Some(Value::String(text)) => text
                .trim()
                .parse()
                .map(Some)
                .with_context(|| format!("{category}.{key} must be an integer")),
            Some(other) => bail!("{category}.{key} must be an integer, found {other}"),
        }
    }

    pub fn get_bool(&self, category: &str, key: &str) -> Result<Option<bool>> {
        match self.get(category, key) {
            None => Ok(None),
            Some(Value::Bool(flag)) => Ok(Some(*flag)),
            Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(Some(true)),
                "false" | "no" | "0" | "off" => Ok(Some(false)),
                _ => bail!("{category}.{key} must be a boolean, found `{text}`"),
            },
            Some(other) => bail!("{category}.{key} must be a boolean, found {other}"),
        }
    }

    /// A list of strings, given either as an array or a comma-separated string.
    pub fn get_list(&self, category: &str, key: &str) -> Result<Option<Vec<String>>> {
        match self.get(category, key) {
            None => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(text) => Ok(text.trim().to_owned()),
                    other => bail!("{category}.{key} entries must be strings, found {other}"),
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(Value::String(text)) => Ok(Some(
                text.split(',')
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .map(str::to_owned)
                    .collect(),
            )),
            Some(other) => bail!("{category}.{key} must be a list, found {other}"),
        }
    }
}
