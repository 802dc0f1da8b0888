//! Read-side view over a cached event document.
//!
//! The document is kept as a `serde_json::Value` tree so patches can be applied
//! structurally; the accessors below project the parts the processor and the
//! workers need (status, sub-events, actions) without copying the tree.

use crate::model::{EventId, EventStatus, TeamRole};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub(crate) const STATUS_CODE_POINTER: &str = "/gameData/status/statusCode";
pub(crate) const SUB_EVENTS_POINTER: &str = "/liveData/plays/allPlays";

/// Provider revision marker. Tokens are timestamps (`YYYYMMDD_HHMMSS`), so
/// lexical order matches revision order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Half of an inning; decides which side is batting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    Top,
    Bottom,
}

impl Half {
    /// Whether the team in `role` is batting during this half.
    pub fn batting(&self, role: TeamRole) -> bool {
        matches!(
            (self, role),
            (Half::Top, TeamRole::Away) | (Half::Bottom, TeamRole::Home)
        )
    }
}

/// Something that happened: an action inside a sub-event, or a sub-event's
/// final outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Occurrence {
    pub category: Option<String>,
    pub scoring: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub index: u32,
    pub occurrence: Occurrence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubEvent {
    pub index: u32,
    pub half: Half,
    pub complete: bool,
    pub actions: Vec<Action>,
    pub outcome: Occurrence,
}

/// Immutable revision of one event's document. Shared behind `Arc`; a refresh
/// always produces a new value instead of mutating a published one.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    event_id: EventId,
    token: VersionToken,
    document: Value,
}

impl Snapshot {
    pub fn new(event_id: EventId, token: VersionToken, document: Value) -> Self {
        Self {
            event_id,
            token,
            document,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn token(&self) -> &VersionToken {
        &self.token
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn status(&self) -> EventStatus {
        self.document
            .pointer(STATUS_CODE_POINTER)
            .and_then(Value::as_str)
            .map(EventStatus::from_code)
            .unwrap_or(EventStatus::Unknown)
    }

    /// Sub-events in ascending index order. Malformed entries are skipped.
    pub fn sub_events(&self) -> Vec<SubEvent> {
        let Some(entries) = self
            .document
            .pointer(SUB_EVENTS_POINTER)
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };

        let mut sub_events: Vec<SubEvent> = entries
            .iter()
            .enumerate()
            .filter_map(|(position, entry)| {
                let parsed = parse_sub_event(entry);
                if parsed.is_none() {
                    tracing::debug!(
                        event_id = self.event_id,
                        position,
                        "skipping malformed sub-event entry"
                    );
                }
                parsed
            })
            .collect();
        sub_events.sort_by_key(|sub_event| sub_event.index);
        sub_events
    }
}

fn parse_sub_event(entry: &Value) -> Option<SubEvent> {
    let about = entry.get("about")?;
    let index = about.get("atBatIndex").and_then(as_index)?;
    let half = match about.get("halfInning").and_then(Value::as_str) {
        Some("top") => Half::Top,
        Some("bottom") => Half::Bottom,
        _ => return None,
    };
    let complete = about
        .get("isComplete")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut actions: Vec<Action> = entry
        .get("playEvents")
        .and_then(Value::as_array)
        .map(|events| {
            events
                .iter()
                .filter_map(|event| {
                    let index = event.get("index").and_then(as_index)?;
                    Some(Action {
                        index,
                        occurrence: parse_occurrence(event.get("details")),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    actions.sort_by_key(|action| action.index);

    let mut outcome = parse_occurrence(entry.get("result"));
    if !outcome.scoring {
        outcome.scoring = about
            .get("isScoringPlay")
            .and_then(Value::as_bool)
            .unwrap_or(false);
    }

    Some(SubEvent {
        index,
        half,
        complete,
        actions,
        outcome,
    })
}

fn parse_occurrence(details: Option<&Value>) -> Occurrence {
    let Some(details) = details else {
        return Occurrence::default();
    };
    Occurrence {
        category: details
            .get("eventType")
            .and_then(Value::as_str)
            .map(str::to_owned),
        scoring: details
            .get("isScoringPlay")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        description: details
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_owned),
    }
}

fn as_index(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|raw| u32::try_from(raw).ok())
}
