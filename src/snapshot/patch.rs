//! Permissive JSON-Patch engine used to advance cached documents.
//!
//! Differences from RFC 6902: `add` on a sequence always appends, `replace`
//! at `len` of a sequence appends, and removing a missing key or index is
//! skipped instead of failing. Structural
//! gaps are never created: touching a sequence index past its length aborts
//! the whole patch so the caller falls back to a full fetch.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOpKind {
    Add,
    Remove,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: PatchOpKind,
    pub path: String,
    #[serde(default)]
    pub value: Value,
}

impl PatchOp {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOpKind::Add,
            path: path.into(),
            value,
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOpKind::Remove,
            path: path.into(),
            value: Value::Null,
        }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOpKind::Replace,
            path: path.into(),
            value,
        }
    }
}

/// Reason a patch could not be applied. Every variant means the document is
/// no longer trustworthy and must be re-fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    InvalidPath { path: String },
    Gap { path: String, index: usize, len: usize },
    TypeMismatch { path: String, segment: String },
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchError::InvalidPath { path } => write!(f, "invalid patch path `{path}`"),
            PatchError::Gap { path, index, len } => write!(
                f,
                "patch path `{path}` addresses index {index} of a sequence of length {len}"
            ),
            PatchError::TypeMismatch { path, segment } => write!(
                f,
                "patch path `{path}` cannot traverse segment `{segment}`"
            ),
        }
    }
}

impl std::error::Error for PatchError {}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PatchStats {
    pub applied: usize,
    pub skipped: usize,
}

enum OpOutcome {
    Applied,
    Skipped,
}

/// Applies `ops` in order. On error the document may be partially modified;
/// callers must apply to a scratch copy.
pub fn apply_patch(document: &mut Value, ops: &[PatchOp]) -> Result<PatchStats, PatchError> {
    let mut stats = PatchStats::default();
    for op in ops {
        match apply_op(document, op)? {
            OpOutcome::Applied => stats.applied += 1,
            OpOutcome::Skipped => stats.skipped += 1,
        }
    }
    Ok(stats)
}

fn apply_op(document: &mut Value, op: &PatchOp) -> Result<OpOutcome, PatchError> {
    let segments = parse_path(&op.path)?;

    let Some((last, parents)) = segments.split_last() else {
        return match op.op {
            PatchOpKind::Add | PatchOpKind::Replace => {
                *document = op.value.clone();
                Ok(OpOutcome::Applied)
            }
            PatchOpKind::Remove => Err(PatchError::InvalidPath {
                path: op.path.clone(),
            }),
        };
    };

    match op.op {
        // Removal never builds structure; a missing parent means a missing target.
        PatchOpKind::Remove => Ok(match lookup_mut(document, parents) {
            Some(parent) => remove(parent, last, &op.path),
            None => skip_missing(&op.path),
        }),
        PatchOpKind::Add => add(
            build_parents(document, &segments, &op.path)?,
            last,
            &op.value,
            &op.path,
        ),
        PatchOpKind::Replace => replace(
            build_parents(document, &segments, &op.path)?,
            last,
            &op.value,
            &op.path,
        ),
    }
}

/// Walks to the parent of the last segment, creating missing containers
/// shaped by the segment that follows.
fn build_parents<'a>(
    document: &'a mut Value,
    segments: &[String],
    path: &str,
) -> Result<&'a mut Value, PatchError> {
    let mut current = document;
    for window in segments.windows(2) {
        current = descend(current, &window[0], is_sequence_segment(&window[1]), path)?;
    }
    Ok(current)
}

fn lookup_mut<'a>(document: &'a mut Value, segments: &[String]) -> Option<&'a mut Value> {
    segments
        .iter()
        .try_fold(document, |current, segment| match current {
            Value::Object(map) => map.get_mut(segment),
            Value::Array(items) => parse_index(segment).and_then(|index| items.get_mut(index)),
            _ => None,
        })
}

fn descend<'a>(
    container: &'a mut Value,
    segment: &str,
    next_is_sequence: bool,
    path: &str,
) -> Result<&'a mut Value, PatchError> {
    match container {
        Value::Object(map) => Ok(map
            .entry(segment.to_owned())
            .or_insert_with(|| empty_container(next_is_sequence))),
        Value::Array(items) => {
            let index = sequence_index(segment, items.len(), path)?;
            if index == items.len() {
                items.push(empty_container(next_is_sequence));
            }
            Ok(&mut items[index])
        }
        _ => Err(type_mismatch(path, segment)),
    }
}

fn add(container: &mut Value, segment: &str, value: &Value, path: &str) -> Result<OpOutcome, PatchError> {
    match container {
        Value::Object(map) => {
            map.insert(segment.to_owned(), value.clone());
            Ok(OpOutcome::Applied)
        }
        Value::Array(items) => {
            // Any in-range index appends; only a gap is rejected.
            sequence_index(segment, items.len(), path)?;
            items.push(value.clone());
            Ok(OpOutcome::Applied)
        }
        _ => Err(type_mismatch(path, segment)),
    }
}

fn remove(container: &mut Value, segment: &str, path: &str) -> OpOutcome {
    let removed = match container {
        Value::Object(map) => map.remove(segment).is_some(),
        Value::Array(items) => match parse_index(segment) {
            Some(index) if index < items.len() => {
                items.remove(index);
                true
            }
            _ => false,
        },
        _ => false,
    };

    if removed {
        OpOutcome::Applied
    } else {
        skip_missing(path)
    }
}

fn skip_missing(path: &str) -> OpOutcome {
    tracing::warn!(path, "patch remove target missing; skipping operation");
    OpOutcome::Skipped
}

fn replace(
    container: &mut Value,
    segment: &str,
    value: &Value,
    path: &str,
) -> Result<OpOutcome, PatchError> {
    match container {
        Value::Object(map) => {
            map.insert(segment.to_owned(), value.clone());
            Ok(OpOutcome::Applied)
        }
        Value::Array(items) => {
            let index = sequence_index(segment, items.len(), path)?;
            if index == items.len() {
                tracing::debug!(path, "replace at sequence end treated as append");
                items.push(value.clone());
            } else {
                items[index] = value.clone();
            }
            Ok(OpOutcome::Applied)
        }
        _ => Err(type_mismatch(path, segment)),
    }
}

/// Resolves a sequence segment to an index no greater than `len`.
fn sequence_index(segment: &str, len: usize, path: &str) -> Result<usize, PatchError> {
    if segment == "-" {
        return Ok(len);
    }
    let index = parse_index(segment).ok_or_else(|| type_mismatch(path, segment))?;
    if index > len {
        return Err(PatchError::Gap {
            path: path.to_owned(),
            index,
            len,
        });
    }
    Ok(index)
}

fn parse_path(path: &str) -> Result<Vec<String>, PatchError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PatchError::InvalidPath {
            path: path.to_owned(),
        });
    };
    Ok(rest
        .split('/')
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn parse_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

fn is_sequence_segment(segment: &str) -> bool {
    segment == "-" || parse_index(segment).is_some()
}

fn empty_container(sequence: bool) -> Value {
    if sequence {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    }
}

fn type_mismatch(path: &str, segment: &str) -> PatchError {
    PatchError::TypeMismatch {
        path: path.to_owned(),
        segment: segment.to_owned(),
    }
}
