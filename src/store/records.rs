use crate::model::{ContentKind, EventId};
use crate::provider::ContentId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Progress for one sub-event within a content item's notification stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubEventProgress {
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub processed_actions: Vec<u32>,
}

/// Durable map of sub-event index to progress. Serialized with string keys,
/// e.g. `{"3": {"complete": false, "processedActions": [0, 2]}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessingRecord {
    sub_events: BTreeMap<u32, SubEventProgress>,
}

impl ProcessingRecord {
    /// Highest sub-event index seen so far; scanning resumes here.
    pub fn resume_index(&self) -> u32 {
        self.sub_events.keys().next_back().copied().unwrap_or(0)
    }

    pub fn is_complete(&self, sub_event: u32) -> bool {
        self.sub_events
            .get(&sub_event)
            .map(|progress| progress.complete)
            .unwrap_or(false)
    }

    pub fn has_processed(&self, sub_event: u32, action: u32) -> bool {
        self.sub_events
            .get(&sub_event)
            .map(|progress| progress.processed_actions.contains(&action))
            .unwrap_or(false)
    }

    /// Registers the sub-event so the resume point advances even before any
    /// of its actions are processed. Returns whether the record changed.
    pub fn observe(&mut self, sub_event: u32) -> bool {
        if self.sub_events.contains_key(&sub_event) {
            return false;
        }
        self.sub_events.insert(sub_event, SubEventProgress::default());
        true
    }

    /// Records `action` once. Returns false when it was already recorded.
    pub fn record_action(&mut self, sub_event: u32, action: u32) -> bool {
        let progress = self.sub_events.entry(sub_event).or_default();
        if progress.processed_actions.contains(&action) {
            return false;
        }
        progress.processed_actions.push(action);
        true
    }

    pub fn mark_complete(&mut self, sub_event: u32) -> bool {
        let progress = self.sub_events.entry(sub_event).or_default();
        if progress.complete {
            return false;
        }
        progress.complete = true;
        true
    }

    pub fn get(&self, sub_event: u32) -> Option<&SubEventProgress> {
        self.sub_events.get(&sub_event)
    }

    pub fn len(&self) -> usize {
        self.sub_events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sub_events.is_empty()
    }
}

/// Content published for an (event, kind, date).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedContent {
    pub event_id: EventId,
    pub kind: ContentKind,
    pub date: NaiveDate,
    pub content_id: ContentId,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
