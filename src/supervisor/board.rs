//! Per-day shared state between the supervisor and its workers.
//!
//! Workers report status changes and their current phase; the supervisor
//! reads the stop flags to tell intentional completion apart from a worker
//! that died.

use crate::model::{ContentKind, Event, EventId, EventStatus, WorkerKey};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerPhase {
    Waiting,
    Publishing,
    Updating,
    Terminal,
}

impl WorkerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerPhase::Waiting => "waiting",
            WorkerPhase::Publishing => "publishing",
            WorkerPhase::Updating => "updating",
            WorkerPhase::Terminal => "terminal",
        }
    }
}

impl fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marks which content lifecycles of an event have finished for good.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopFlags {
    pub day_summary: bool,
    pub content: bool,
    pub post_content: bool,
}

impl StopFlags {
    pub fn get(&self, kind: ContentKind) -> bool {
        match kind {
            ContentKind::DaySummary => self.day_summary,
            ContentKind::PerEvent => self.content,
            ContentKind::PostEvent => self.post_content,
        }
    }

    fn set(&mut self, kind: ContentKind) {
        match kind {
            ContentKind::DaySummary => self.day_summary = true,
            ContentKind::PerEvent => self.content = true,
            ContentKind::PostEvent => self.post_content = true,
        }
    }
}

/// Point-in-time view of one event's row on the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardEntry {
    pub event: Event,
    pub flags: StopFlags,
    pub phases: BTreeMap<ContentKind, WorkerPhase>,
    pub content_ids: BTreeMap<ContentKind, String>,
}

impl BoardEntry {
    fn new(event: Event) -> Self {
        Self {
            event,
            flags: StopFlags::default(),
            phases: BTreeMap::new(),
            content_ids: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct BoardState {
    date: Option<NaiveDate>,
    entries: BTreeMap<EventId, BoardEntry>,
}

#[derive(Debug, Default)]
pub struct EventBoard {
    state: RwLock<BoardState>,
}

impl EventBoard {
    /// Replaces the board with the events of a new posting day.
    pub fn reset(&self, date: NaiveDate, events: impl IntoIterator<Item = Event>) {
        let mut state = self.write();
        state.date = Some(date);
        state.entries = events
            .into_iter()
            .map(|event| (event.id, BoardEntry::new(event)))
            .collect();
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.read().date
    }

    pub fn event(&self, event_id: EventId) -> Option<Event> {
        self.read()
            .entries
            .get(&event_id)
            .map(|entry| entry.event.clone())
    }

    /// Events of the day ordered by start time.
    pub fn events(&self) -> Vec<Event> {
        let mut events: Vec<_> = self
            .read()
            .entries
            .values()
            .map(|entry| entry.event.clone())
            .collect();
        events.sort_by_key(|event| (event.start_time, event.id));
        events
    }

    pub fn entries(&self) -> Vec<BoardEntry> {
        let mut entries: Vec<_> = self.read().entries.values().cloned().collect();
        entries.sort_by_key(|entry| (entry.event.start_time, entry.event.id));
        entries
    }

    /// Records a status observed by a worker. Returns the previous status
    /// when it changed.
    pub fn update_status(&self, event_id: EventId, status: EventStatus) -> Option<EventStatus> {
        let mut state = self.write();
        let entry = state.entries.get_mut(&event_id)?;
        if entry.event.status == status {
            return None;
        }
        let previous = entry.event.status;
        entry.event.status = status;
        tracing::info!(event_id, from = %previous, to = %status, "event status changed");
        Some(previous)
    }

    /// Moves a worker to `phase`; reaching `Terminal` also raises its stop
    /// flag, which is never lowered again for the day.
    pub fn set_phase(&self, key: WorkerKey, phase: WorkerPhase) {
        let mut state = self.write();
        let Some(entry) = state.entries.get_mut(&key.event_id) else {
            return;
        };
        entry.phases.insert(key.kind, phase);
        if phase == WorkerPhase::Terminal {
            entry.flags.set(key.kind);
        }
    }

    pub fn phase(&self, key: WorkerKey) -> Option<WorkerPhase> {
        self.read()
            .entries
            .get(&key.event_id)
            .and_then(|entry| entry.phases.get(&key.kind).copied())
    }

    pub fn flags(&self, event_id: EventId) -> Option<StopFlags> {
        self.read().entries.get(&event_id).map(|entry| entry.flags)
    }

    /// Whether the worker for `key` finished on purpose. Unknown events
    /// count as stopped since nothing should run for them.
    pub fn is_stopped(&self, key: WorkerKey) -> bool {
        self.read()
            .entries
            .get(&key.event_id)
            .map_or(true, |entry| entry.flags.get(key.kind))
    }

    pub fn record_content(&self, key: WorkerKey, content_id: &str) {
        let mut state = self.write();
        if let Some(entry) = state.entries.get_mut(&key.event_id) {
            entry.content_ids.insert(key.kind, content_id.to_owned());
        }
    }

    pub fn content_id(&self, key: WorkerKey) -> Option<String> {
        self.read()
            .entries
            .get(&key.event_id)
            .and_then(|entry| entry.content_ids.get(&key.kind).cloned())
    }

    pub fn forget_content(&self, key: WorkerKey) {
        let mut state = self.write();
        if let Some(entry) = state.entries.get_mut(&key.event_id) {
            entry.content_ids.remove(&key.kind);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BoardState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BoardState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
