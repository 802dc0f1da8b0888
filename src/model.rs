//! Core domain types shared by the synchronizer, processor, workers, and the
//! supervisor.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type EventId = u64;

/// Provider status of an event, normalized from its short status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    Scheduled,
    PreGame,
    Live,
    Final,
    Postponed,
    Cancelled,
    Suspended,
    Unknown,
}

impl EventStatus {
    /// Maps a provider status code (`S`, `P`, `I`, `F`, ...) to a status.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "S" => EventStatus::Scheduled,
            "P" | "PW" => EventStatus::PreGame,
            "I" | "IR" | "M" | "N" | "MA" => EventStatus::Live,
            "F" | "FR" | "O" | "OR" => EventStatus::Final,
            "D" | "DI" | "DR" => EventStatus::Postponed,
            "C" | "CR" => EventStatus::Cancelled,
            "U" | "UR" | "T" => EventStatus::Suspended,
            _ => EventStatus::Unknown,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EventStatus::Scheduled => "S",
            EventStatus::PreGame => "P",
            EventStatus::Live => "I",
            EventStatus::Final => "F",
            EventStatus::Postponed => "D",
            EventStatus::Cancelled => "C",
            EventStatus::Suspended => "U",
            EventStatus::Unknown => "?",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, EventStatus::Live)
    }

    /// Terminal for update purposes: the event will not produce new data.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            EventStatus::Final
                | EventStatus::Postponed
                | EventStatus::Cancelled
                | EventStatus::Suspended
        )
    }

    pub fn is_called_off(&self) -> bool {
        matches!(self, EventStatus::Postponed | EventStatus::Cancelled)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The fixed set of content lifecycles tracked per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContentKind {
    DaySummary,
    PerEvent,
    PostEvent,
}

impl ContentKind {
    pub const ALL: [ContentKind; 3] = [
        ContentKind::DaySummary,
        ContentKind::PerEvent,
        ContentKind::PostEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::DaySummary => "day-summary",
            ContentKind::PerEvent => "per-event",
            ContentKind::PostEvent => "post-event",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "day-summary" | "day_summary" => Ok(ContentKind::DaySummary),
            "per-event" | "per_event" => Ok(ContentKind::PerEvent),
            "post-event" | "post_event" => Ok(ContentKind::PostEvent),
            other => bail!("unknown content kind `{other}`"),
        }
    }
}

/// Which side of the event the configured team is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeamRole {
    Home,
    Away,
}

/// Schedule entry returned by the data provider for any event of the day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub id: EventId,
    pub start_time: DateTime<Utc>,
    pub status: EventStatus,
    pub home_team_id: u32,
    pub away_team_id: u32,
    /// Peer group (division) shared by both participants, when any.
    pub group: Option<String>,
}

impl EventRef {
    pub fn role_of(&self, team_id: u32) -> Option<TeamRole> {
        if self.home_team_id == team_id {
            Some(TeamRole::Home)
        } else if self.away_team_id == team_id {
            Some(TeamRole::Away)
        } else {
            None
        }
    }

    pub fn tracked(&self, team_id: u32) -> Option<Event> {
        self.role_of(team_id).map(|role| Event {
            id: self.id,
            start_time: self.start_time,
            status: self.status,
            role,
            group: self.group.clone(),
        })
    }
}

/// One event tracked by this process for the current day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,
    pub start_time: DateTime<Utc>,
    pub status: EventStatus,
    pub role: TeamRole,
    pub group: Option<String>,
}

/// Identifies one lifecycle worker: a content kind for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerKey {
    pub event_id: EventId,
    pub kind: ContentKind,
}

impl WorkerKey {
    pub fn new(event_id: EventId, kind: ContentKind) -> Self {
        Self { event_id, kind }
    }
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event {}/{}", self.event_id, self.kind)
    }
}
