use crate::model::{Event, EventRef};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// When a worker stops editing its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateUntil {
    /// No edits after the initial publish.
    Never,
    EventFinal,
    /// Every event of the tracked event's peer group today is final.
    PeerGroupFinal,
    /// Every event on today's schedule is final.
    DayFinal,
}

impl UpdateUntil {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateUntil::Never => "never",
            UpdateUntil::EventFinal => "event-final",
            UpdateUntil::PeerGroupFinal => "peer-group-final",
            UpdateUntil::DayFinal => "day-final",
        }
    }

    /// Whether updating should stop, given the tracked event's latest state
    /// and today's schedule.
    pub fn satisfied(&self, event: &Event, schedule: &[EventRef]) -> bool {
        match self {
            UpdateUntil::Never => true,
            UpdateUntil::EventFinal => event.status.is_final(),
            UpdateUntil::PeerGroupFinal => {
                let Some(group) = event.group.as_deref() else {
                    return event.status.is_final();
                };
                event.status.is_final()
                    && schedule
                        .iter()
                        .filter(|entry| entry.group.as_deref() == Some(group))
                        .all(|entry| entry.id == event.id || entry.status.is_final())
            }
            UpdateUntil::DayFinal => {
                event.status.is_final()
                    && schedule
                        .iter()
                        .all(|entry| entry.id == event.id || entry.status.is_final())
            }
        }
    }
}

impl fmt::Display for UpdateUntil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateUntil {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "never" => Ok(UpdateUntil::Never),
            "event-final" => Ok(UpdateUntil::EventFinal),
            "peer-group-final" => Ok(UpdateUntil::PeerGroupFinal),
            "day-final" => Ok(UpdateUntil::DayFinal),
            other => bail!("unknown update-until policy `{other}`"),
        }
    }
}
