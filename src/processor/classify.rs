use crate::model::TeamRole;
use crate::snapshot::{Half, Occurrence};
use serde::{Deserialize, Serialize};

/// What the tracked team is doing during a sub-event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActingSide {
    Batting,
    Pitching,
}

impl ActingSide {
    pub fn of(half: Half, role: TeamRole) -> Self {
        if half.batting(role) {
            ActingSide::Batting
        } else {
            ActingSide::Pitching
        }
    }
}

/// Which occurrences deserve a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationRules {
    /// Categories announced while the tracked team bats.
    pub batting: Vec<String>,
    /// Categories announced while the tracked team is in the field.
    pub pitching: Vec<String>,
    /// Announce any scoring occurrence by the tracked team even when its
    /// category is not listed.
    pub scoring_fallback: bool,
}

impl NotificationRules {
    pub fn is_interesting(&self, occurrence: &Occurrence, side: ActingSide) -> bool {
        let listed = match side {
            ActingSide::Batting => &self.batting,
            ActingSide::Pitching => &self.pitching,
        };

        if let Some(category) = occurrence.category.as_deref() {
            if listed.iter().any(|wanted| wanted == category) {
                return true;
            }
        }

        self.scoring_fallback && occurrence.scoring && side == ActingSide::Batting
    }
}
