use crate::model::{ContentKind, EventStatus, TeamRole};
use crate::supervisor::board::{EventBoard, WorkerPhase};
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt::Write as _;

/// Human-readable view of the day, recomputed from the board on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    pub date: Option<NaiveDate>,
    pub rows: Vec<StatusRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub event_id: u64,
    pub start_time: DateTime<Utc>,
    pub status: EventStatus,
    pub role: TeamRole,
    pub workers: Vec<(ContentKind, WorkerPhase, Option<String>)>,
}

impl StatusSummary {
    pub fn from_board(board: &EventBoard) -> Self {
        let rows = board
            .entries()
            .into_iter()
            .map(|entry| StatusRow {
                event_id: entry.event.id,
                start_time: entry.event.start_time,
                status: entry.event.status,
                role: entry.event.role,
                workers: entry
                    .phases
                    .iter()
                    .map(|(kind, phase)| (*kind, *phase, entry.content_ids.get(kind).cloned()))
                    .collect(),
            })
            .collect();

        Self {
            date: board.date(),
            rows,
        }
    }

    /// Workers that have not reached a terminal phase.
    pub fn active_workers(&self) -> usize {
        self.rows
            .iter()
            .flat_map(|row| row.workers.iter())
            .filter(|(_, phase, _)| *phase != WorkerPhase::Terminal)
            .count()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let Some(date) = self.date else {
            out.push_str("no posting day started");
            return out;
        };

        let _ = write!(
            out,
            "{date}: {} event(s), {} active worker(s)",
            self.rows.len(),
            self.active_workers()
        );
        for row in &self.rows {
            let role = match row.role {
                TeamRole::Home => "home",
                TeamRole::Away => "away",
            };
            let _ = write!(
                out,
                "\n  event {} ({role}) starts {} status {}",
                row.event_id,
                row.start_time.format("%H:%MZ"),
                row.status
            );
            for (kind, phase, content_id) in &row.workers {
                let _ = write!(out, "\n    {kind}: {phase}");
                if let Some(content_id) = content_id {
                    let _ = write!(out, " [{content_id}]");
                }
            }
        }
        out
    }
}
