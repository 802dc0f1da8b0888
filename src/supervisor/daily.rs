//! The daily control loop: discover the day's events, start one worker per
//! (event, enabled kind), and keep the fleet alive until every worker has
//! finished on purpose.

use crate::model::{ContentKind, Event, WorkerKey};
use crate::runtime::wait::sleep_or_cancel;
use crate::supervisor::board::EventBoard;
use crate::supervisor::registry::WorkerRegistry;
use crate::worker::{LifecycleWorker, WorkerContext};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as TimeDelta, FixedOffset, NaiveDate, TimeZone, Timelike, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayOutcome {
    /// Every expected worker reached its terminal phase.
    Completed,
    NoEvents,
    Cancelled,
}

pub struct Supervisor {
    ctx: Arc<WorkerContext>,
}

impl Supervisor {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx }
    }

    pub fn board(&self) -> Arc<EventBoard> {
        self.ctx.board.clone()
    }

    /// Runs one posting day. Errors are reserved for conditions the process
    /// cannot work around, such as an unusable progress store.
    pub async fn run_day(&self, date: NaiveDate, shutdown: &CancellationToken) -> Result<DayOutcome> {
        self.ctx
            .store
            .check()
            .await
            .context("progress store is unusable")?;

        let Some(events) = self.discover(date, shutdown).await else {
            return Ok(DayOutcome::Cancelled);
        };

        let board = &self.ctx.board;
        board.reset(date, events.clone());
        self.ctx
            .synchronizer
            .retain(&events.iter().map(|event| event.id).collect::<Vec<_>>());

        if events.is_empty() {
            tracing::info!(%date, "no tracked events today");
            return Ok(DayOutcome::NoEvents);
        }

        let expected = self.expected_workers(&events);
        tracing::info!(
            %date,
            events = events.len(),
            workers = expected.len(),
            "starting posting day"
        );

        let day_token = shutdown.child_token();
        let mut registry = WorkerRegistry::new(self.ctx.telemetry.clone());
        for key in &expected {
            self.spawn(&mut registry, *key, date, &day_token)?;
        }

        let liveness = self.ctx.config.liveness_interval();
        let outcome = loop {
            if expected.iter().all(|key| board.is_stopped(*key)) {
                break DayOutcome::Completed;
            }
            if sleep_or_cancel(liveness, shutdown).await.is_cancelled() {
                break DayOutcome::Cancelled;
            }

            for key in &expected {
                if registry.is_alive(*key) || board.is_stopped(*key) {
                    continue;
                }
                tracing::error!(worker = %key, "worker is not running but has not finished; respawning");
                self.ctx
                    .alerts
                    .error(*key, "worker died before finishing; respawned");
                self.ctx.telemetry.record_worker_respawn();
                self.spawn(&mut registry, *key, date, &day_token)?;
            }
        };

        day_token.cancel();
        let workers = registry.len();
        registry.join_all().await;
        tracing::info!(%date, ?outcome, workers, "posting day finished");
        Ok(outcome)
    }

    /// Tracked events for `date`, ordered by start. Provider failures are
    /// retried every poll interval until shutdown.
    async fn discover(&self, date: NaiveDate, shutdown: &CancellationToken) -> Option<Vec<Event>> {
        let team_id = self.ctx.config.team_id();
        loop {
            match self
                .ctx
                .synchronizer
                .schedule(date, self.ctx.config.schedule_max_age())
                .await
            {
                Ok(schedule) => {
                    let mut events: Vec<Event> = schedule
                        .iter()
                        .filter_map(|entry| entry.tracked(team_id))
                        .collect();
                    events.sort_by_key(|event| (event.start_time, event.id));
                    return Some(events);
                }
                Err(err) => {
                    tracing::warn!(%date, error = %format!("{err:#}"), "schedule discovery failed");
                    self.ctx.alerts.warning(
                        format!("schedule {date}"),
                        format!("could not load today's events: {err:#}"),
                    );
                }
            }

            if sleep_or_cancel(self.ctx.config.waiting_poll_interval(), shutdown)
                .await
                .is_cancelled()
            {
                return None;
            }
        }
    }

    /// One key per (event, enabled kind). The day summary covers the whole
    /// day and hangs off the first event.
    fn expected_workers(&self, events: &[Event]) -> Vec<WorkerKey> {
        let kinds: Vec<ContentKind> = self.ctx.config.enabled_kinds().collect();
        let mut keys = Vec::new();
        for (position, event) in events.iter().enumerate() {
            for kind in &kinds {
                if *kind == ContentKind::DaySummary && position > 0 {
                    continue;
                }
                keys.push(WorkerKey::new(event.id, *kind));
            }
        }
        keys
    }

    fn spawn(
        &self,
        registry: &mut WorkerRegistry,
        key: WorkerKey,
        date: NaiveDate,
        day_token: &CancellationToken,
    ) -> Result<()> {
        let worker = LifecycleWorker::new(key, date, self.ctx.clone(), day_token.clone())?;
        registry.spawn(key, worker.run());
        tracing::debug!(worker = %key, "worker spawned");
        Ok(())
    }
}

/// The posting day `now` belongs to: local hours before `rollover_hour`
/// still count toward the previous date.
pub fn posting_date(now: DateTime<Utc>, offset: FixedOffset, rollover_hour: u32) -> NaiveDate {
    let local = now.with_timezone(&offset);
    let today = local.date_naive();
    if local.hour() < rollover_hour {
        today.pred_opt().unwrap_or(today)
    } else {
        today
    }
}

/// Next local `rollover_hour:00` strictly after `now`.
pub fn next_rollover(now: DateTime<Utc>, offset: FixedOffset, rollover_hour: u32) -> DateTime<Utc> {
    let today = now.with_timezone(&offset).date_naive();
    [Some(today), today.succ_opt()]
        .into_iter()
        .flatten()
        .filter_map(|date| date.and_hms_opt(rollover_hour, 0, 0))
        .filter_map(|naive| offset.from_local_datetime(&naive).single())
        .map(|at| at.with_timezone(&Utc))
        .find(|at| *at > now)
        .unwrap_or_else(|| now + TimeDelta::days(1))
}
