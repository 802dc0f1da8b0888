//! Keeps one cached document per event current by replaying provider diffs,
//! and caches event-independent data (the day's schedule) under a separate
//! lock.

use crate::model::{EventId, EventRef};
use crate::provider::{DataProvider, DiffResponse, FetchedSnapshot};
use crate::runtime::telemetry::Telemetry;
use crate::snapshot::document::{Snapshot, VersionToken};
use crate::snapshot::patch::apply_patch;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// How stale a cached document may be, and when to bypass patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub max_age: Duration,
    pub force_full: bool,
    /// Re-fetch in full once the cached document reports a final status, so
    /// late corrections land in post-event content.
    pub full_if_final: bool,
}

impl RefreshPolicy {
    pub fn within(max_age: Duration) -> Self {
        Self {
            max_age,
            force_full: false,
            full_if_final: false,
        }
    }

    pub fn force_full(mut self) -> Self {
        self.force_full = true;
        self
    }

    pub fn full_if_final(mut self) -> Self {
        self.full_if_final = true;
        self
    }
}

#[derive(Clone)]
struct Cached {
    snapshot: Arc<Snapshot>,
    refreshed_at: Instant,
}

/// Per-event cache slot. `refresh` serializes refreshes for the event while
/// readers only ever touch `current`, which is swapped wholesale.
#[derive(Default)]
struct EventSlot {
    refresh: tokio::sync::Mutex<()>,
    current: RwLock<Option<Cached>>,
}

impl EventSlot {
    fn current(&self) -> Option<Cached> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn fresh(&self, max_age: Duration) -> Option<Arc<Snapshot>> {
        self.current()
            .filter(|cached| cached.refreshed_at.elapsed() < max_age)
            .map(|cached| cached.snapshot)
    }

    fn install(&self, snapshot: Arc<Snapshot>) {
        let mut slot = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(Cached {
            snapshot,
            refreshed_at: Instant::now(),
        });
    }

    fn touch(&self) {
        let mut slot = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(cached) = slot.as_mut() {
            cached.refreshed_at = Instant::now();
        }
    }
}

struct CachedSchedule {
    events: Arc<Vec<EventRef>>,
    refreshed_at: Instant,
}

enum RefreshPath {
    Full { divergent: bool },
    Current,
    Diff { from: VersionToken, to: VersionToken },
}

pub struct Synchronizer {
    provider: Arc<dyn DataProvider>,
    telemetry: Arc<Telemetry>,
    slots: Mutex<HashMap<EventId, Arc<EventSlot>>>,
    schedules: tokio::sync::Mutex<HashMap<NaiveDate, CachedSchedule>>,
}

impl Synchronizer {
    pub fn new(provider: Arc<dyn DataProvider>, telemetry: Arc<Telemetry>) -> Self {
        Self {
            provider,
            telemetry,
            slots: Mutex::new(HashMap::new()),
            schedules: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Returns the document for `event_id`, refreshing it first when the
    /// cached copy is older than the policy allows.
    ///
    /// A failed refresh leaves the previously cached revision in place.
    pub async fn get(&self, event_id: EventId, policy: RefreshPolicy) -> Result<Arc<Snapshot>> {
        let slot = self.slot(event_id);

        if !policy.force_full {
            if let Some(snapshot) = slot.fresh(policy.max_age) {
                return Ok(snapshot);
            }
        }

        let _refresh = slot.refresh.lock().await;

        // A concurrent caller may have refreshed while we waited.
        if !policy.force_full {
            if let Some(snapshot) = slot.fresh(policy.max_age) {
                return Ok(snapshot);
            }
        }

        let cached = slot.current();
        let path = self.plan(event_id, cached.as_ref(), policy).await?;

        match path {
            RefreshPath::Current => {
                slot.touch();
                let snapshot = cached
                    .map(|cached| cached.snapshot)
                    .context("cached snapshot disappeared during refresh")?;
                tracing::trace!(event_id, token = %snapshot.token(), "snapshot already current");
                Ok(snapshot)
            }
            RefreshPath::Full { divergent } => {
                if divergent {
                    self.telemetry.record_divergence();
                }
                self.full_refresh(event_id, &slot).await
            }
            RefreshPath::Diff { from, to } => {
                let Some(cached) = cached else {
                    return self.full_refresh(event_id, &slot).await;
                };
                self.diff_refresh(event_id, &slot, &cached.snapshot, &from, &to)
                    .await
            }
        }
    }

    /// Last installed revision without touching the provider.
    pub fn cached(&self, event_id: EventId) -> Option<Arc<Snapshot>> {
        let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots
            .get(&event_id)
            .and_then(|slot| slot.current())
            .map(|cached| cached.snapshot)
    }

    /// When the cached revision was last confirmed against the provider,
    /// either by a fetch or by finding no newer token.
    pub fn refreshed_at(&self, event_id: EventId) -> Option<Instant> {
        let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots
            .get(&event_id)
            .and_then(|slot| slot.current())
            .map(|cached| cached.refreshed_at)
    }

    /// Drops cached documents for events that are no longer tracked.
    pub fn retain(&self, keep: &[EventId]) {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        let before = slots.len();
        slots.retain(|event_id, _| keep.contains(event_id));
        tracing::debug!(
            dropped = before.saturating_sub(slots.len()),
            retained = slots.len(),
            "pruned snapshot cache"
        );
    }

    /// Schedule for `date`, fetched at most once per `max_age`.
    pub async fn schedule(&self, date: NaiveDate, max_age: Duration) -> Result<Arc<Vec<EventRef>>> {
        let mut schedules = self.schedules.lock().await;

        if let Some(cached) = schedules.get(&date) {
            if cached.refreshed_at.elapsed() < max_age {
                return Ok(cached.events.clone());
            }
        }

        let events = Arc::new(
            self.provider
                .fetch_schedule(date)
                .await
                .with_context(|| format!("failed to fetch schedule for {date}"))?,
        );
        schedules.retain(|cached_date, _| *cached_date >= date);
        schedules.insert(
            date,
            CachedSchedule {
                events: events.clone(),
                refreshed_at: Instant::now(),
            },
        );
        tracing::debug!(%date, events = events.len(), "schedule refreshed");
        Ok(events)
    }

    fn slot(&self, event_id: EventId) -> Arc<EventSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.entry(event_id).or_default().clone()
    }

    async fn plan(
        &self,
        event_id: EventId,
        cached: Option<&Cached>,
        policy: RefreshPolicy,
    ) -> Result<RefreshPath> {
        let Some(cached) = cached else {
            return Ok(RefreshPath::Full { divergent: false });
        };
        if policy.force_full || (policy.full_if_final && cached.snapshot.status().is_final()) {
            return Ok(RefreshPath::Full { divergent: false });
        }

        let history = self
            .provider
            .fetch_token_history(event_id)
            .await
            .with_context(|| format!("failed to fetch token history for event {event_id}"))?;

        let current = cached.snapshot.token();
        if !history.contains(current) {
            tracing::warn!(
                event_id,
                token = %current,
                history = history.len(),
                "cached snapshot token missing from provider history; refetching in full"
            );
            return Ok(RefreshPath::Full { divergent: true });
        }

        match history.iter().max() {
            Some(newest) if newest > current => Ok(RefreshPath::Diff {
                from: current.clone(),
                to: newest.clone(),
            }),
            _ => Ok(RefreshPath::Current),
        }
    }

    async fn full_refresh(&self, event_id: EventId, slot: &EventSlot) -> Result<Arc<Snapshot>> {
        let FetchedSnapshot { document, token } = self
            .provider
            .fetch_snapshot(event_id)
            .await
            .with_context(|| format!("failed to fetch snapshot for event {event_id}"))?;

        let snapshot = Arc::new(Snapshot::new(event_id, token, document));
        slot.install(snapshot.clone());
        self.telemetry.record_full_fetch();
        tracing::debug!(event_id, token = %snapshot.token(), "snapshot replaced by full fetch");
        Ok(snapshot)
    }

    async fn diff_refresh(
        &self,
        event_id: EventId,
        slot: &EventSlot,
        base: &Snapshot,
        from: &VersionToken,
        to: &VersionToken,
    ) -> Result<Arc<Snapshot>> {
        let response = self
            .provider
            .fetch_diff(event_id, from, to)
            .await
            .with_context(|| format!("failed to fetch diff {from}..{to} for event {event_id}"))?;

        let ops = match response {
            DiffResponse::Full(document) => {
                let snapshot = Arc::new(Snapshot::new(event_id, to.clone(), document));
                slot.install(snapshot.clone());
                self.telemetry.record_full_fetch();
                tracing::debug!(event_id, token = %to, "provider answered diff with full document");
                return Ok(snapshot);
            }
            DiffResponse::Patch(ops) => ops,
        };

        let mut document = base.document().clone();
        match apply_patch(&mut document, &ops) {
            Ok(stats) => {
                let snapshot = Arc::new(Snapshot::new(event_id, to.clone(), document));
                slot.install(snapshot.clone());
                self.telemetry.record_patch_applied();
                tracing::debug!(
                    event_id,
                    from = %from,
                    to = %to,
                    applied = stats.applied,
                    skipped = stats.skipped,
                    "snapshot advanced by patch"
                );
                Ok(snapshot)
            }
            Err(err) => {
                self.telemetry.record_patch_fallback();
                tracing::warn!(
                    event_id,
                    from = %from,
                    to = %to,
                    error = %err,
                    "patch rejected; falling back to full fetch"
                );
                self.full_refresh(event_id, slot).await
            }
        }
    }
}
