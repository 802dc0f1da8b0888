use crate::supervisor::board::EventBoard;
use crate::supervisor::status::StatusSummary;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the status reporter task.
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(60);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a fmt subscriber honouring `RUST_LOG` (default `info`). Safe to
/// call more than once.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Process-wide counters. Cheap to bump from any task.
#[derive(Default, Debug)]
pub struct Telemetry {
    content_published: AtomicU64,
    content_adopted: AtomicU64,
    content_edited: AtomicU64,
    content_deleted: AtomicU64,
    notifications_published: AtomicU64,
    notifications_failed: AtomicU64,
    full_fetches: AtomicU64,
    patches_applied: AtomicU64,
    patch_fallbacks: AtomicU64,
    divergences: AtomicU64,
    worker_crashes: AtomicU64,
    worker_respawns: AtomicU64,
    alerts_raised: AtomicU64,
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl Telemetry {
    counter!(record_content_published, content_published);
    counter!(record_content_adopted, content_adopted);
    counter!(record_content_edited, content_edited);
    counter!(record_content_deleted, content_deleted);
    counter!(record_notification_published, notifications_published);
    counter!(record_notification_failed, notifications_failed);
    counter!(record_full_fetch, full_fetches);
    counter!(record_patch_applied, patches_applied);
    counter!(record_patch_fallback, patch_fallbacks);
    counter!(record_divergence, divergences);
    counter!(record_worker_crash, worker_crashes);
    counter!(record_worker_respawn, worker_respawns);
    counter!(record_alert, alerts_raised);

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        TelemetrySnapshot {
            content_published: load(&self.content_published),
            content_adopted: load(&self.content_adopted),
            content_edited: load(&self.content_edited),
            content_deleted: load(&self.content_deleted),
            notifications_published: load(&self.notifications_published),
            notifications_failed: load(&self.notifications_failed),
            full_fetches: load(&self.full_fetches),
            patches_applied: load(&self.patches_applied),
            patch_fallbacks: load(&self.patch_fallbacks),
            divergences: load(&self.divergences),
            worker_crashes: load(&self.worker_crashes),
            worker_respawns: load(&self.worker_respawns),
            alerts_raised: load(&self.alerts_raised),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub content_published: u64,
    pub content_adopted: u64,
    pub content_edited: u64,
    pub content_deleted: u64,
    pub notifications_published: u64,
    pub notifications_failed: u64,
    pub full_fetches: u64,
    pub patches_applied: u64,
    pub patch_fallbacks: u64,
    pub divergences: u64,
    pub worker_crashes: u64,
    pub worker_respawns: u64,
    pub alerts_raised: u64,
}

/// Spawns a task that periodically logs the status summary and counters.
pub fn spawn_status_reporter(
    telemetry: Arc<Telemetry>,
    board: Arc<EventBoard>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "matchday::status", "status reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let counters = telemetry.snapshot();
                    let summary = StatusSummary::from_board(&board);
                    tracing::info!(
                        target: "matchday::status",
                        published = counters.content_published,
                        edits = counters.content_edited,
                        notifications = counters.notifications_published,
                        notification_failures = counters.notifications_failed,
                        full_fetches = counters.full_fetches,
                        patches = counters.patches_applied,
                        patch_fallbacks = counters.patch_fallbacks,
                        respawns = counters.worker_respawns,
                        alerts = counters.alerts_raised,
                        "status\n{}",
                        summary.render()
                    );
                }
            }
        }
    })
}
