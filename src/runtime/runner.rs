use crate::provider::{
    ContentApi, DataProvider, GuardedProvider, ProviderCircuitBreaker, ProviderMetricsSnapshot,
    Renderer,
};
use crate::runtime::alerts::{AlertSink, Alerter};
use crate::runtime::config::CoreConfig;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::{self, Telemetry};
use crate::runtime::wait::sleep_or_cancel;
use crate::snapshot::Synchronizer;
use crate::store::{ProgressStore, QueryExecutor};
use crate::supervisor::{next_rollover, posting_date, DayOutcome, EventBoard, Supervisor};
use crate::worker::{WorkerContext, WorkerContextParams};
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// External collaborators the core drives.
pub struct Collaborators {
    pub provider: Arc<dyn DataProvider>,
    pub content: Arc<dyn ContentApi>,
    pub renderer: Arc<dyn Renderer>,
    pub executor: Arc<dyn QueryExecutor>,
    pub alerts: Arc<dyn AlertSink>,
}

/// Owns the root cancellation token and drives one posting day after
/// another until shutdown or a fatal error.
pub struct Runner {
    config: Arc<CoreConfig>,
    supervisor: Supervisor,
    telemetry: Arc<Telemetry>,
    provider: Arc<GuardedProvider>,
    shutdown: CancellationToken,
}

impl Runner {
    /// Wires the collaborators together. Fails when the progress store
    /// cannot be opened, since no guarantee holds without it.
    pub fn new(config: CoreConfig, collaborators: Collaborators) -> Result<Self> {
        let Collaborators {
            provider,
            content,
            renderer,
            executor,
            alerts,
        } = collaborators;

        config.validate()?;
        let config = Arc::new(config);
        let shutdown = CancellationToken::new();
        let telemetry = Arc::new(Telemetry::default());

        let store = ProgressStore::open(executor).context("failed to open progress store")?;
        let provider = Arc::new(GuardedProvider::new(
            provider,
            config.provider().clone(),
            Arc::new(ProviderCircuitBreaker::default()),
            shutdown.clone(),
        )?);
        let synchronizer = Arc::new(Synchronizer::new(provider.clone(), telemetry.clone()));

        let ctx = Arc::new(WorkerContext::new(WorkerContextParams {
            config: config.clone(),
            synchronizer,
            store,
            content,
            renderer,
            alerts: Alerter::new(alerts, telemetry.clone()),
            telemetry: telemetry.clone(),
            board: Arc::new(EventBoard::default()),
        }));

        Ok(Self {
            config,
            supervisor: Supervisor::new(ctx),
            telemetry,
            provider,
            shutdown,
        })
    }

    /// Returns a clone of the root shutdown token so external callers can
    /// integrate with their own signal handlers.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn board(&self) -> Arc<EventBoard> {
        self.supervisor.board()
    }

    pub fn provider_metrics(&self) -> ProviderMetricsSnapshot {
        self.provider.metrics()
    }

    /// Runs posting days back to back until the root token is cancelled.
    /// Returns the captured error when a fatal condition stopped the run.
    pub async fn run(&self) -> Result<()> {
        let run_token = self.shutdown.child_token();
        let fatal = FatalErrorHandler::new(self.shutdown.clone(), run_token.clone());
        let reporter = telemetry::spawn_status_reporter(
            self.telemetry.clone(),
            self.supervisor.board(),
            run_token.clone(),
            self.config.status_interval(),
        );

        let offset = self.config.utc_offset();
        let rollover_hour = self.config.rollover_hour();

        loop {
            let date = posting_date(Utc::now(), offset, rollover_hour);
            match self.supervisor.run_day(date, &run_token).await {
                Ok(DayOutcome::Cancelled) => break,
                Ok(outcome) => tracing::info!(%date, ?outcome, "posting day done"),
                Err(err) => {
                    fatal.trigger("supervisor", err);
                    break;
                }
            }

            let now = Utc::now();
            let wake = next_rollover(now, offset, rollover_hour);
            let delay = (wake - now).to_std().unwrap_or(Duration::ZERO);
            tracing::info!(%wake, "sleeping until the next posting day");
            if sleep_or_cancel(delay, &run_token).await.is_cancelled() {
                break;
            }
        }

        run_token.cancel();
        if let Err(err) = reporter.await {
            tracing::warn!(error = %err, "status reporter task panicked");
        }

        match fatal.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is
    /// cancelled elsewhere.
    pub async fn run_until_ctrl_c(&self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        let signal_task = tokio::spawn(async move {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    tracing::info!("Ctrl-C received; shutting down runner");
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        });

        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");
        let result = self.run().await;

        self.shutdown.cancel();
        if let Err(err) = signal_task.await {
            tracing::warn!(error = %err, "signal task panicked");
        }
        result
    }
}
