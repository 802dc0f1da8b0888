//! Retry, timeout and circuit-breaker wrapper around any [`DataProvider`].
//!
//! Transient failures are retried with exponential backoff. A missing
//! document or an open breaker aborts immediately so callers can defer to
//! their next poll instead of stalling.

use crate::model::{EventId, EventRef};
use crate::provider::backoff::{retry_with_backoff, RetryBackoff, RetryDisposition};
use crate::provider::circuit_breaker::{CircuitOpen, ProviderCircuitBreaker};
use crate::provider::client::{DataProvider, DiffResponse, FetchedSnapshot, ProviderError};
use crate::provider::metrics::{ProviderMetrics, ProviderMetricsSnapshot};
use crate::runtime::wait::{run_or_cancel, WaitOutcome};
use crate::snapshot::VersionToken;
use anyhow::{bail, Result};
use chrono::NaiveDate;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_ATTEMPTS: usize = 4;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 250;
const DEFAULT_MAX_BACKOFF_MS: u64 = 4_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardOptions {
    pub request_timeout: Duration,
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for GuardOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        }
    }
}

impl GuardOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }
        if self.initial_backoff.is_zero() {
            bail!("initial_backoff must be greater than 0");
        }
        if self.max_backoff < self.initial_backoff {
            bail!("max_backoff must not be shorter than initial_backoff");
        }
        Ok(())
    }
}

pub struct GuardedProvider {
    inner: Arc<dyn DataProvider>,
    options: GuardOptions,
    breaker: Arc<ProviderCircuitBreaker>,
    metrics: ProviderMetrics,
    shutdown: CancellationToken,
}

impl GuardedProvider {
    pub fn new(
        inner: Arc<dyn DataProvider>,
        options: GuardOptions,
        breaker: Arc<ProviderCircuitBreaker>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            inner,
            options,
            breaker,
            metrics: ProviderMetrics::default(),
            shutdown,
        })
    }

    pub fn metrics(&self) -> ProviderMetricsSnapshot {
        self.metrics.snapshot(self.breaker.snapshot().state)
    }

    async fn guarded<'a, T, F>(
        &'a self,
        operation: &'static str,
        event_id: Option<EventId>,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> BoxFuture<'a, Result<T>>,
    {
        let backoff = RetryBackoff::new(self.options.initial_backoff, self.options.max_backoff)
            .with_max_attempts(self.options.max_attempts)
            .with_cancellation(&self.shutdown);

        retry_with_backoff(
            backoff,
            |attempt| {
                let request = call();
                self.attempt(operation, attempt, request)
            },
            |attempt, delay, err, will_retry| {
                if will_retry {
                    tracing::warn!(
                        operation,
                        event_id,
                        attempt,
                        backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "provider request failed; retrying"
                    );
                } else {
                    tracing::error!(
                        operation,
                        event_id,
                        attempt,
                        error = %err,
                        "provider request exhausted retries"
                    );
                }
            },
            |_, err| match err.downcast_ref::<ProviderError>() {
                Some(ProviderError::CircuitOpen) | Some(ProviderError::NotFound { .. }) => {
                    RetryDisposition::Abort
                }
                _ => RetryDisposition::Retry,
            },
        )
        .await
    }

    async fn attempt<T>(
        &self,
        operation: &'static str,
        attempt: usize,
        request: BoxFuture<'_, Result<T>>,
    ) -> Result<T> {
        match self.breaker.permit() {
            Ok(state) => tracing::trace!(operation, attempt, breaker_state = ?state, "provider permit acquired"),
            Err(CircuitOpen) => {
                self.metrics.record_rejected();
                tracing::warn!(operation, "provider circuit breaker open; rejecting request");
                return Err(ProviderError::CircuitOpen.into());
            }
        }

        let start = Instant::now();
        let bounded = timeout(self.options.request_timeout, request);
        let outcome = match run_or_cancel(bounded, &self.shutdown).await {
            WaitOutcome::Finished(outcome) => outcome,
            WaitOutcome::Cancelled => bail!("{operation} abandoned on shutdown"),
        };
        match outcome {
            Err(_) => {
                self.metrics.record_timeout(start.elapsed());
                self.breaker.record_failure();
                Err(ProviderError::Timeout { operation }.into())
            }
            Ok(Ok(value)) => {
                self.metrics.record_success(start.elapsed());
                self.breaker.record_success();
                Ok(value)
            }
            Ok(Err(err)) => {
                if matches!(
                    err.downcast_ref::<ProviderError>(),
                    Some(ProviderError::NotFound { .. })
                ) {
                    // The provider answered; the document just is not there yet.
                    self.metrics.record_success(start.elapsed());
                    self.breaker.record_success();
                } else {
                    self.metrics.record_failure(start.elapsed());
                    self.breaker.record_failure();
                }
                Err(err)
            }
        }
    }
}

impl DataProvider for GuardedProvider {
    fn fetch_schedule<'a>(&'a self, date: NaiveDate) -> BoxFuture<'a, Result<Vec<EventRef>>> {
        Box::pin(self.guarded("fetch_schedule", None, move || {
            self.inner.fetch_schedule(date)
        }))
    }

    fn fetch_snapshot<'a>(&'a self, event_id: EventId) -> BoxFuture<'a, Result<FetchedSnapshot>> {
        Box::pin(self.guarded("fetch_snapshot", Some(event_id), move || {
            self.inner.fetch_snapshot(event_id)
        }))
    }

    fn fetch_token_history<'a>(
        &'a self,
        event_id: EventId,
    ) -> BoxFuture<'a, Result<Vec<VersionToken>>> {
        Box::pin(self.guarded("fetch_token_history", Some(event_id), move || {
            self.inner.fetch_token_history(event_id)
        }))
    }

    fn fetch_diff<'a>(
        &'a self,
        event_id: EventId,
        from: &'a VersionToken,
        to: &'a VersionToken,
    ) -> BoxFuture<'a, Result<DiffResponse>> {
        Box::pin(self.guarded("fetch_diff", Some(event_id), move || {
            self.inner.fetch_diff(event_id, from, to)
        }))
    }
}
