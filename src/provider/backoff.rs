use crate::runtime::wait::{sleep_or_cancel, WaitOutcome};
use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
pub(crate) struct RetryBackoff<'a> {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<usize>,
    pub cancellation: Option<&'a CancellationToken>,
}

impl<'a> RetryBackoff<'a> {
    pub(crate) fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts: None,
            cancellation: None,
        }
    }

    pub(crate) fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    pub(crate) fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Delay before attempt `attempt + 1`, doubling from `initial_delay`.
    pub(crate) fn delay_after(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as u32;
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

pub(crate) enum RetryDisposition {
    Retry,
    Abort,
}

/// Runs `operation` until it succeeds, `classify_error` aborts, attempts run
/// out, or the cancellation token fires during a backoff sleep.
pub(crate) async fn retry_with_backoff<'a, T, F, Fut, L, C>(
    config: RetryBackoff<'a>,
    mut operation: F,
    mut on_retry: L,
    mut classify_error: C,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
    L: FnMut(usize, Duration, &anyhow::Error, bool),
    C: FnMut(usize, &anyhow::Error) -> RetryDisposition,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        if config.cancellation.is_some_and(CancellationToken::is_cancelled) {
            return Err(anyhow!("retry cancelled"));
        }

        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if let RetryDisposition::Abort = classify_error(attempt, &err) {
            return Err(err);
        }

        let exhausted = config.max_attempts.is_some_and(|max| attempt >= max);
        let delay = config.delay_after(attempt);
        on_retry(attempt, delay, &err, !exhausted);
        if exhausted {
            return Err(err);
        }

        match config.cancellation {
            Some(token) => {
                if let WaitOutcome::Cancelled = sleep_or_cancel(delay, token).await {
                    return Err(err.context("retry cancelled"));
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}
