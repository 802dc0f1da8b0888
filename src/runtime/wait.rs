use std::future::Future;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Outcome of a wait that a shutdown signal can cut short.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WaitOutcome<T> {
    Finished(T),
    Cancelled,
}

impl<T> WaitOutcome<T> {
    pub(crate) fn is_cancelled(&self) -> bool {
        matches!(self, WaitOutcome::Cancelled)
    }
}

/// Sleeps for `delay` unless `token` fires first.
pub(crate) async fn sleep_or_cancel(delay: Duration, token: &CancellationToken) -> WaitOutcome<()> {
    if token.is_cancelled() {
        return WaitOutcome::Cancelled;
    }
    if delay.is_zero() {
        yield_now().await;
        return WaitOutcome::Finished(());
    }

    tokio::select! {
        _ = token.cancelled() => WaitOutcome::Cancelled,
        _ = sleep(delay) => WaitOutcome::Finished(()),
    }
}

/// Drives `future` to completion unless `token` fires first.
pub(crate) async fn run_or_cancel<F: Future>(
    future: F,
    token: &CancellationToken,
) -> WaitOutcome<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => WaitOutcome::Cancelled,
        output = future => WaitOutcome::Finished(output),
    }
}
