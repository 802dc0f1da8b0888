//! Running worker tasks keyed by (event, content kind).

use crate::model::WorkerKey;
use crate::runtime::telemetry::Telemetry;
use anyhow::Result;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub(crate) struct WorkerRegistry {
    telemetry: Arc<Telemetry>,
    handles: HashMap<WorkerKey, JoinHandle<()>>,
}

impl WorkerRegistry {
    pub(crate) fn new(telemetry: Arc<Telemetry>) -> Self {
        Self {
            telemetry,
            handles: HashMap::new(),
        }
    }

    /// Spawns `work` for `key`, replacing any finished task under the same
    /// key. Errors and panics are logged and counted; deciding whether to
    /// respawn is left to the liveness loop.
    pub(crate) fn spawn<F>(&mut self, key: WorkerKey, work: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let telemetry = self.telemetry.clone();
        let handle = tokio::spawn(async move {
            let result = AssertUnwindSafe(work).catch_unwind().await;

            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    telemetry.record_worker_crash();
                    tracing::error!(
                        worker = %key,
                        error = %format!("{err:#}"),
                        "worker exited with error"
                    );
                }
                Err(panic_payload) => {
                    telemetry.record_worker_crash();
                    let panic_msg = panic_message(panic_payload.as_ref());
                    tracing::error!(worker = %key, panic = %panic_msg, "worker panicked");
                }
            }
        });

        if let Some(previous) = self.handles.insert(key, handle) {
            if !previous.is_finished() {
                tracing::warn!(worker = %key, "replaced a worker that was still running");
                previous.abort();
            }
        }
    }

    pub(crate) fn is_alive(&self, key: WorkerKey) -> bool {
        self.handles
            .get(&key)
            .is_some_and(|handle| !handle.is_finished())
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// Waits for every task. Callers cancel the workers' token first.
    pub(crate) async fn join_all(&mut self) {
        for (key, handle) in self.handles.drain() {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    tracing::warn!(worker = %key, error = %err, "worker task failed to join");
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
