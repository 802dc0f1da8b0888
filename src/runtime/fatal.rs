use anyhow::Error as AnyError;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Records the first unrecoverable error and tears the process down.
///
/// Only conditions that break the core's guarantees go through here (an
/// unusable progress store, for instance). Worker crashes are handled by the
/// supervisor's respawn loop instead.
#[derive(Clone)]
pub struct FatalErrorHandler {
    shared: Arc<Shared>,
}

struct Shared {
    first: OnceLock<SharedError>,
    root_shutdown: CancellationToken,
    run_shutdown: CancellationToken,
    raised: Notify,
}

/// `anyhow::Error` is not `Clone`; the runner and any waiter each get a
/// handle onto the same captured error.
#[derive(Clone)]
struct SharedError(Arc<AnyError>);

impl fmt::Debug for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.0.as_ref(), f)
    }
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0.as_ref())
    }
}

impl std::error::Error for SharedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl FatalErrorHandler {
    pub fn new(root_shutdown: CancellationToken, run_shutdown: CancellationToken) -> Self {
        Self {
            shared: Arc::new(Shared {
                first: OnceLock::new(),
                root_shutdown,
                run_shutdown,
                raised: Notify::new(),
            }),
        }
    }

    /// Captures `error` if it is the first one and cancels both tokens.
    /// Later calls only hand the error back.
    pub fn trigger(&self, context: &str, error: AnyError) -> AnyError {
        if self.is_triggered() {
            return error;
        }

        let captured = SharedError(Arc::new(error.context(context.to_owned())));
        if self.shared.first.set(captured.clone()).is_err() {
            // Lost a race with another caller; theirs is the one kept.
            return captured.into();
        }

        tracing::error!(context, error = %captured, "fatal error; initiating shutdown");
        self.shared.run_shutdown.cancel();
        self.shared.root_shutdown.cancel();
        self.shared.raised.notify_waiters();
        captured.into()
    }

    pub fn is_triggered(&self) -> bool {
        self.shared.first.get().is_some()
    }

    /// Resolves once a fatal error has been captured.
    pub async fn wait(&self) {
        let raised = self.shared.raised.notified();
        if self.is_triggered() {
            return;
        }
        raised.await;
    }

    pub fn error(&self) -> Option<AnyError> {
        self.shared.first.get().cloned().map(AnyError::from)
    }
}
