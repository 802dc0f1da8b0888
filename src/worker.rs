//! Per (event, content kind) lifecycle workers.

pub mod context;
pub mod lifecycle;
pub mod trigger;
pub mod until;

pub use context::{WorkerContext, WorkerContextParams};
pub use lifecycle::LifecycleWorker;
pub use trigger::Trigger;
pub use until::UpdateUntil;
