pub mod model;
pub mod processor;
pub mod provider;
pub mod runtime;
pub mod snapshot;
pub mod store;
pub mod supervisor;
pub mod worker;

pub use model::{ContentKind, Event, EventId, EventRef, EventStatus, TeamRole, WorkerKey};
pub use processor::{ActingSide, EventProcessor, NotificationRules, ScanReport};
pub use provider::{
    CircuitBreakerSnapshot, CircuitState, ContentApi, ContentId, ContentItem, DataProvider,
    DiffResponse, FetchedSnapshot, GuardOptions, GuardedProvider, Notification, NotificationKind,
    ProviderCircuitBreaker, ProviderError, RenderContext, RenderedContent, Renderer,
};
pub use runtime::alerts::{Alert, AlertSeverity, AlertSink, Alerter, LogAlertSink};
pub use runtime::config::{CoreConfig, CoreConfigBuilder, CoreConfigParams, KindSettings};
pub use runtime::fatal::FatalErrorHandler;
pub use runtime::runner::{Collaborators, Runner};
pub use runtime::settings::Settings;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use snapshot::{
    apply_patch, PatchError, PatchOp, PatchOpKind, RefreshPolicy, Snapshot, Synchronizer,
    VersionToken,
};
pub use store::{ProgressStore, ProcessingRecord, QueryExecutor, QueryOutcome, SqliteExecutor};
pub use supervisor::{DayOutcome, EventBoard, StatusSummary, Supervisor, WorkerPhase};
pub use worker::{LifecycleWorker, UpdateUntil, WorkerContext, WorkerContextParams};
