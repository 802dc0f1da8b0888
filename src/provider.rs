//! External collaborators: data provider and content API interfaces, the
//! renderer seam, and the guard that hardens provider calls.

pub(crate) mod backoff;
pub mod circuit_breaker;
pub mod client;
pub mod guard;
pub mod metrics;
pub mod render;

pub use circuit_breaker::{CircuitBreakerSnapshot, CircuitState, ProviderCircuitBreaker};
pub use client::{
    ContentApi, ContentId, ContentItem, DataProvider, DiffResponse, FetchedSnapshot, ProviderError,
};
pub use guard::{GuardOptions, GuardedProvider};
pub use metrics::ProviderMetricsSnapshot;
pub use render::{Notification, NotificationKind, RenderContext, RenderedContent, Renderer};
