//! Narrow interfaces to the two remote collaborators: the read-only data
//! provider that serves schedules and event documents, and the content API
//! the workers publish to.

use crate::model::{EventId, EventRef};
use crate::snapshot::{PatchOp, VersionToken};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier assigned by the content API to a published item.
pub type ContentId = String;

#[derive(Debug)]
pub enum ProviderError {
    Timeout { operation: &'static str },
    CircuitOpen,
    NotFound { event_id: EventId },
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Timeout { operation } => {
                write!(f, "provider operation {operation} timed out")
            }
            ProviderError::CircuitOpen => write!(f, "provider circuit breaker is open"),
            ProviderError::NotFound { event_id } => {
                write!(f, "provider has no document for event {event_id}")
            }
        }
    }
}

impl std::error::Error for ProviderError {}

/// Full document as served by the provider, tagged with its revision.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedSnapshot {
    pub document: Value,
    pub token: VersionToken,
}

/// Answer to a diff request. The provider returns the whole document when the
/// change set would be larger than the document itself.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffResponse {
    Patch(Vec<PatchOp>),
    Full(Value),
}

pub trait DataProvider: Send + Sync {
    fn fetch_schedule<'a>(&'a self, date: NaiveDate) -> BoxFuture<'a, Result<Vec<EventRef>>>;

    fn fetch_snapshot<'a>(&'a self, event_id: EventId) -> BoxFuture<'a, Result<FetchedSnapshot>>;

    /// Known revisions of the event document in ascending order.
    fn fetch_token_history<'a>(
        &'a self,
        event_id: EventId,
    ) -> BoxFuture<'a, Result<Vec<VersionToken>>>;

    fn fetch_diff<'a>(
        &'a self,
        event_id: EventId,
        from: &'a VersionToken,
        to: &'a VersionToken,
    ) -> BoxFuture<'a, Result<DiffResponse>>;
}

/// Content item as returned by a listing of the author's recent items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ContentId,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// Content-posting API. Every failure is recoverable; callers log and alert.
pub trait ContentApi: Send + Sync {
    fn publish<'a>(&'a self, title: &'a str, body: &'a str) -> BoxFuture<'a, Result<ContentId>>;

    fn edit<'a>(&'a self, content_id: &'a str, body: &'a str) -> BoxFuture<'a, Result<()>>;

    fn list<'a>(&'a self, author: &'a str) -> BoxFuture<'a, Result<Vec<ContentItem>>>;

    fn delete<'a>(&'a self, content_id: &'a str) -> BoxFuture<'a, Result<()>>;

    fn set_pinned<'a>(&'a self, content_id: &'a str, pinned: bool) -> BoxFuture<'a, Result<()>>;

    /// Publishes `body` as a reply under `parent`.
    fn reply<'a>(&'a self, parent: &'a str, body: &'a str) -> BoxFuture<'a, Result<ContentId>>;
}
