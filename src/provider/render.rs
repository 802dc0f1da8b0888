//! Text rendering is owned by the embedding application; the core only needs
//! a title and a body per content item and a body per notification.

use crate::model::{ContentKind, Event};
use crate::processor::ActingSide;
use crate::snapshot::{Occurrence, Snapshot};
use anyhow::Result;
use chrono::NaiveDate;

pub struct RenderContext<'a> {
    pub kind: ContentKind,
    pub date: NaiveDate,
    pub event: &'a Event,
    /// Latest document, when one could be obtained for this cycle.
    pub snapshot: Option<&'a Snapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContent {
    pub title: String,
    pub body: String,
}

/// Whether a notification reports an action inside a sub-event or the
/// sub-event's final outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Action { index: u32 },
    Finalization,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub event_id: u64,
    pub sub_event: u32,
    pub kind: NotificationKind,
    pub side: ActingSide,
    pub occurrence: Occurrence,
}

pub trait Renderer: Send + Sync {
    fn render(&self, context: &RenderContext<'_>) -> Result<RenderedContent>;

    fn render_notification(&self, notification: &Notification) -> Result<String>;
}
