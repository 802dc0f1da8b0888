//! Exactly-once notifications for a content item's sub-event stream.
//!
//! Each pass loads the processing record, walks sub-events from the resume
//! point in index order, and persists the record once at the end. Actions are
//! recorded as processed whether or not their notification went out, so a
//! failed publish is alerted and never retried.

use crate::model::{EventId, TeamRole};
use crate::processor::classify::{ActingSide, NotificationRules};
use crate::provider::{ContentApi, Notification, NotificationKind, Renderer};
use crate::runtime::alerts::Alerter;
use crate::runtime::telemetry::Telemetry;
use crate::snapshot::{Occurrence, Snapshot};
use crate::store::ProgressStore;
use anyhow::{Context, Result};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub published: usize,
    pub failed: usize,
    /// Actions and finalizations recorded without a notification.
    pub ignored: usize,
    pub completed_sub_events: usize,
    pub resume_index: u32,
    pub saved: bool,
}

pub struct EventProcessor {
    store: ProgressStore,
    content: Arc<dyn ContentApi>,
    renderer: Arc<dyn Renderer>,
    alerts: Alerter,
    telemetry: Arc<Telemetry>,
    rules: NotificationRules,
}

impl EventProcessor {
    pub fn new(
        store: ProgressStore,
        content: Arc<dyn ContentApi>,
        renderer: Arc<dyn Renderer>,
        alerts: Alerter,
        telemetry: Arc<Telemetry>,
        rules: NotificationRules,
    ) -> Self {
        Self {
            store,
            content,
            renderer,
            alerts,
            telemetry,
            rules,
        }
    }

    /// Emits notifications for occurrences not yet recorded against
    /// `content_id`. Running it twice on the same snapshot publishes nothing
    /// the second time.
    pub async fn scan(
        &self,
        event_id: EventId,
        content_id: &str,
        snapshot: &Snapshot,
        role: TeamRole,
    ) -> Result<ScanReport> {
        let mut record = self
            .store
            .load_processing(event_id, content_id)
            .await
            .context("failed to load processing record")?;

        let resume = record.resume_index();
        let mut report = ScanReport::default();
        let mut dirty = false;

        for sub_event in snapshot.sub_events() {
            if sub_event.index < resume || record.is_complete(sub_event.index) {
                continue;
            }
            dirty |= record.observe(sub_event.index);
            let side = ActingSide::of(sub_event.half, role);

            for action in &sub_event.actions {
                if record.has_processed(sub_event.index, action.index) {
                    continue;
                }
                self.consider(
                    event_id,
                    content_id,
                    sub_event.index,
                    NotificationKind::Action {
                        index: action.index,
                    },
                    side,
                    &action.occurrence,
                    &mut report,
                )
                .await;
                record.record_action(sub_event.index, action.index);
                dirty = true;
            }

            if sub_event.complete {
                self.consider(
                    event_id,
                    content_id,
                    sub_event.index,
                    NotificationKind::Finalization,
                    side,
                    &sub_event.outcome,
                    &mut report,
                )
                .await;
                record.mark_complete(sub_event.index);
                report.completed_sub_events += 1;
                dirty = true;
            }
        }

        report.resume_index = record.resume_index();
        if dirty {
            self.store
                .save_processing(event_id, content_id, &record)
                .await
                .context("failed to save processing record")?;
            report.saved = true;
        }

        if report.published > 0 || report.failed > 0 {
            tracing::info!(
                event_id,
                content_id,
                published = report.published,
                failed = report.failed,
                resume_index = report.resume_index,
                "notification scan finished"
            );
        }
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn consider(
        &self,
        event_id: EventId,
        content_id: &str,
        sub_event: u32,
        kind: NotificationKind,
        side: ActingSide,
        occurrence: &Occurrence,
        report: &mut ScanReport,
    ) {
        if !self.rules.is_interesting(occurrence, side) {
            report.ignored += 1;
            return;
        }

        let notification = Notification {
            event_id,
            sub_event,
            kind,
            side,
            occurrence: occurrence.clone(),
        };

        match self.publish(content_id, &notification).await {
            Ok(reply_id) => {
                report.published += 1;
                self.telemetry.record_notification_published();
                tracing::debug!(event_id, sub_event, ?kind, reply_id = %reply_id, "notification published");
            }
            Err(err) => {
                report.failed += 1;
                self.telemetry.record_notification_failed();
                tracing::error!(event_id, sub_event, ?kind, error = %err, "notification failed");
                self.alerts.error(
                    format!("event {event_id}"),
                    format!("notification for sub-event {sub_event} ({kind:?}) failed: {err:#}"),
                );
            }
        }
    }

    async fn publish(&self, content_id: &str, notification: &Notification) -> Result<String> {
        let body = self
            .renderer
            .render_notification(notification)
            .context("render notification")?;
        self.content
            .reply(content_id, &body)
            .await
            .context("publish notification reply")
    }
}
