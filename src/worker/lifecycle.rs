//! One content lifecycle for one event: wait for the trigger, publish or
//! adopt existing content, keep it current until the stop policy holds.
//!
//! Render and publish failures are alerted and absorbed; a render failure
//! before the first publish is retried on the waiting poll interval. Only
//! store failures that leave the worker unable to tell whether its content
//! already exists escape `run`; the supervisor treats those as a crash.

use crate::model::{ContentKind, Event, EventId, EventRef, EventStatus, WorkerKey};
use crate::provider::{ContentId, RenderContext, RenderedContent};
use crate::runtime::config::KindSettings;
use crate::runtime::wait::sleep_or_cancel;
use crate::snapshot::{RefreshPolicy, Snapshot};
use crate::supervisor::board::WorkerPhase;
use crate::worker::context::WorkerContext;
use crate::worker::trigger::Trigger;
use crate::worker::until::UpdateUntil;
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

enum Waited {
    Ready(Event),
    Skip,
    Cancelled,
}

enum PublishOutcome {
    Done(Published),
    Skipped,
    Cancelled,
}

enum Flow {
    Done,
    Cancelled,
}

struct Published {
    content_id: ContentId,
    /// Body as last sent, when known. Adopted content starts unknown.
    body: Option<String>,
}

pub struct LifecycleWorker {
    key: WorkerKey,
    date: NaiveDate,
    settings: KindSettings,
    ctx: Arc<WorkerContext>,
    shutdown: CancellationToken,
}

impl LifecycleWorker {
    pub fn new(
        key: WorkerKey,
        date: NaiveDate,
        ctx: Arc<WorkerContext>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let settings = ctx
            .config
            .kind(key.kind)
            .cloned()
            .with_context(|| format!("no settings for content kind {}", key.kind))?;
        Ok(Self {
            key,
            date,
            settings,
            ctx,
            shutdown,
        })
    }

    pub fn key(&self) -> WorkerKey {
        self.key
    }

    /// Runs the lifecycle to completion. Returns `Ok` both when the worker
    /// reached its terminal phase and when shutdown cut it short.
    #[tracing::instrument(
        name = "lifecycle",
        skip_all,
        fields(event_id = self.key.event_id, kind = %self.key.kind, date = %self.date)
    )]
    pub async fn run(self) -> Result<()> {
        let Some(mut event) = self.ctx.board.event(self.key.event_id) else {
            tracing::warn!("event is not on today's board; nothing to do");
            self.finish();
            return Ok(());
        };
        self.set_phase(WorkerPhase::Waiting);

        let published = match self.recorded_content().await? {
            Some(content_id) => {
                tracing::info!(%content_id, "adopting content posted by an earlier run");
                self.ctx.telemetry.record_content_adopted();
                Published {
                    content_id,
                    body: None,
                }
            }
            None => {
                match self.wait_for_trigger(event.clone()).await {
                    Waited::Ready(ready) => event = ready,
                    Waited::Skip => {
                        self.finish();
                        return Ok(());
                    }
                    Waited::Cancelled => return Ok(()),
                }

                self.set_phase(WorkerPhase::Publishing);
                match self.publish(&mut event).await? {
                    PublishOutcome::Done(published) => published,
                    PublishOutcome::Skipped => {
                        self.finish();
                        return Ok(());
                    }
                    PublishOutcome::Cancelled => return Ok(()),
                }
            }
        };

        self.ctx.board.record_content(self.key, &published.content_id);
        self.set_phase(WorkerPhase::Updating);

        match self.update_until_stop(event, published).await {
            Flow::Done => {
                self.finish();
                Ok(())
            }
            Flow::Cancelled => Ok(()),
        }
    }

    async fn recorded_content(&self) -> Result<Option<ContentId>> {
        let posted = self
            .ctx
            .store
            .posted(self.key.event_id, self.key.kind, self.date)
            .await
            .context("failed to look up posted content")?;
        Ok(posted.map(|posted| posted.content_id))
    }

    async fn wait_for_trigger(&self, mut event: Event) -> Waited {
        let trigger = Trigger::for_kind(
            self.key.kind,
            &event,
            &self.settings,
            self.date,
            self.ctx.config.utc_offset(),
        )
        .after(self.previous_event(&event));
        if let Some(previous) = trigger.depends_on() {
            tracing::debug!(previous, "earlier event ending also releases the wait");
        }
        match trigger.at() {
            Some(at) => tracing::info!(trigger_at = %at, "waiting for trigger time"),
            None => tracing::info!("waiting for the event to end"),
        }

        let poll = self.ctx.config.waiting_poll_interval();
        loop {
            let schedule = self.refresh(&mut event).await;

            if event.status.is_called_off()
                && (self.key.kind == ContentKind::PostEvent || self.settings.remove_if_cancelled)
            {
                tracing::info!(status = %event.status, "event called off; skipping content");
                return Waited::Skip;
            }

            let now = Utc::now();
            let entries = schedule.as_deref().map_or(&[][..], Vec::as_slice);
            if trigger.is_ready(&event, entries, now) {
                return Waited::Ready(event);
            }

            let delay = trigger.wait_for(now, poll);
            if sleep_or_cancel(delay, &self.shutdown).await.is_cancelled() {
                tracing::debug!("shutdown while waiting for trigger");
                return Waited::Cancelled;
            }
        }
    }

    /// The tracked event that starts right before this one on today's board.
    fn previous_event(&self, event: &Event) -> Option<EventId> {
        self.ctx
            .board
            .events()
            .into_iter()
            .take_while(|other| other.id != event.id)
            .filter(|other| other.start_time <= event.start_time)
            .last()
            .map(|other| other.id)
    }

    /// Publishes new content, or adopts a listed item with the same title.
    /// A render failure is retried every waiting poll interval.
    async fn publish(&self, event: &mut Event) -> Result<PublishOutcome> {
        let poll = self.ctx.config.waiting_poll_interval();
        let rendered = loop {
            let snapshot = self.snapshot(event).await;
            match self.render(event, snapshot.as_deref()) {
                Ok(rendered) => break rendered,
                Err(err) => {
                    tracing::error!(error = %format!("{err:#}"), "render failed; retrying");
                    self.ctx.alerts.error(
                        self.key,
                        format!("rendering content failed, retrying: {err:#}"),
                    );
                }
            }
            if sleep_or_cancel(poll, &self.shutdown).await.is_cancelled() {
                tracing::debug!("shutdown while retrying render");
                return Ok(PublishOutcome::Cancelled);
            }
        };

        if let Some(content_id) = self.listed_content(&rendered.title).await {
            tracing::info!(%content_id, "adopting listed content with matching title");
            self.ctx
                .store
                .record_posted(self.key.event_id, self.key.kind, self.date, &content_id)
                .await
                .context("failed to record adopted content")?;
            self.ctx.telemetry.record_content_adopted();
            self.pin(&content_id).await;
            return Ok(PublishOutcome::Done(Published {
                content_id,
                body: None,
            }));
        }

        let content_id = match self
            .ctx
            .content
            .publish(&rendered.title, &rendered.body)
            .await
        {
            Ok(content_id) => content_id,
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "publish failed; content skipped");
                self.ctx
                    .alerts
                    .error(self.key, format!("publishing content failed: {err:#}"));
                return Ok(PublishOutcome::Skipped);
            }
        };
        tracing::info!(%content_id, title = %rendered.title, "content published");
        self.ctx.telemetry.record_content_published();

        if let Err(err) = self
            .ctx
            .store
            .record_posted(self.key.event_id, self.key.kind, self.date, &content_id)
            .await
        {
            self.ctx.alerts.error(
                self.key,
                format!("content {content_id} published but not recorded: {err:#}"),
            );
        }

        self.pin(&content_id).await;
        Ok(PublishOutcome::Done(Published {
            content_id,
            body: Some(rendered.body),
        }))
    }

    async fn listed_content(&self, title: &str) -> Option<ContentId> {
        match self.ctx.content.list(self.ctx.config.author()).await {
            Ok(items) => items
                .into_iter()
                .filter(|item| item.title == title)
                .max_by_key(|item| item.created_at)
                .map(|item| item.id),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "listing recent content failed");
                None
            }
        }
    }

    async fn pin(&self, content_id: &str) {
        if !self.settings.pin {
            return;
        }
        if let Err(err) = self.ctx.content.set_pinned(content_id, true).await {
            self.ctx
                .alerts
                .warning(self.key, format!("pinning {content_id} failed: {err:#}"));
        }

        if self.key.kind != ContentKind::PostEvent {
            return;
        }
        let per_event = WorkerKey::new(self.key.event_id, ContentKind::PerEvent);
        let previous = match self.ctx.board.content_id(per_event) {
            Some(content_id) => Some(content_id),
            None => self
                .ctx
                .store
                .posted(self.key.event_id, ContentKind::PerEvent, self.date)
                .await
                .ok()
                .flatten()
                .map(|posted| posted.content_id),
        };
        if let Some(previous) = previous {
            if let Err(err) = self.ctx.content.set_pinned(&previous, false).await {
                self.ctx
                    .alerts
                    .warning(per_event, format!("unpinning {previous} failed: {err:#}"));
            }
        }
    }

    async fn update_until_stop(&self, mut event: Event, published: Published) -> Flow {
        let Published {
            content_id,
            mut body,
        } = published;
        let until = self.settings.update_until;

        loop {
            let schedule = self.refresh(&mut event).await;
            let snapshot = self.snapshot(&mut event).await;

            if event.status.is_called_off() && self.settings.remove_if_cancelled {
                self.remove(&content_id).await;
                return Flow::Done;
            }

            if self.settings.notifications {
                if let Some(snapshot) = &snapshot {
                    if let Err(err) = self
                        .ctx
                        .processor
                        .scan(event.id, &content_id, snapshot, event.role)
                        .await
                    {
                        tracing::error!(error = %format!("{err:#}"), "notification scan failed");
                        self.ctx
                            .alerts
                            .error(self.key, format!("notification scan failed: {err:#}"));
                    }
                }
            }

            if until != UpdateUntil::Never {
                self.refresh_content(&event, snapshot.as_deref(), &content_id, &mut body)
                    .await;
            }

            let stop = match schedule.as_deref() {
                Some(schedule) => until.satisfied(&event, schedule),
                None => matches!(until, UpdateUntil::Never | UpdateUntil::EventFinal)
                    && until.satisfied(&event, &[]),
            };
            if stop {
                tracing::info!(%until, status = %event.status, "update policy satisfied");
                return Flow::Done;
            }

            let interval = if event.status.is_live() {
                self.ctx.config.live_update_interval()
            } else {
                self.ctx.config.idle_update_interval()
            };
            if sleep_or_cancel(interval, &self.shutdown).await.is_cancelled() {
                tracing::debug!("shutdown while updating");
                return Flow::Cancelled;
            }
        }
    }

    async fn refresh_content(
        &self,
        event: &Event,
        snapshot: Option<&Snapshot>,
        content_id: &str,
        last_body: &mut Option<String>,
    ) {
        let rendered = match self.render(event, snapshot) {
            Ok(rendered) => rendered,
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "render failed");
                self.ctx
                    .alerts
                    .error(self.key, format!("re-rendering content failed: {err:#}"));
                return;
            }
        };
        if last_body.as_deref() == Some(rendered.body.as_str()) {
            return;
        }

        match self.ctx.content.edit(content_id, &rendered.body).await {
            Ok(()) => {
                tracing::debug!(content_id, "content edited");
                self.ctx.telemetry.record_content_edited();
                *last_body = Some(rendered.body);
                if let Err(err) = self
                    .ctx
                    .store
                    .touch_posted(self.key.event_id, self.key.kind, self.date)
                    .await
                {
                    tracing::warn!(error = %format!("{err:#}"), "failed to stamp edit time");
                }
            }
            Err(err) => {
                tracing::error!(content_id, error = %format!("{err:#}"), "edit failed");
                self.ctx
                    .alerts
                    .error(self.key, format!("editing {content_id} failed: {err:#}"));
            }
        }
    }

    async fn remove(&self, content_id: &str) {
        if let Err(err) = self.ctx.content.delete(content_id).await {
            self.ctx.alerts.error(
                self.key,
                format!("deleting {content_id} for called-off event failed: {err:#}"),
            );
            return;
        }
        tracing::info!(content_id, "content removed for called-off event");
        self.ctx.telemetry.record_content_deleted();
        self.ctx.board.forget_content(self.key);
        if let Err(err) = self
            .ctx
            .store
            .soft_delete_posted(self.key.event_id, self.key.kind, self.date)
            .await
        {
            self.ctx.alerts.error(
                self.key,
                format!("content {content_id} deleted but still recorded: {err:#}"),
            );
        }
    }

    /// Pulls the event's schedule entry and returns the whole schedule for
    /// stop-policy checks. Provider trouble is deferred to the next pass.
    async fn refresh(&self, event: &mut Event) -> Option<Arc<Vec<EventRef>>> {
        let schedule = match self
            .ctx
            .synchronizer
            .schedule(self.date, self.ctx.config.schedule_max_age())
            .await
        {
            Ok(schedule) => schedule,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "schedule refresh failed");
                return None;
            }
        };

        if let Some(entry) = schedule.iter().find(|entry| entry.id == event.id) {
            event.start_time = entry.start_time;
            event.status = entry.status;
            self.ctx.board.update_status(event.id, event.status);
        }
        Some(schedule)
    }

    async fn snapshot(&self, event: &mut Event) -> Option<Arc<Snapshot>> {
        if self.key.kind == ContentKind::DaySummary {
            return None;
        }

        let mut policy = RefreshPolicy::within(self.ctx.config.snapshot_max_age());
        if event.status.is_final() {
            policy = policy.full_if_final();
        }

        match self.ctx.synchronizer.get(event.id, policy).await {
            Ok(snapshot) => {
                let status = snapshot.status();
                if status != EventStatus::Unknown && status != event.status {
                    event.status = status;
                    self.ctx.board.update_status(event.id, status);
                }
                Some(snapshot)
            }
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "snapshot refresh failed");
                self.ctx.synchronizer.cached(event.id)
            }
        }
    }

    fn render(&self, event: &Event, snapshot: Option<&Snapshot>) -> Result<RenderedContent> {
        self.ctx.renderer.render(&RenderContext {
            kind: self.key.kind,
            date: self.date,
            event,
            snapshot,
        })
    }

    fn set_phase(&self, phase: WorkerPhase) {
        tracing::debug!(%phase, "worker phase");
        self.ctx.board.set_phase(self.key, phase);
    }

    fn finish(&self) {
        self.set_phase(WorkerPhase::Terminal);
        tracing::info!("worker reached terminal phase");
    }
}
