use crate::model::{ContentKind, Event, EventId, EventRef};
use crate::runtime::config::KindSettings;
use chrono::{DateTime, Duration as TimeDelta, FixedOffset, NaiveDate, TimeZone, Utc};
use std::time::Duration;

/// When a waiting worker may move on to publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    at: Option<DateTime<Utc>>,
    on_final: bool,
    /// Earlier event of the day whose end also releases the wait.
    depends_on: Option<EventId>,
}

impl Trigger {
    /// Post-event content waits for the event to end. Every other kind fires
    /// at the earliest of the start time, the post-by time on the posting
    /// date, and `minutes_before` the start.
    pub fn for_kind(
        kind: ContentKind,
        event: &Event,
        settings: &KindSettings,
        date: NaiveDate,
        offset: FixedOffset,
    ) -> Self {
        if kind == ContentKind::PostEvent {
            return Self {
                at: None,
                on_final: true,
                depends_on: None,
            };
        }

        let lead = event.start_time - TimeDelta::minutes(i64::from(settings.minutes_before));
        let post_by = settings
            .post_by
            .and_then(|time| offset.from_local_datetime(&date.and_time(time)).single())
            .map(|local| local.with_timezone(&Utc));

        let at = [Some(event.start_time), Some(lead), post_by]
            .into_iter()
            .flatten()
            .min();

        Self {
            at,
            on_final: false,
            depends_on: None,
        }
    }

    /// Also release once `previous` reaches a final status. Post-event
    /// triggers already wait on their own event and ignore this.
    pub fn after(mut self, previous: Option<EventId>) -> Self {
        if !self.on_final {
            self.depends_on = previous;
        }
        self
    }

    pub fn at(&self) -> Option<DateTime<Utc>> {
        self.at
    }

    pub fn depends_on(&self) -> Option<EventId> {
        self.depends_on
    }

    /// A live or finished event releases the wait early, as does the end of
    /// the event this one follows.
    pub fn is_ready(&self, event: &Event, schedule: &[EventRef], now: DateTime<Utc>) -> bool {
        if self.on_final {
            return event.status.is_final();
        }
        event.status.is_live()
            || event.status.is_final()
            || self.dependency_finished(schedule)
            || self.at.map_or(true, |at| now >= at)
    }

    fn dependency_finished(&self, schedule: &[EventRef]) -> bool {
        self.depends_on.is_some_and(|previous| {
            schedule
                .iter()
                .any(|entry| entry.id == previous && entry.status.is_final())
        })
    }

    /// How long to sleep before checking again, never longer than `poll`.
    pub fn wait_for(&self, now: DateTime<Utc>, poll: Duration) -> Duration {
        match self.at {
            Some(at) if at > now => (at - now).to_std().map_or(poll, |left| left.min(poll)),
            Some(_) => Duration::ZERO,
            None => poll,
        }
    }
}
