use crate::model::ContentKind;
use crate::processor::NotificationRules;
use crate::provider::GuardOptions;
use crate::runtime::settings::Settings;
use crate::runtime::telemetry;
use crate::worker::until::UpdateUntil;
use anyhow::{bail, Context, Result};
use chrono::{FixedOffset, NaiveTime};
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_LIVE_UPDATE_SECS: u64 = 30;
const DEFAULT_IDLE_UPDATE_SECS: u64 = 300;
const DEFAULT_WAITING_POLL_SECS: u64 = 60;
const DEFAULT_LIVENESS_SECS: u64 = 30;
const DEFAULT_SNAPSHOT_MAX_AGE_SECS: u64 = 10;
const DEFAULT_SCHEDULE_MAX_AGE_SECS: u64 = 300;
const DEFAULT_ROLLOVER_HOUR: u32 = 4;
const DEFAULT_PER_EVENT_MINUTES_BEFORE: u32 = 180;
const MAX_UTC_OFFSET_MINUTES: i32 = 18 * 60;

const CORE: &str = "core";
const INTERVALS: &str = "intervals";
const PROVIDER: &str = "provider";
const NOTIFICATIONS: &str = "notifications";

/// Per content-kind behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindSettings {
    pub enabled: bool,
    /// Publish this many minutes before the event starts.
    pub minutes_before: u32,
    /// Latest local time of day at which the content must be up.
    pub post_by: Option<NaiveTime>,
    pub update_until: UpdateUntil,
    pub pin: bool,
    /// Reply with play notifications under this content.
    pub notifications: bool,
    /// Delete the content when the event is postponed or cancelled.
    pub remove_if_cancelled: bool,
}

impl KindSettings {
    pub fn defaults_for(kind: ContentKind) -> Self {
        match kind {
            ContentKind::DaySummary => Self {
                enabled: false,
                minutes_before: 0,
                post_by: NaiveTime::from_hms_opt(5, 0, 0),
                update_until: UpdateUntil::DayFinal,
                pin: false,
                notifications: false,
                remove_if_cancelled: false,
            },
            ContentKind::PerEvent => Self {
                enabled: true,
                minutes_before: DEFAULT_PER_EVENT_MINUTES_BEFORE,
                post_by: None,
                update_until: UpdateUntil::EventFinal,
                pin: true,
                notifications: true,
                remove_if_cancelled: true,
            },
            ContentKind::PostEvent => Self {
                enabled: true,
                minutes_before: 0,
                post_by: None,
                update_until: UpdateUntil::Never,
                pin: true,
                notifications: false,
                remove_if_cancelled: false,
            },
        }
    }

    pub fn disabled(kind: ContentKind) -> Self {
        Self {
            enabled: false,
            ..Self::defaults_for(kind)
        }
    }
}

/// Validated runtime configuration for the supervisory core.
///
/// Construct through [`CoreConfig::builder`] or [`CoreConfig::from_settings`]
/// so invariants hold before any worker observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    team_id: u32,
    author: String,
    utc_offset: FixedOffset,
    kinds: BTreeMap<ContentKind, KindSettings>,
    rules: NotificationRules,
    live_update_interval: Duration,
    idle_update_interval: Duration,
    waiting_poll_interval: Duration,
    liveness_interval: Duration,
    status_interval: Duration,
    snapshot_max_age: Duration,
    schedule_max_age: Duration,
    rollover_hour: u32,
    provider: GuardOptions,
}

pub struct CoreConfigParams {
    pub team_id: u32,
    pub author: String,
    pub utc_offset_minutes: i32,
    pub kinds: BTreeMap<ContentKind, KindSettings>,
    pub rules: NotificationRules,
    pub live_update_interval: Duration,
    pub idle_update_interval: Duration,
    pub waiting_poll_interval: Duration,
    pub liveness_interval: Duration,
    pub status_interval: Duration,
    pub snapshot_max_age: Duration,
    pub schedule_max_age: Duration,
    pub rollover_hour: u32,
    pub provider: GuardOptions,
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    pub fn new(params: CoreConfigParams) -> Result<Self> {
        let CoreConfigParams {
            team_id,
            author,
            utc_offset_minutes,
            kinds,
            rules,
            live_update_interval,
            idle_update_interval,
            waiting_poll_interval,
            liveness_interval,
            status_interval,
            snapshot_max_age,
            schedule_max_age,
            rollover_hour,
            provider,
        } = params;

        if utc_offset_minutes.abs() > MAX_UTC_OFFSET_MINUTES {
            bail!("utc_offset_minutes must be within +/-{MAX_UTC_OFFSET_MINUTES}");
        }
        let utc_offset = FixedOffset::east_opt(utc_offset_minutes * 60)
            .context("utc_offset_minutes is out of range")?;

        let config = Self {
            team_id,
            author: author.trim().to_owned(),
            utc_offset,
            kinds,
            rules,
            live_update_interval,
            idle_update_interval,
            waiting_poll_interval,
            liveness_interval,
            status_interval,
            snapshot_max_age,
            schedule_max_age,
            rollover_hour,
            provider,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reads the opaque settings object. Missing keys take defaults; kinds
    /// without a category of their own stay at their defaults.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut builder = Self::builder();

        if let Some(team_id) = settings.get_u64(CORE, "team_id")? {
            builder = builder.team_id(u32::try_from(team_id).context("core.team_id is too large")?);
        }
        if let Some(author) = settings.get_str(CORE, "author")? {
            builder = builder.author(author);
        }
        if let Some(offset) = settings.get_i64(CORE, "utc_offset_minutes")? {
            builder = builder.utc_offset_minutes(
                i32::try_from(offset).context("core.utc_offset_minutes is out of range")?,
            );
        }
        if let Some(hour) = settings.get_u64(CORE, "rollover_hour")? {
            builder = builder.rollover_hour(u32::try_from(hour).unwrap_or(u32::MAX));
        }

        for kind in ContentKind::ALL {
            builder = builder.kind(kind, kind_from_settings(settings, kind)?);
        }

        let defaults = NotificationRules::default();
        builder = builder.rules(NotificationRules {
            batting: settings
                .get_list(NOTIFICATIONS, "batting")?
                .unwrap_or(defaults.batting),
            pitching: settings
                .get_list(NOTIFICATIONS, "pitching")?
                .unwrap_or(defaults.pitching),
            scoring_fallback: settings
                .get_bool(NOTIFICATIONS, "scoring_fallback")?
                .unwrap_or(true),
        });

        let seconds = |key: &str| -> Result<Option<Duration>> {
            Ok(settings.get_u64(INTERVALS, key)?.map(Duration::from_secs))
        };
        if let Some(value) = seconds("live_update_secs")? {
            builder = builder.live_update_interval(value);
        }
        if let Some(value) = seconds("idle_update_secs")? {
            builder = builder.idle_update_interval(value);
        }
        if let Some(value) = seconds("waiting_poll_secs")? {
            builder = builder.waiting_poll_interval(value);
        }
        if let Some(value) = seconds("liveness_secs")? {
            builder = builder.liveness_interval(value);
        }
        if let Some(value) = seconds("status_secs")? {
            builder = builder.status_interval(value);
        }
        if let Some(value) = seconds("snapshot_max_age_secs")? {
            builder = builder.snapshot_max_age(value);
        }
        if let Some(value) = seconds("schedule_max_age_secs")? {
            builder = builder.schedule_max_age(value);
        }

        let mut provider = GuardOptions::default();
        if let Some(secs) = settings.get_u64(PROVIDER, "timeout_secs")? {
            provider.request_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = settings.get_u64(PROVIDER, "max_attempts")? {
            provider.max_attempts = usize::try_from(attempts).unwrap_or(usize::MAX);
        }
        builder = builder.provider(provider);

        builder.build()
    }

    pub fn team_id(&self) -> u32 {
        self.team_id
    }

    /// Account the content API publishes as; used to list prior content.
    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    pub fn kind(&self, kind: ContentKind) -> Option<&KindSettings> {
        self.kinds.get(&kind)
    }

    pub fn enabled_kinds(&self) -> impl Iterator<Item = ContentKind> + '_ {
        self.kinds
            .iter()
            .filter(|(_, settings)| settings.enabled)
            .map(|(kind, _)| *kind)
    }

    pub fn rules(&self) -> &NotificationRules {
        &self.rules
    }

    /// Sleep between updates while the event is live.
    pub fn live_update_interval(&self) -> Duration {
        self.live_update_interval
    }

    pub fn idle_update_interval(&self) -> Duration {
        self.idle_update_interval
    }

    /// Upper bound on a single sleep while waiting for a trigger.
    pub fn waiting_poll_interval(&self) -> Duration {
        self.waiting_poll_interval
    }

    pub fn liveness_interval(&self) -> Duration {
        self.liveness_interval
    }

    pub fn status_interval(&self) -> Duration {
        self.status_interval
    }

    pub fn snapshot_max_age(&self) -> Duration {
        self.snapshot_max_age
    }

    pub fn schedule_max_age(&self) -> Duration {
        self.schedule_max_age
    }

    /// Local hour at which a new posting day begins.
    pub fn rollover_hour(&self) -> u32 {
        self.rollover_hour
    }

    pub fn provider(&self) -> &GuardOptions {
        &self.provider
    }

    pub fn validate(&self) -> Result<()> {
        if self.team_id == 0 {
            bail!("team_id must be set");
        }
        if self.author.is_empty() {
            bail!("author cannot be empty");
        }
        if self.enabled_kinds().next().is_none() {
            bail!("at least one content kind must be enabled");
        }
        for (kind, settings) in &self.kinds {
            if settings.enabled && settings.minutes_before > 24 * 60 {
                bail!("{kind}.minutes_before must be at most one day");
            }
        }

        for (name, value) in [
            ("live_update_interval", self.live_update_interval),
            ("idle_update_interval", self.idle_update_interval),
            ("waiting_poll_interval", self.waiting_poll_interval),
            ("liveness_interval", self.liveness_interval),
            ("status_interval", self.status_interval),
        ] {
            if value.is_zero() {
                bail!("{name} must be greater than 0");
            }
        }

        if self.rollover_hour > 23 {
            bail!("rollover_hour must be between 0 and 23");
        }

        self.provider.validate().context("invalid provider options")?;
        Ok(())
    }
}

fn kind_from_settings(settings: &Settings, kind: ContentKind) -> Result<KindSettings> {
    let category = kind.as_str();
    let mut resolved = if settings.has_category(category) {
        KindSettings::defaults_for(kind)
    } else {
        return Ok(KindSettings::defaults_for(kind));
    };

    if let Some(enabled) = settings.get_bool(category, "enabled")? {
        resolved.enabled = enabled;
    }
    if let Some(minutes) = settings.get_u64(category, "minutes_before")? {
        resolved.minutes_before = u32::try_from(minutes).unwrap_or(u32::MAX);
    }
    if let Some(raw) = settings.get_str(category, "post_by")? {
        let time = NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .with_context(|| format!("{category}.post_by must be HH:MM, found `{raw}`"))?;
        resolved.post_by = Some(time);
    }
    if let Some(raw) = settings.get_str(category, "update_until")? {
        resolved.update_until = raw
            .parse()
            .with_context(|| format!("invalid {category}.update_until"))?;
    }
    if let Some(pin) = settings.get_bool(category, "pin")? {
        resolved.pin = pin;
    }
    if let Some(notifications) = settings.get_bool(category, "notifications")? {
        resolved.notifications = notifications;
    }
    if let Some(remove) = settings.get_bool(category, "remove_if_cancelled")? {
        resolved.remove_if_cancelled = remove;
    }
    Ok(resolved)
}

#[derive(Debug, Default, Clone)]
pub struct CoreConfigBuilder {
    team_id: Option<u32>,
    author: Option<String>,
    utc_offset_minutes: Option<i32>,
    kinds: BTreeMap<ContentKind, KindSettings>,
    rules: Option<NotificationRules>,
    live_update_interval: Option<Duration>,
    idle_update_interval: Option<Duration>,
    waiting_poll_interval: Option<Duration>,
    liveness_interval: Option<Duration>,
    status_interval: Option<Duration>,
    snapshot_max_age: Option<Duration>,
    schedule_max_age: Option<Duration>,
    rollover_hour: Option<u32>,
    provider: Option<GuardOptions>,
}

impl CoreConfigBuilder {
    pub fn team_id(mut self, team_id: u32) -> Self {
        self.team_id = Some(team_id);
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = Some(minutes);
        self
    }

    /// Overrides the settings of one kind. Kinds never mentioned keep their
    /// defaults.
    pub fn kind(mut self, kind: ContentKind, settings: KindSettings) -> Self {
        self.kinds.insert(kind, settings);
        self
    }

    pub fn rules(mut self, rules: NotificationRules) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn live_update_interval(mut self, interval: Duration) -> Self {
        self.live_update_interval = Some(interval);
        self
    }

    pub fn idle_update_interval(mut self, interval: Duration) -> Self {
        self.idle_update_interval = Some(interval);
        self
    }

    pub fn waiting_poll_interval(mut self, interval: Duration) -> Self {
        self.waiting_poll_interval = Some(interval);
        self
    }

    pub fn liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = Some(interval);
        self
    }

    pub fn status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = Some(interval);
        self
    }

    pub fn snapshot_max_age(mut self, max_age: Duration) -> Self {
        self.snapshot_max_age = Some(max_age);
        self
    }

    pub fn schedule_max_age(mut self, max_age: Duration) -> Self {
        self.schedule_max_age = Some(max_age);
        self
    }

    pub fn rollover_hour(mut self, hour: u32) -> Self {
        self.rollover_hour = Some(hour);
        self
    }

    pub fn provider(mut self, options: GuardOptions) -> Self {
        self.provider = Some(options);
        self
    }

    pub fn build(self) -> Result<CoreConfig> {
        let mut kinds = self.kinds;
        for kind in ContentKind::ALL {
            kinds
                .entry(kind)
                .or_insert_with(|| KindSettings::defaults_for(kind));
        }

        let params = CoreConfigParams {
            team_id: self.team_id.context("team_id is required")?,
            author: self.author.context("author is required")?,
            utc_offset_minutes: self.utc_offset_minutes.unwrap_or(0),
            kinds,
            rules: self.rules.unwrap_or_default(),
            live_update_interval: self
                .live_update_interval
                .unwrap_or(Duration::from_secs(DEFAULT_LIVE_UPDATE_SECS)),
            idle_update_interval: self
                .idle_update_interval
                .unwrap_or(Duration::from_secs(DEFAULT_IDLE_UPDATE_SECS)),
            waiting_poll_interval: self
                .waiting_poll_interval
                .unwrap_or(Duration::from_secs(DEFAULT_WAITING_POLL_SECS)),
            liveness_interval: self
                .liveness_interval
                .unwrap_or(Duration::from_secs(DEFAULT_LIVENESS_SECS)),
            status_interval: self
                .status_interval
                .unwrap_or(telemetry::DEFAULT_STATUS_INTERVAL),
            snapshot_max_age: self
                .snapshot_max_age
                .unwrap_or(Duration::from_secs(DEFAULT_SNAPSHOT_MAX_AGE_SECS)),
            schedule_max_age: self
                .schedule_max_age
                .unwrap_or(Duration::from_secs(DEFAULT_SCHEDULE_MAX_AGE_SECS)),
            rollover_hour: self.rollover_hour.unwrap_or(DEFAULT_ROLLOVER_HOUR),
            provider: self.provider.unwrap_or_default(),
        };

        CoreConfig::new(params)
    }
}
