//! Application-level configuration loading: timezone, daily timetable, deadline windows,
//! delivery pacing and narrative settings.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use thiserror::Error;
use time::{
    OffsetDateTime, Time, UtcOffset, Weekday,
    format_description::FormatItem,
    macros::{format_description, offset, time},
};
use tracing::{info, warn};

use crate::state::state_machine::RoundPhase;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "GOLARE_BACK_CONFIG_PATH";

const OFFSET_FORMAT: &[FormatItem<'static>] =
    format_description!("[offset_hour sign:mandatory]:[offset_minute]");
const TRIGGER_FORMAT: &[FormatItem<'static>] = format_description!("[hour]:[minute]");

/// Reasons a configuration file is rejected.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid JSON")]
    Json(#[from] serde_json::Error),
    #[error("invalid timezone offset `{0}`")]
    Offset(String),
    #[error("invalid time `{value}` for trigger `{trigger}`")]
    TriggerTime { trigger: &'static str, value: String },
}

/// Named entry points of the daily timetable, in their default order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduledAction {
    MissionPost,
    NominationOpen,
    NominationReminder,
    NominationDeadline,
    VotingDeadline,
    ExecutionReminder,
    ExecutionDeadline,
    WrapUp,
}

impl ScheduledAction {
    pub const ALL: [ScheduledAction; 8] = [
        ScheduledAction::MissionPost,
        ScheduledAction::NominationOpen,
        ScheduledAction::NominationReminder,
        ScheduledAction::NominationDeadline,
        ScheduledAction::VotingDeadline,
        ScheduledAction::ExecutionReminder,
        ScheduledAction::ExecutionDeadline,
        ScheduledAction::WrapUp,
    ];

    /// Key used in the configuration file.
    pub fn key(self) -> &'static str {
        match self {
            ScheduledAction::MissionPost => "mission_post",
            ScheduledAction::NominationOpen => "nomination_open",
            ScheduledAction::NominationReminder => "nomination_reminder",
            ScheduledAction::NominationDeadline => "nomination_deadline",
            ScheduledAction::VotingDeadline => "voting_deadline",
            ScheduledAction::ExecutionReminder => "execution_reminder",
            ScheduledAction::ExecutionDeadline => "execution_deadline",
            ScheduledAction::WrapUp => "wrap_up",
        }
    }

    /// Phase a healthy round is in once this trigger has run.
    pub fn expected_phase(self) -> RoundPhase {
        match self {
            ScheduledAction::MissionPost => RoundPhase::MissionPosted,
            ScheduledAction::NominationOpen | ScheduledAction::NominationReminder => {
                RoundPhase::Nomination
            }
            ScheduledAction::NominationDeadline => RoundPhase::Voting,
            ScheduledAction::VotingDeadline | ScheduledAction::ExecutionReminder => {
                RoundPhase::Execution
            }
            ScheduledAction::ExecutionDeadline | ScheduledAction::WrapUp => RoundPhase::Reveal,
        }
    }

    fn default_time(self) -> Time {
        match self {
            ScheduledAction::MissionPost => time!(09:00),
            ScheduledAction::NominationOpen => time!(10:00),
            ScheduledAction::NominationReminder => time!(12:00),
            ScheduledAction::NominationDeadline => time!(14:00),
            ScheduledAction::VotingDeadline => time!(15:00),
            ScheduledAction::ExecutionReminder => time!(17:00),
            ScheduledAction::ExecutionDeadline => time!(18:00),
            ScheduledAction::WrapUp => time!(20:00),
        }
    }
}

/// Daily trigger times, sorted by time of day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timetable {
    entries: Vec<(ScheduledAction, Time)>,
}

impl Timetable {
    fn new(mut entries: Vec<(ScheduledAction, Time)>) -> Self {
        entries.sort_by_key(|(_, at)| *at);
        Self { entries }
    }

    pub fn entries(&self) -> &[(ScheduledAction, Time)] {
        &self.entries
    }

    pub fn time_of(&self, action: ScheduledAction) -> Time {
        self.entries
            .iter()
            .find(|(candidate, _)| *candidate == action)
            .map(|(_, at)| *at)
            .unwrap_or_else(|| action.default_time())
    }

    /// Earliest trigger of the day.
    pub fn first(&self) -> Option<(ScheduledAction, Time)> {
        self.entries.first().copied()
    }

    /// Latest trigger whose time is at or before `at`.
    pub fn latest_at_or_before(&self, at: Time) -> Option<ScheduledAction> {
        self.entries
            .iter()
            .rev()
            .find(|(_, trigger)| *trigger <= at)
            .map(|(action, _)| *action)
    }

    /// Trigger that ends `phase` when the day runs on schedule.
    pub fn deadline_trigger(phase: RoundPhase) -> Option<ScheduledAction> {
        match phase {
            RoundPhase::MissionPosted => Some(ScheduledAction::NominationOpen),
            RoundPhase::Nomination => Some(ScheduledAction::NominationDeadline),
            RoundPhase::Voting => Some(ScheduledAction::VotingDeadline),
            RoundPhase::Execution => Some(ScheduledAction::ExecutionDeadline),
            RoundPhase::Reveal => None,
        }
    }
}

impl Default for Timetable {
    fn default() -> Self {
        Self::new(
            ScheduledAction::ALL
                .iter()
                .map(|action| (*action, action.default_time()))
                .collect(),
        )
    }
}

/// Relative windows used when the scheduled trigger is too close or already passed.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeadlineConfig {
    /// Shortest window a phase may get from a scheduled trigger.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "min_window_secs")]
    pub min_window: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "open_nomination_secs")]
    pub open_nomination: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "nomination_secs")]
    pub nomination: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "voting_secs")]
    pub voting: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "execution_secs")]
    pub execution: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "final_guess_secs")]
    pub final_guess: Duration,
}

impl DeadlineConfig {
    /// Relative window for `phase`.
    pub fn window(&self, phase: RoundPhase) -> Option<Duration> {
        match phase {
            RoundPhase::MissionPosted => Some(self.open_nomination),
            RoundPhase::Nomination => Some(self.nomination),
            RoundPhase::Voting => Some(self.voting),
            RoundPhase::Execution => Some(self.execution),
            RoundPhase::Reveal => None,
        }
    }
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            min_window: Duration::from_secs(15 * 60),
            open_nomination: Duration::from_secs(30 * 60),
            nomination: Duration::from_secs(2 * 60 * 60),
            voting: Duration::from_secs(60 * 60),
            execution: Duration::from_secs(2 * 60 * 60),
            final_guess: Duration::from_secs(60 * 60),
        }
    }
}

/// Outbound message pacing.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Minimum gap between two operations on the same destination.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "min_interval_ms")]
    pub min_interval: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(1_100),
        }
    }
}

/// Text-generation service settings. The API key comes from `NARRATIVE_API_KEY`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    /// Chat-completions endpoint; `None` disables generated narrative.
    pub endpoint: Option<String>,
    pub model: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "timeout_secs")]
    pub timeout: Duration,
    /// Hard cap applied by the sanitizer.
    pub max_chars: usize,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: "gpt-4o-mini".into(),
            timeout: Duration::from_secs(8),
            max_chars: 900,
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    pub timezone: UtcOffset,
    pub timetable: Timetable,
    pub deadlines: DeadlineConfig,
    pub delivery: DeliveryConfig,
    /// Pause between two messages of the final reveal sequence.
    pub reveal_pacing: Duration,
    pub narrative: NarrativeConfig,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        timezone = %app_config.timezone,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; absent sections keep their defaults.
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        serde_json::from_str::<RawConfig>(contents)?.try_into()
    }

    /// `now` expressed in the game timezone.
    pub fn local(&self, now: OffsetDateTime) -> OffsetDateTime {
        now.to_offset(self.timezone)
    }

    /// Whether the timetable runs on the local day containing `now`.
    pub fn is_game_day(&self, now: OffsetDateTime) -> bool {
        !matches!(self.local(now).weekday(), Weekday::Saturday | Weekday::Sunday)
    }

    /// Instant of `action` on the local day containing `now`.
    pub fn trigger_today(&self, action: ScheduledAction, now: OffsetDateTime) -> OffsetDateTime {
        self.local(now)
            .replace_time(self.timetable.time_of(action))
    }

    /// Instant of the earliest trigger on the local day containing `now`.
    pub fn first_trigger_today(&self, now: OffsetDateTime) -> Option<OffsetDateTime> {
        self.timetable
            .first()
            .map(|(action, _)| self.trigger_today(action, now))
    }

    /// Latest trigger at or before `now` on a game day.
    pub fn latest_trigger(&self, now: OffsetDateTime) -> Option<ScheduledAction> {
        if !self.is_game_day(now) {
            return None;
        }
        self.timetable.latest_at_or_before(self.local(now).time())
    }

    /// Deadline for a phase entered at `now`.
    ///
    /// Today's scheduled trigger ending the phase wins when it leaves at least
    /// `min_window`; otherwise the phase gets its relative window.
    pub fn phase_deadline(&self, phase: RoundPhase, now: OffsetDateTime) -> Option<OffsetDateTime> {
        let window = self.deadlines.window(phase)?;
        let scheduled = Timetable::deadline_trigger(phase)
            .filter(|_| self.is_game_day(now))
            .map(|action| self.trigger_today(action, now))
            .filter(|at| *at - now >= self.deadlines.min_window);
        Some(scheduled.unwrap_or(now + window))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            timezone: offset!(+01:00),
            timetable: Timetable::default(),
            deadlines: DeadlineConfig::default(),
            delivery: DeliveryConfig::default(),
            reveal_pacing: Duration::from_millis(4_000),
            narrative: NarrativeConfig::default(),
        }
    }
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    timezone_offset: Option<String>,
    timetable: std::collections::HashMap<String, String>,
    deadlines: DeadlineConfig,
    delivery: DeliveryConfig,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    reveal_pacing_ms: Option<Duration>,
    narrative: NarrativeConfig,
}

impl TryFrom<RawConfig> for AppConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let defaults = AppConfig::default();

        let timezone = match raw.timezone_offset {
            Some(value) => UtcOffset::parse(&value, OFFSET_FORMAT)
                .map_err(|_| ConfigError::Offset(value))?,
            None => defaults.timezone,
        };

        let mut entries = Vec::with_capacity(ScheduledAction::ALL.len());
        for action in ScheduledAction::ALL {
            let at = match raw.timetable.get(action.key()) {
                Some(value) => Time::parse(value, TRIGGER_FORMAT).map_err(|_| {
                    ConfigError::TriggerTime {
                        trigger: action.key(),
                        value: value.clone(),
                    }
                })?,
                None => action.default_time(),
            };
            entries.push((action, at));
        }

        Ok(Self {
            timezone,
            timetable: Timetable::new(entries),
            deadlines: raw.deadlines,
            delivery: raw.delivery,
            reveal_pacing: raw.reveal_pacing_ms.unwrap_or(defaults.reveal_pacing),
            narrative: raw.narrative,
        })
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
