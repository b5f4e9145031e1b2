use std::env;

use chrono::{Duration, Utc};

use crate::db::{self, file::{DEFAULT_POLLS_FILE, FILE_ENV_KEY}};
use crate::model::PollOption;
use crate::notify::TOKEN_ENV_KEY;
use crate::schedule::WeeklySchedule;
use crate::util;

const CHANNEL_ENV_KEY: &str = "POLLBOT_CHANNEL_ID";
const POLL_HOURS_ENV_KEY: &str = "POLLBOT_POLL_HOURS";
const SCHEDULE_ENV_KEY: &str = "POLLBOT_SCHEDULE";
const QUESTION_ENV_KEY: &str = "POLLBOT_QUESTION";
const OPTIONS_ENV_KEY: &str = "POLLBOT_OPTIONS";
const MULTIPLE_CHOICE_ENV_KEY: &str = "POLLBOT_MULTIPLE_CHOICE";
const EXPIRED_ENV_KEY: &str = "POLLBOT_EXPIRED_ON_RELOAD";
const ONE_POLL_ENV_KEY: &str = "POLLBOT_ONE_POLL_PER_CHANNEL";
const FEEDBACK_ENV_KEY: &str = "POLLBOT_VOTER_FEEDBACK";
const BIND_ENV_KEY: &str = "POLLBOT_BIND";
const HTTP_TIMEOUT_ENV_KEY: &str = "POLLBOT_HTTP_TIMEOUT_SECS";

const DEFAULT_QUESTION: &str = "What days are you available this week?";
const DEFAULT_OPTIONS: [&str; 8] = [
    "1️⃣ Monday",
    "2️⃣ Tuesday",
    "3️⃣ Wednesday",
    "4️⃣ Thursday",
    "5️⃣ Friday",
    "6️⃣ Saturday",
    "7️⃣ Sunday",
    "❌ Unavailable",
];
const DEFAULT_POLL_HOURS: i64 = 24;
const DEFAULT_SCHEDULE: &str = "mon 17:00";
const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("duplicate poll option: {0}")]
    DuplicateOption(String),
}

/// What happens to polls found already expired when state is reloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiredPolicy {
    /// Post the results late, then close.
    Announce,
    /// Mark ended without posting anything.
    Silent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTemplate {
    pub question: String,
    pub options: Vec<PollOption>,
    pub multiple_choice: bool,
    pub duration: Duration,
}

impl Default for PollTemplate {
    fn default() -> PollTemplate {
        PollTemplate {
            question: DEFAULT_QUESTION.to_owned(),
            options: DEFAULT_OPTIONS.iter().map(|o| PollOption::parse(o)).collect(),
            multiple_choice: true,
            duration: Duration::hours(DEFAULT_POLL_HOURS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub default_channel: Option<String>,
    pub template: PollTemplate,
    pub expired_policy: ExpiredPolicy,
    pub one_poll_per_channel: bool,
    pub voter_feedback: bool,
}

impl Default for LifecycleSettings {
    fn default() -> LifecycleSettings {
        LifecycleSettings {
            default_channel: None,
            template: PollTemplate::default(),
            expired_policy: ExpiredPolicy::Silent,
            one_poll_per_channel: false,
            voter_feedback: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Postgres(String),
    File(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub store: StoreConfig,
    pub schedule: Option<WeeklySchedule>,
    pub bind: String,
    /// Upper bound on each request to the chat platform.
    pub http_timeout: std::time::Duration,
    pub lifecycle: LifecycleSettings,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
        let get = |key: &str| lookup(key)
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty());

        let bot_token = get(TOKEN_ENV_KEY).ok_or(ConfigError::Missing(TOKEN_ENV_KEY))?;

        let store = match get(db::ENV_KEY) {
            Some(url) => StoreConfig::Postgres(url),
            None => StoreConfig::File(get(FILE_ENV_KEY).unwrap_or_else(|| DEFAULT_POLLS_FILE.to_owned())),
        };

        let schedule = match get(SCHEDULE_ENV_KEY).as_deref() {
            Some("off") => None,
            Some(raw) => Some(parse_schedule(raw)?),
            None => Some(parse_schedule(DEFAULT_SCHEDULE)?),
        };

        let mut template = PollTemplate::default();
        if let Some(question) = get(QUESTION_ENV_KEY) {
            template.question = question;
        }
        if let Some(options) = get(OPTIONS_ENV_KEY) {
            template.options = options.split('|')
                .filter(|o| !o.trim().is_empty())
                .map(PollOption::parse)
                .collect();
            if template.options.is_empty() {
                return Err(ConfigError::Invalid { key: OPTIONS_ENV_KEY, value: options });
            }
        }
        if let Some(duplicate) = util::first_duplicate(template.options.iter().map(|o| &o.label)) {
            return Err(ConfigError::DuplicateOption(duplicate.clone()));
        }
        if let Some(raw) = get(MULTIPLE_CHOICE_ENV_KEY) {
            template.multiple_choice = parse_bool(MULTIPLE_CHOICE_ENV_KEY, &raw)?;
        }
        if let Some(raw) = get(POLL_HOURS_ENV_KEY) {
            template.duration = raw.parse::<i64>()
                .ok()
                .filter(|h| *h > 0)
                .and_then(Duration::try_hours)
                .filter(|d| Utc::now().checked_add_signed(*d).is_some())
                .ok_or(ConfigError::Invalid { key: POLL_HOURS_ENV_KEY, value: raw })?;
        }

        let expired_policy = match get(EXPIRED_ENV_KEY).as_deref() {
            None | Some("silent") => ExpiredPolicy::Silent,
            Some("announce") => ExpiredPolicy::Announce,
            Some(other) => return Err(ConfigError::Invalid { key: EXPIRED_ENV_KEY, value: other.to_owned() }),
        };

        let lifecycle = LifecycleSettings {
            default_channel: get(CHANNEL_ENV_KEY),
            template,
            expired_policy,
            one_poll_per_channel: get(ONE_POLL_ENV_KEY)
                .map(|v| parse_bool(ONE_POLL_ENV_KEY, &v))
                .transpose()?
                .unwrap_or(false),
            voter_feedback: get(FEEDBACK_ENV_KEY)
                .map(|v| parse_bool(FEEDBACK_ENV_KEY, &v))
                .transpose()?
                .unwrap_or(false),
        };

        let http_timeout = match get(HTTP_TIMEOUT_ENV_KEY) {
            Some(raw) => raw.parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or(ConfigError::Invalid { key: HTTP_TIMEOUT_ENV_KEY, value: raw })?,
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        Ok(Config {
            bot_token,
            store,
            schedule,
            bind: get(BIND_ENV_KEY).unwrap_or_else(|| DEFAULT_BIND.to_owned()),
            http_timeout: std::time::Duration::from_secs(http_timeout),
            lifecycle,
        })
    }
}

fn parse_schedule(raw: &str) -> Result<WeeklySchedule, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::Invalid { key: SCHEDULE_ENV_KEY, value: raw.to_owned() })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { key, value: raw.to_owned() }),
    }
}
