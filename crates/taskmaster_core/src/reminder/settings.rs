use crate::config::Config;
use crate::error::AppError;
use crate::reminder::checkpoint::{Checkpoint, DEFAULT_CHECKPOINTS, parse_checkpoints};
use time::Duration;

pub const DEFAULT_APP_URL: &str = "http://localhost:5173";
pub const DEFAULT_COOLDOWN_MINUTES: u64 = 15;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderSettings {
    pub checkpoints: Vec<Checkpoint>,
    /// Minimum gap between two reminders for the same task.
    pub cooldown: Duration,
    pub poll_interval: std::time::Duration,
    /// Base URL used to build the deep link in reminder emails.
    pub app_url: String,
    /// Record the reminder even when the email channel failed. When false the
    /// task stays eligible and the next checkpoint retries it.
    pub mark_sent_on_failure: bool,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            checkpoints: DEFAULT_CHECKPOINTS.to_vec(),
            cooldown: Duration::minutes(DEFAULT_COOLDOWN_MINUTES as i64),
            poll_interval: std::time::Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            app_url: DEFAULT_APP_URL.to_string(),
            mark_sent_on_failure: true,
        }
    }
}

impl ReminderSettings {
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let defaults = Self::default();

        let checkpoints = match config.checkpoints.as_deref() {
            Some(values) => parse_checkpoints(values)?,
            None => defaults.checkpoints,
        };

        let cooldown_minutes = config.cooldown_minutes.unwrap_or(DEFAULT_COOLDOWN_MINUTES);
        let cooldown_secs = i64::try_from(cooldown_minutes)
            .ok()
            .and_then(|minutes| minutes.checked_mul(60))
            .ok_or_else(|| AppError::invalid_input("cooldown_minutes is too large"))?;

        let poll_interval_secs = config
            .poll_interval_secs
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if poll_interval_secs == 0 {
            return Err(AppError::invalid_input(
                "poll_interval_secs must be at least 1",
            ));
        }

        Ok(Self {
            checkpoints,
            cooldown: Duration::seconds(cooldown_secs),
            poll_interval: std::time::Duration::from_secs(poll_interval_secs),
            app_url: config.app_url.clone().unwrap_or(defaults.app_url),
            mark_sent_on_failure: config
                .mark_sent_on_failure
                .unwrap_or(defaults.mark_sent_on_failure),
        })
    }

    pub fn checkpoint_labels(&self) -> Vec<String> {
        self.checkpoints.iter().map(ToString::to_string).collect()
    }
}
