use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_ENV_VAR: &str = "TASKMASTER_CONFIG_PATH";
const APP_URL_ENV_VAR: &str = "TASKMASTER_APP_URL";
const SMTP_USER_ENV_VAR: &str = "TASKMASTER_SMTP_USER";
const SMTP_PASSWORD_ENV_VAR: &str = "TASKMASTER_SMTP_PASSWORD";

pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app_url: Option<String>,
    #[serde(default)]
    pub checkpoints: Option<Vec<String>>,
    #[serde(default)]
    pub cooldown_minutes: Option<u64>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub mark_sent_on_failure: Option<bool>,
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
}

/// SMTP connection details with defaults applied. Only produced when
/// both a username and a password are available.
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    pub from: String,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from", &self.from)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub error: Option<AppError>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub app_url: Option<String>,
    pub checkpoints: Option<Vec<String>>,
    pub cooldown_minutes: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub mark_sent_on_failure: Option<bool>,
}

pub fn config_path() -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    if cfg!(windows) {
        let appdata =
            std::env::var("APPDATA").map_err(|_| AppError::invalid_data("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata)
            .join("taskmaster")
            .join(CONFIG_FILE_NAME))
    } else {
        let home = std::env::var("HOME").map_err(|_| AppError::invalid_data("HOME is not set"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("taskmaster")
            .join(CONFIG_FILE_NAME))
    }
}

pub fn load_config_with_fallback() -> ConfigLoad {
    match config_path() {
        Ok(path) => load_config_with_fallback_from_path(&path),
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_with_fallback_from_path(path: &Path) -> ConfigLoad {
    if !path.exists() {
        return ConfigLoad {
            config: Config::default(),
            error: None,
        };
    }

    match load_config_from_path(path) {
        Ok(config) => ConfigLoad {
            config,
            error: None,
        },
        Err(err) => ConfigLoad {
            config: Config::default(),
            error: Some(err),
        },
    }
}

fn load_config_from_path(path: &Path) -> Result<Config, AppError> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| AppError::io(format!("{}: {}", path.display(), err)))?;
    let config = serde_json::from_str(&content).map_err(|err| {
        AppError::invalid_data(format!("invalid JSON in {}: {}", path.display(), err))
    })?;
    Ok(normalize_config(config))
}

fn normalize_config(mut config: Config) -> Config {
    config.app_url = config.app_url.and_then(|url| normalize_app_url(&url));
    config
}

fn normalize_app_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Apply `TASKMASTER_*` environment variables on top of a loaded config.
pub fn apply_env(config: &Config) -> Config {
    apply_env_with(config, |key| std::env::var(key).ok())
}

fn apply_env_with<F>(config: &Config, lookup: F) -> Config
where
    F: Fn(&str) -> Option<String>,
{
    let mut merged = config.clone();
    let non_blank = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(url) = non_blank(APP_URL_ENV_VAR).and_then(|url| normalize_app_url(&url)) {
        merged.app_url = Some(url);
    }

    let user = non_blank(SMTP_USER_ENV_VAR);
    let password = non_blank(SMTP_PASSWORD_ENV_VAR);
    if user.is_some() || password.is_some() {
        let smtp = merged.smtp.get_or_insert_with(SmtpConfig::default);
        if let Some(user) = user {
            smtp.username = Some(user);
        }
        if let Some(password) = password {
            smtp.password = Some(password);
        }
    }

    merged
}

pub fn merge_overrides(base: &Config, overrides: &ConfigOverrides) -> Config {
    let mut merged = base.clone();
    if let Some(url) = overrides.app_url.as_deref()
        && let Some(normalized) = normalize_app_url(url)
    {
        merged.app_url = Some(normalized);
    }
    if let Some(checkpoints) = overrides.checkpoints.as_ref() {
        merged.checkpoints = Some(checkpoints.clone());
    }
    if let Some(minutes) = overrides.cooldown_minutes {
        merged.cooldown_minutes = Some(minutes);
    }
    if let Some(secs) = overrides.poll_interval_secs {
        merged.poll_interval_secs = Some(secs);
    }
    if let Some(mark) = overrides.mark_sent_on_failure {
        merged.mark_sent_on_failure = Some(mark);
    }

    merged
}

pub fn smtp_settings(config: &Config) -> Option<SmtpSettings> {
    let smtp = config.smtp.as_ref()?;
    let username = smtp.username.as_deref().map(str::trim).filter(|v| !v.is_empty())?;
    let password = smtp.password.as_deref().filter(|v| !v.is_empty())?;
    let host = smtp
        .host
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_SMTP_HOST);
    let from = smtp
        .from
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(username);

    Some(SmtpSettings {
        host: host.to_string(),
        port: smtp.port,
        username: username.to_string(),
        password: password.to_string(),
        from: from.to_string(),
    })
}
