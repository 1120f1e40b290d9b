use clap::{Parser, Subcommand};
use taskmaster_core::config::ConfigOverrides;

#[derive(Parser, Debug)]
#[command(name = "taskmaster", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Override configuration values (format KEY=VALUE)
    #[arg(long = "config-override", value_name = "KEY=VALUE", global = true)]
    pub config_override: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage users and their reminder preferences
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    /// Add a new task
    ///
    /// Example: taskmaster add "Pay rent" --description "Before noon" --due 2025-06-01 --user user-1
    Add {
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long = "due", value_name = "DATE")]
        due_date: String,
        #[arg(long, default_value = "Pending")]
        status: String,
        #[arg(long, default_value = "Medium")]
        priority: String,
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,
        #[arg(long = "user", value_name = "USER_ID")]
        user_id: String,
    },
    /// List tasks, optionally filtered by user, status or priority
    ///
    /// Example: taskmaster list --status pending --priority high
    List {
        #[arg(long = "user", value_name = "USER_ID")]
        user_id: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        priority: Option<String>,
    },
    /// Show details of a task
    Show { id: String },
    /// Update fields of a task
    ///
    /// Example: taskmaster update task-1 --status "In Progress"
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long = "due", value_name = "DATE")]
        due_date: Option<String>,
        /// Replace the tag list
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,
        /// Remove every tag
        #[arg(long, conflicts_with = "tags")]
        clear_tags: bool,
    },
    /// Delete a task
    Delete { id: String },
    /// Task counts by status and priority
    Summary {
        #[arg(long = "user", value_name = "USER_ID")]
        user_id: Option<String>,
    },
    /// List open tasks due today with their reminder state
    Due {
        /// Evaluate as of this RFC 3339 instant instead of the current time
        #[arg(long, value_name = "RFC3339")]
        now: Option<String>,
    },
    /// Run one reminder poll and print what happened
    ///
    /// Example: taskmaster check --now 2025-06-01T12:01:00+02:00
    Check {
        #[arg(long, value_name = "RFC3339")]
        now: Option<String>,
        /// Scan even when the clock is not on a checkpoint
        #[arg(long)]
        force: bool,
    },
    /// Run the reminder scheduler until interrupted
    ///
    /// Checkpoints follow the local clock. The UTC offset is re-read on every
    /// wake; where the platform cannot report it while the process runs
    /// (unix with extra threads, such as after an SMTP lookup) the last known
    /// offset is used, so a daylight saving change may only be picked up
    /// after a restart.
    Serve,
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Register a user
    Add { name: String, email: String },
    /// List users
    List,
    /// Change a user's details or notification preferences
    ///
    /// Example: taskmaster user update user-1 --email-notifications off
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, value_name = "on|off", value_parser = parse_toggle)]
        email_notifications: Option<bool>,
        #[arg(long, value_name = "on|off", value_parser = parse_toggle)]
        desktop_notifications: Option<bool>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOverrideTarget {
    AppUrl,
    Checkpoints,
    CooldownMinutes,
    PollIntervalSecs,
    MarkSentOnFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConfigOverride {
    pub target: ConfigOverrideTarget,
    pub value: String,
}

/// Parse a raw `KEY=VALUE` override string into a structured target.
pub fn parse_config_override(raw: &str) -> Result<ParsedConfigOverride, String> {
    let trimmed = raw.trim();
    let (key_raw, value_raw) = trimmed
        .split_once('=')
        .ok_or_else(|| "override must be in KEY=VALUE format".to_string())?;

    let value = value_raw.trim().to_string();
    let canonical_field = canonicalize_flag_name(key_raw)
        .ok_or_else(|| "override key cannot be empty".to_string())?;

    let target = match canonical_field.as_str() {
        "app_url" => ConfigOverrideTarget::AppUrl,
        "checkpoints" => ConfigOverrideTarget::Checkpoints,
        "cooldown_minutes" => ConfigOverrideTarget::CooldownMinutes,
        "poll_interval_secs" => ConfigOverrideTarget::PollIntervalSecs,
        "mark_sent_on_failure" => ConfigOverrideTarget::MarkSentOnFailure,
        other => return Err(format!("unknown config field '{other}'")),
    };

    if value.is_empty() {
        return Err(format!("{canonical_field} override requires a value"));
    }

    Ok(ParsedConfigOverride { target, value })
}

/// Parse every raw override and fold them into one set; later keys win.
pub fn collect_config_overrides<S: AsRef<str>>(raw: &[S]) -> Result<ConfigOverrides, String> {
    let mut overrides = ConfigOverrides::default();

    for entry in raw {
        let parsed = parse_config_override(entry.as_ref())?;
        match parsed.target {
            ConfigOverrideTarget::AppUrl => overrides.app_url = Some(parsed.value),
            ConfigOverrideTarget::Checkpoints => {
                overrides.checkpoints = Some(
                    parsed
                        .value
                        .split(',')
                        .map(str::trim)
                        .filter(|value| !value.is_empty())
                        .map(str::to_string)
                        .collect(),
                );
            }
            ConfigOverrideTarget::CooldownMinutes => {
                overrides.cooldown_minutes = Some(parse_number(&parsed.value, "cooldown_minutes")?);
            }
            ConfigOverrideTarget::PollIntervalSecs => {
                overrides.poll_interval_secs =
                    Some(parse_number(&parsed.value, "poll_interval_secs")?);
            }
            ConfigOverrideTarget::MarkSentOnFailure => {
                overrides.mark_sent_on_failure = Some(parse_toggle(&parsed.value)?);
            }
        }
    }

    Ok(overrides)
}

fn parse_number(value: &str, field: &str) -> Result<u64, String> {
    value
        .parse()
        .map_err(|_| format!("{field} must be a non-negative integer"))
}

/// Accepts on/off, true/false, yes/no and 1/0.
pub fn parse_toggle(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        other => Err(format!("expected on or off, got '{other}'")),
    }
}

fn canonicalize_flag_name(name: &str) -> Option<String> {
    let mut cleaned = String::new();
    let mut previous_underscore = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            cleaned.push(ch.to_ascii_lowercase());
            previous_underscore = false;
        } else if !previous_underscore && !cleaned.is_empty() {
            cleaned.push('_');
            previous_underscore = true;
        }
    }

    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
