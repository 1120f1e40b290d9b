use clap::Parser;
use clap::error::ErrorKind;
use serde::Serialize;
use std::sync::Arc;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use taskmaster_cli::cli::{Cli, Command, UserCommand, collect_config_overrides};
use taskmaster_core::config::{self, Config};
use taskmaster_core::error::AppError;
use taskmaster_core::mail::mailer_from_settings;
use taskmaster_core::model::{Task, User};
use taskmaster_core::notify::{Notifier, notifier_from_env};
use taskmaster_core::reminder::clock::local_offset;
use taskmaster_core::reminder::{
    Clock, CycleOutcome, CycleReport, FixedClock, ReminderScheduler, ReminderSettings, SystemClock,
};
use taskmaster_core::storage::JsonTaskStore;
use taskmaster_core::task_api::{
    self, DueTask, NewTask, TaskFilter, TaskSummary, TaskUpdate, UserUpdate,
};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "TASKMASTER_LOG";

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Priority")]
    priority: String,
    #[tabled(rename = "Due")]
    due_date: String,
    #[tabled(rename = "User")]
    user_id: String,
    #[tabled(rename = "Tags")]
    tags: String,
}

impl From<&Task> for TaskRow {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            status: task.status.to_string(),
            priority: task.priority.to_string(),
            due_date: task.due_date.clone(),
            user_id: task.user_id.clone(),
            tags: task.tags.join(", "),
        }
    }
}

#[derive(Tabled)]
struct UserRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Email")]
    email: String,
    #[tabled(rename = "Email reminders")]
    email_notifications: String,
    #[tabled(rename = "Desktop reminders")]
    desktop_notifications: String,
}

impl From<&User> for UserRow {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            email_notifications: on_off(user.email_notifications).to_string(),
            desktop_notifications: on_off(user.desktop_notifications).to_string(),
        }
    }
}

#[derive(Tabled, Serialize)]
struct DueRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Due")]
    due_date: String,
    #[tabled(rename = "Reminder")]
    state: String,
}

impl From<&DueTask> for DueRow {
    fn from(due: &DueTask) -> Self {
        Self {
            id: due.task.id.clone(),
            title: due.task.title.clone(),
            due_date: due.task.due_date.clone(),
            state: due.state.label().to_string(),
        }
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    let rendered =
        serde_json::to_string(value).map_err(|err| AppError::invalid_data(err.to_string()))?;
    println!("{rendered}");
    Ok(())
}

fn print_table<R: Tabled>(rows: Vec<R>) {
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn print_task_plain(task: &Task) {
    println!("{} ({})", task.title, task.id);
    println!("  Description: {}", task.description);
    println!("  Status: {}", task.status);
    println!("  Priority: {}", task.priority);
    println!("  Due: {}", task.due_date);
    println!("  User: {}", task.user_id);
    if !task.tags.is_empty() {
        println!("  Tags: {}", task.tags.join(", "));
    }
    if let Some(last) = task.last_reminder_sent.as_deref() {
        println!("  Last reminder: {last}");
    }
}

fn print_summary_plain(summary: &TaskSummary) {
    println!("Total: {}", summary.total);
    println!(
        "Completed: {} | In Progress: {} | Pending: {}",
        summary.completed, summary.in_progress, summary.pending
    );
    println!(
        "High: {} | Medium: {} | Low: {}",
        summary.high, summary.medium, summary.low
    );
    println!("Completion rate: {:.1}%", summary.completion_rate);
}

fn report_json(outcome: &str, report: Option<&CycleReport>) -> serde_json::Value {
    match report {
        Some(report) => serde_json::json!({
            "outcome": outcome,
            "scanned": report.scanned,
            "dispatched": report.dispatched,
            "cooling_down": report.cooling_down,
            "not_due": report.not_due,
            "invalid": report.invalid,
            "orphaned": report.orphaned,
            "failures": report.failures.iter().map(|failure| serde_json::json!({
                "task_id": failure.task_id,
                "error": failure.error.to_string(),
            })).collect::<Vec<_>>(),
        }),
        None => serde_json::json!({ "outcome": outcome }),
    }
}

fn print_report_plain(report: &CycleReport) {
    println!(
        "Scanned {} open tasks: {} reminded, {} cooling down, {} not due today, {} with an invalid due date, {} without an owner",
        report.scanned,
        report.dispatched.len(),
        report.cooling_down,
        report.not_due,
        report.invalid,
        report.orphaned
    );
    for id in &report.dispatched {
        println!("Reminded: {id}");
    }
    for failure in &report.failures {
        println!("Failed: {} ({})", failure.task_id, failure.error);
    }
}

fn normalize_parse_error(err: clap::Error) -> AppError {
    let rendered = err.to_string();
    let first_line = rendered.lines().next().unwrap_or("invalid command").trim();
    let message = first_line
        .strip_prefix("error: ")
        .unwrap_or(first_line)
        .to_string();
    AppError::invalid_input(message)
}

fn parse_now(raw: &str) -> Result<OffsetDateTime, AppError> {
    OffsetDateTime::parse(raw.trim(), &Rfc3339)
        .map_err(|_| AppError::invalid_input("--now must be an RFC 3339 timestamp"))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn load_config(raw_overrides: &[String]) -> Result<Config, AppError> {
    let overrides = collect_config_overrides(raw_overrides).map_err(AppError::invalid_input)?;

    let loaded = config::load_config_with_fallback();
    if let Some(err) = loaded.error {
        warn!(error = %err, "could not load config, using defaults");
    }

    let config = config::apply_env(&loaded.config);
    Ok(config::merge_overrides(&config, &overrides))
}

// Single threaded so the local offset can still be re-read on unix.
fn build_runtime() -> Result<tokio::runtime::Runtime, AppError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::io(format!("failed to start async runtime: {err}")))
}

fn build_scheduler(
    config: &Config,
    settings: ReminderSettings,
    clock: Arc<dyn Clock>,
) -> Result<ReminderScheduler, AppError> {
    let store = Arc::new(JsonTaskStore::from_env()?);
    let mailer = mailer_from_settings(config::smtp_settings(config).as_ref())?;
    let scheduler = ReminderScheduler::new(store, mailer, clock, settings);

    match notifier_from_env() {
        Ok(notifier) => {
            let notifier: Arc<dyn Notifier> = Arc::from(notifier);
            Ok(scheduler.with_notifier(notifier))
        }
        Err(err) => {
            warn!(error = %err, "desktop notifications unavailable");
            Ok(scheduler)
        }
    }
}

fn run_user_command(command: UserCommand, json: bool) -> Result<(), AppError> {
    match command {
        UserCommand::Add { name, email } => {
            let user = task_api::add_user(&name, &email)?;
            if json {
                print_json(&user)?;
            } else {
                println!("Added user: {} <{}> ({})", user.name, user.email, user.id);
            }
        }
        UserCommand::List => {
            let users = task_api::list_users()?;
            if json {
                print_json(&users)?;
            } else if users.is_empty() {
                println!("No users.");
            } else {
                print_table(users.iter().map(UserRow::from).collect());
            }
        }
        UserCommand::Update {
            id,
            name,
            email,
            email_notifications,
            desktop_notifications,
        } => {
            let update = UserUpdate {
                name,
                email,
                email_notifications,
                desktop_notifications,
            };
            let user = task_api::update_user(&id, &update)?;
            if json {
                print_json(&user)?;
            } else {
                println!(
                    "Updated user: {} ({}), email reminders {}, desktop reminders {}",
                    user.name,
                    user.id,
                    on_off(user.email_notifications),
                    on_off(user.desktop_notifications)
                );
            }
        }
    }

    Ok(())
}

fn run_command(cli: Cli, offset: UtcOffset) -> Result<(), AppError> {
    let json = cli.json;

    match cli.command {
        Command::User { command } => run_user_command(command, json)?,
        Command::Add {
            title,
            description,
            due_date,
            status,
            priority,
            tags,
            user_id,
        } => {
            let task = task_api::create_task(&NewTask {
                title,
                description,
                status,
                priority,
                due_date,
                tags,
                user_id,
            })?;
            if json {
                print_json(&task)?;
            } else {
                println!("Added task: {} ({})", task.title, task.id);
            }
        }
        Command::List {
            user_id,
            status,
            priority,
        } => {
            let tasks = task_api::list_tasks_matching(&TaskFilter {
                user_id,
                status,
                priority,
            })?;
            if json {
                print_json(&tasks)?;
            } else if tasks.is_empty() {
                println!("No tasks.");
            } else {
                print_table(tasks.iter().map(TaskRow::from).collect());
            }
        }
        Command::Show { id } => {
            let task = task_api::get_task_by_id(&id)?;
            if json {
                print_json(&task)?;
            } else {
                print_task_plain(&task);
            }
        }
        Command::Update {
            id,
            title,
            description,
            status,
            priority,
            due_date,
            tags,
            clear_tags,
        } => {
            let tags = if clear_tags {
                Some(Vec::new())
            } else if tags.is_empty() {
                None
            } else {
                Some(tags)
            };
            let update = TaskUpdate {
                title,
                description,
                status,
                priority,
                due_date,
                tags,
            };
            let task = task_api::update_task(&id, &update)?;
            if json {
                print_json(&task)?;
            } else {
                println!("Updated task: {} ({})", task.title, task.id);
            }
        }
        Command::Delete { id } => {
            let task = task_api::delete_task(&id)?;
            if json {
                print_json(&task)?;
            } else {
                println!("Deleted task: {} ({})", task.title, task.id);
            }
        }
        Command::Summary { user_id } => {
            let summary = task_api::summarize(user_id.as_deref())?;
            if json {
                print_json(&summary)?;
            } else {
                print_summary_plain(&summary);
            }
        }
        Command::Due { now } => {
            let settings = ReminderSettings::from_config(&load_config(&cli.config_override)?)?;
            let now = match now {
                Some(raw) => parse_now(&raw)?,
                None => SystemClock::new(offset).now(),
            };
            let due = task_api::due_today(now, settings.cooldown)?;
            let rows: Vec<DueRow> = due.iter().map(DueRow::from).collect();
            if json {
                print_json(&rows)?;
            } else if rows.is_empty() {
                println!("Nothing due today.");
            } else {
                print_table(rows);
            }
        }
        Command::Check { now, force } => {
            let config = load_config(&cli.config_override)?;
            let settings = ReminderSettings::from_config(&config)?;
            let clock: Arc<dyn Clock> = match now {
                Some(raw) => Arc::new(FixedClock::new(parse_now(&raw)?)),
                None => Arc::new(SystemClock::new(offset)),
            };
            let scheduler = build_scheduler(&config, settings, Arc::clone(&clock))?;
            let runtime = build_runtime()?;

            let outcome = runtime.block_on(async {
                if force {
                    match scheduler.run_cycle(clock.now()).await {
                        Ok(report) => CycleOutcome::Ran(report),
                        Err(err) => CycleOutcome::Failed(err),
                    }
                } else {
                    scheduler.poll().await
                }
            });

            match outcome {
                CycleOutcome::Ran(report) => {
                    if json {
                        print_json(&report_json("ran", Some(&report)))?;
                    } else {
                        print_report_plain(&report);
                    }
                }
                CycleOutcome::Idle => {
                    if json {
                        print_json(&report_json("idle", None))?;
                    } else {
                        let now = clock.now();
                        println!(
                            "{:02}:{:02} is not a reminder checkpoint ({}); nothing to do.",
                            now.hour(),
                            now.minute(),
                            scheduler.settings().checkpoint_labels().join(", ")
                        );
                    }
                }
                CycleOutcome::Busy => {
                    return Err(AppError::invalid_input("a reminder cycle is already running"));
                }
                CycleOutcome::Failed(err) => return Err(err),
            }
        }
        Command::Serve => {
            let config = load_config(&cli.config_override)?;
            let settings = ReminderSettings::from_config(&config)?;
            let checkpoints = settings.checkpoint_labels().join(", ");
            let clock: Arc<dyn Clock> = Arc::new(SystemClock::following_local(offset));
            let scheduler = Arc::new(build_scheduler(&config, settings, clock)?);
            let runtime = build_runtime()?;

            println!("Reminder scheduler running (checkpoints {checkpoints}). Press Ctrl-C to stop.");
            runtime.block_on(async move {
                let handle = scheduler.start();
                tokio::signal::ctrl_c()
                    .await
                    .map_err(|err| AppError::io(format!("failed to wait for Ctrl-C: {err}")))?;
                info!("interrupt received, stopping reminder scheduler");
                handle.shutdown().await
            })?;
        }
    }

    Ok(())
}

fn main() {
    // Read the local offset while the process is still single threaded.
    let offset = local_offset();
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            eprintln!("ERROR: {}", normalize_parse_error(err));
            std::process::exit(1);
        }
    };

    if let Err(err) = run_command(cli, offset) {
        eprintln!("ERROR: {}", err);
        std::process::exit(1);
    }
}
