use crate::error::AppError;
use crate::model::{Priority, Task, TaskStatus, User};
use crate::reminder::due::{ReminderState, evaluate};
use crate::storage::json_store::{self, TaskState};
use serde::Serialize;
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub due_date: String,
    pub tags: Vec<String>,
    pub user_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub due_date: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl TaskUpdate {
    fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Narrows a task listing; every field left as `None` matches all tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub user_id: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub email_notifications: Option<bool>,
    pub desktop_notifications: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskSummary {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub pending: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    /// Percentage of completed tasks, rounded to one decimal.
    pub completion_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueTask {
    pub task: Task,
    pub state: ReminderState,
}

pub fn create_task(input: &NewTask) -> Result<Task, AppError> {
    let path = json_store::store_path()?;
    create_task_with_path(&path, input)
}

pub fn list_tasks(user_id: Option<&str>) -> Result<Vec<Task>, AppError> {
    let path = json_store::store_path()?;
    list_tasks_with_path(&path, user_id)
}

pub fn list_tasks_matching(filter: &TaskFilter) -> Result<Vec<Task>, AppError> {
    let path = json_store::store_path()?;
    list_tasks_matching_with_path(&path, filter)
}

pub fn get_task_by_id(id: &str) -> Result<Task, AppError> {
    let path = json_store::store_path()?;
    get_task_by_id_with_path(&path, id)
}

pub fn update_task(id: &str, update: &TaskUpdate) -> Result<Task, AppError> {
    let path = json_store::store_path()?;
    update_task_with_path(&path, id, update)
}

pub fn delete_task(id: &str) -> Result<Task, AppError> {
    let path = json_store::store_path()?;
    delete_task_with_path(&path, id)
}

pub fn add_user(name: &str, email: &str) -> Result<User, AppError> {
    let path = json_store::store_path()?;
    add_user_with_path(&path, name, email)
}

pub fn list_users() -> Result<Vec<User>, AppError> {
    let path = json_store::store_path()?;
    Ok(json_store::load_state(&path)?.users)
}

pub fn update_user(id: &str, update: &UserUpdate) -> Result<User, AppError> {
    let path = json_store::store_path()?;
    update_user_with_path(&path, id, update)
}

pub fn summarize(user_id: Option<&str>) -> Result<TaskSummary, AppError> {
    Ok(summarize_tasks(&list_tasks(user_id)?))
}

pub fn due_today(now: OffsetDateTime, cooldown: Duration) -> Result<Vec<DueTask>, AppError> {
    let path = json_store::store_path()?;
    due_today_with_path(&path, now, cooldown)
}

fn now_rfc3339() -> Result<String, AppError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|err| AppError::invalid_data(err.to_string()))
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_input(format!("{field} is required")));
    }
    Ok(trimmed)
}

fn clean_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

fn validate_email(email: &str) -> Result<&str, AppError> {
    let trimmed = required(email, "email")?;
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(trimmed),
        _ => Err(AppError::invalid_input("email must be an address")),
    }
}

fn ensure_unique_email(state: &TaskState, email: &str, except_id: Option<&str>) -> Result<(), AppError> {
    let taken = state.users.iter().any(|user| {
        user.email.eq_ignore_ascii_case(email) && Some(user.id.as_str()) != except_id
    });
    if taken {
        return Err(AppError::invalid_input("email is already registered"));
    }
    Ok(())
}

fn create_task_with_path(path: &Path, input: &NewTask) -> Result<Task, AppError> {
    let title = required(&input.title, "title")?;
    let description = required(&input.description, "description")?;
    let due_date = required(&input.due_date, "due date")?;
    let user_id = required(&input.user_id, "user")?;
    let status: TaskStatus = required(&input.status, "status")?.parse()?;
    let priority: Priority = required(&input.priority, "priority")?.parse()?;

    let mut state = json_store::load_state(path)?;
    if state.user(user_id).is_none() {
        return Err(AppError::invalid_input("user not found"));
    }

    let created_at = now_rfc3339()?;
    let task = Task {
        id: format!("task-{}", OffsetDateTime::now_utc().unix_timestamp_nanos()),
        title: title.to_string(),
        description: description.to_string(),
        status,
        priority,
        due_date: due_date.to_string(),
        tags: clean_tags(&input.tags),
        user_id: user_id.to_string(),
        reminder_sent: false,
        last_reminder_sent: None,
        created_at: created_at.clone(),
        updated_at: created_at,
    };

    state.tasks.push(task.clone());
    json_store::save_state(path, &state)?;

    Ok(task)
}

fn list_tasks_with_path(path: &Path, user_id: Option<&str>) -> Result<Vec<Task>, AppError> {
    let filter = TaskFilter {
        user_id: user_id.map(str::to_string),
        ..TaskFilter::default()
    };
    list_tasks_matching_with_path(path, &filter)
}

fn list_tasks_matching_with_path(path: &Path, filter: &TaskFilter) -> Result<Vec<Task>, AppError> {
    let user_id = filter
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());
    let status = filter
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()?;
    let priority = filter
        .priority
        .as_deref()
        .map(str::parse::<Priority>)
        .transpose()?;

    let tasks = json_store::load_tasks(path)?;
    Ok(tasks
        .into_iter()
        .filter(|task| user_id.is_none_or(|id| task.user_id == id))
        .filter(|task| status.is_none_or(|status| task.status == status))
        .filter(|task| priority.is_none_or(|priority| task.priority == priority))
        .collect())
}

fn get_task_by_id_with_path(path: &Path, id: &str) -> Result<Task, AppError> {
    let trimmed_id = required(id, "id")?;

    let state = json_store::load_state(path)?;
    state
        .tasks
        .into_iter()
        .find(|task| task.id == trimmed_id)
        .ok_or_else(|| AppError::invalid_input("task not found"))
}

fn update_task_with_path(path: &Path, id: &str, update: &TaskUpdate) -> Result<Task, AppError> {
    let trimmed_id = required(id, "id")?;
    if update.is_empty() {
        return Err(AppError::invalid_input("nothing to update"));
    }

    let title = update.title.as_deref().map(|v| required(v, "title")).transpose()?;
    let description = update
        .description
        .as_deref()
        .map(|v| required(v, "description"))
        .transpose()?;
    let due_date = update
        .due_date
        .as_deref()
        .map(|v| required(v, "due date"))
        .transpose()?;
    let status = update
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()?;
    let priority = update
        .priority
        .as_deref()
        .map(str::parse::<Priority>)
        .transpose()?;
    let updated_at = now_rfc3339()?;

    let mut state = json_store::load_state(path)?;
    let task = state
        .tasks
        .iter_mut()
        .find(|task| task.id == trimmed_id)
        .ok_or_else(|| AppError::invalid_input("task not found"))?;

    if let Some(title) = title {
        task.title = title.to_string();
    }
    if let Some(description) = description {
        task.description = description.to_string();
    }
    if let Some(due_date) = due_date {
        task.due_date = due_date.to_string();
    }
    if let Some(status) = status {
        task.status = status;
    }
    if let Some(priority) = priority {
        task.priority = priority;
    }
    if let Some(tags) = update.tags.as_deref() {
        task.tags = clean_tags(tags);
    }
    task.updated_at = updated_at;

    let updated = task.clone();
    json_store::save_state(path, &state)?;

    Ok(updated)
}

fn delete_task_with_path(path: &Path, id: &str) -> Result<Task, AppError> {
    let trimmed_id = required(id, "id")?;

    let mut state = json_store::load_state(path)?;
    let index = state
        .tasks
        .iter()
        .position(|task| task.id == trimmed_id)
        .ok_or_else(|| AppError::invalid_input("task not found"))?;

    let removed = state.tasks.remove(index);
    json_store::save_state(path, &state)?;

    Ok(removed)
}

fn add_user_with_path(path: &Path, name: &str, email: &str) -> Result<User, AppError> {
    let name = required(name, "name")?;
    let email = validate_email(email)?;

    let mut state = json_store::load_state(path)?;
    ensure_unique_email(&state, email, None)?;

    let user = User {
        id: format!("user-{}", OffsetDateTime::now_utc().unix_timestamp_nanos()),
        name: name.to_string(),
        email: email.to_string(),
        email_notifications: true,
        desktop_notifications: true,
    };

    state.users.push(user.clone());
    json_store::save_state(path, &state)?;

    Ok(user)
}

fn update_user_with_path(path: &Path, id: &str, update: &UserUpdate) -> Result<User, AppError> {
    let trimmed_id = required(id, "id")?;
    if update == &UserUpdate::default() {
        return Err(AppError::invalid_input("nothing to update"));
    }

    let name = update.name.as_deref().map(|v| required(v, "name")).transpose()?;
    let email = update.email.as_deref().map(validate_email).transpose()?;

    let mut state = json_store::load_state(path)?;
    if let Some(email) = email {
        ensure_unique_email(&state, email, Some(trimmed_id))?;
    }

    let user = state
        .users
        .iter_mut()
        .find(|user| user.id == trimmed_id)
        .ok_or_else(|| AppError::invalid_input("user not found"))?;

    if let Some(name) = name {
        user.name = name.to_string();
    }
    if let Some(email) = email {
        user.email = email.to_string();
    }
    if let Some(enabled) = update.email_notifications {
        user.email_notifications = enabled;
    }
    if let Some(enabled) = update.desktop_notifications {
        user.desktop_notifications = enabled;
    }

    let updated = user.clone();
    json_store::save_state(path, &state)?;

    Ok(updated)
}

fn summarize_tasks(tasks: &[Task]) -> TaskSummary {
    let mut summary = TaskSummary {
        total: tasks.len(),
        ..TaskSummary::default()
    };

    for task in tasks {
        match task.status {
            TaskStatus::Completed => summary.completed += 1,
            TaskStatus::InProgress => summary.in_progress += 1,
            TaskStatus::Pending => summary.pending += 1,
        }
        match task.priority {
            Priority::High => summary.high += 1,
            Priority::Medium => summary.medium += 1,
            Priority::Low => summary.low += 1,
        }
    }

    if summary.total > 0 {
        let rate = summary.completed as f64 / summary.total as f64 * 100.0;
        summary.completion_rate = (rate * 10.0).round() / 10.0;
    }

    summary
}

fn due_today_with_path(
    path: &Path,
    now: OffsetDateTime,
    cooldown: Duration,
) -> Result<Vec<DueTask>, AppError> {
    let tasks = json_store::load_tasks(path)?;
    Ok(tasks
        .into_iter()
        .filter_map(|task| {
            let state = evaluate(&task, now, cooldown);
            state.is_due_today().then_some(DueTask { task, state })
        })
        .collect())
}
