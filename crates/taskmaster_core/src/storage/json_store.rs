use crate::error::AppError;
use crate::model::{Task, User};
use crate::storage::{OwnedTask, TaskStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

pub const SCHEMA_VERSION: u32 = 2;
const STORE_FILE_NAME: &str = "tasks.json";

#[derive(Debug, Serialize)]
struct StoredTasks {
    schema_version: u32,
    #[serde(default)]
    users: Vec<User>,
    tasks: Vec<Task>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaskState {
    pub users: Vec<User>,
    pub tasks: Vec<Task>,
}

impl TaskState {
    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.iter().find(|user| user.id == id)
    }
}

pub fn store_path() -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var("TASKMASTER_STORE_PATH")
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    if cfg!(windows) {
        let appdata =
            std::env::var("APPDATA").map_err(|_| AppError::invalid_data("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata)
            .join("taskmaster")
            .join(STORE_FILE_NAME))
    } else {
        let home = std::env::var("HOME").map_err(|_| AppError::invalid_data("HOME is not set"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("taskmaster")
            .join(STORE_FILE_NAME))
    }
}

pub fn load_tasks(path: &Path) -> Result<Vec<Task>, AppError> {
    Ok(load_state(path)?.tasks)
}

pub fn load_state(path: &Path) -> Result<TaskState, AppError> {
    let stored = load_raw(path)?;
    let tasks = stored
        .tasks
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<Task>, _>>()
        .map_err(|err| AppError::invalid_data(err.to_string()))?;

    Ok(TaskState {
        users: stored.users,
        tasks,
    })
}

pub fn save_state(path: &Path, state: &TaskState) -> Result<(), AppError> {
    let stored = StoredTasks {
        schema_version: SCHEMA_VERSION,
        users: state.users.to_vec(),
        tasks: state.tasks.to_vec(),
    };
    write_document(path, &stored)
}

/// The store with each task left as raw JSON, so one unreadable record does
/// not hide the others.
#[derive(Debug, Serialize, Deserialize)]
struct RawStoredTasks {
    schema_version: u32,
    #[serde(default)]
    users: Vec<User>,
    tasks: Vec<serde_json::Value>,
}

fn load_raw(path: &Path) -> Result<RawStoredTasks, AppError> {
    if !path.exists() {
        return Ok(RawStoredTasks {
            schema_version: SCHEMA_VERSION,
            users: Vec::new(),
            tasks: Vec::new(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|err| AppError::io(err.to_string()))?;
    let stored: RawStoredTasks =
        serde_json::from_str(&content).map_err(|err| AppError::invalid_data(err.to_string()))?;

    if !(1..=SCHEMA_VERSION).contains(&stored.schema_version) {
        return Err(AppError::invalid_data("schema_version mismatch"));
    }

    Ok(stored)
}

fn write_document<T: Serialize>(path: &Path, document: &T) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| AppError::io(err.to_string()))?;
    }

    let content = serde_json::to_string_pretty(document)
        .map_err(|err| AppError::invalid_data(err.to_string()))?;
    std::fs::write(path, content).map_err(|err| AppError::io(err.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, permissions).map_err(|err| AppError::io(err.to_string()))?;
    }

    Ok(())
}

/// [`TaskStore`] backed by the JSON document at `path`.
///
/// Each call re-reads the file so edits made by other processes (the CLI)
/// are picked up between scheduler cycles.
#[derive(Debug)]
pub struct JsonTaskStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonTaskStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self::new(store_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TaskStore for JsonTaskStore {
    fn open_tasks_with_owner(&self) -> Result<Vec<OwnedTask>, AppError> {
        let stored = load_raw(&self.path)?;
        let mut open = Vec::new();

        for raw in stored.tasks {
            let id = raw
                .get("id")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("<unknown>")
                .to_string();
            let task: Task = match serde_json::from_value(raw) {
                Ok(task) => task,
                Err(err) => {
                    warn!(task_id = %id, error = %err, "skipping unreadable task record");
                    continue;
                }
            };
            if task.is_completed() {
                continue;
            }
            let owner = stored.users.iter().find(|user| user.id == task.user_id).cloned();
            open.push(OwnedTask { task, owner });
        }

        Ok(open)
    }

    fn record_reminder(&self, task_id: &str, sent_at: OffsetDateTime) -> Result<(), AppError> {
        let stamp = sent_at
            .format(&Rfc3339)
            .map_err(|err| AppError::invalid_data(err.to_string()))?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AppError::io("task store lock poisoned"))?;
        let mut stored = load_raw(&self.path)?;
        let record = stored
            .tasks
            .iter_mut()
            .filter_map(serde_json::Value::as_object_mut)
            .find(|record| record.get("id").and_then(serde_json::Value::as_str) == Some(task_id))
            .ok_or_else(|| AppError::invalid_input("task not found"))?;

        record.insert("reminder_sent".to_string(), serde_json::Value::Bool(true));
        record.insert(
            "last_reminder_sent".to_string(),
            serde_json::Value::String(stamp),
        );
        stored.schema_version = SCHEMA_VERSION;
        write_document(&self.path, &stored)
    }
}

#[cfg(test)]
mod tests {
    use super::{JsonTaskStore, SCHEMA_VERSION, TaskState, load_state, load_tasks, save_state};
    use crate::model::{Priority, Task, TaskStatus, User};
    use crate::storage::TaskStore;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};
    use time::macros::datetime;

    fn temp_path(file_name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("taskmaster-{nanos}-{file_name}"))
    }

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            email_notifications: true,
            desktop_notifications: true,
        }
    }

    fn task(id: &str, status: TaskStatus, user_id: &str) -> Task {
        Task {
            id: id.to_string(),
            title: "demo".to_string(),
            description: "write the report".to_string(),
            status,
            priority: Priority::Medium,
            due_date: "2025-06-01".to_string(),
            tags: vec!["work".to_string()],
            user_id: user_id.to_string(),
            reminder_sent: false,
            last_reminder_sent: None,
            created_at: "2025-05-20T00:00:00Z".to_string(),
            updated_at: "2025-05-20T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn save_and_load_state_round_trip() {
        let path = temp_path("tasks.json");
        let state = TaskState {
            users: vec![user("user-1")],
            tasks: vec![task("task-1", TaskStatus::Pending, "user-1")],
        };

        save_state(&path, &state).unwrap();
        let loaded = load_state(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(loaded, state);
    }

    #[test]
    fn missing_file_loads_empty_state() {
        let path = temp_path("missing.json");
        let loaded = load_state(&path).unwrap();

        assert!(loaded.tasks.is_empty());
        assert!(loaded.users.is_empty());
    }

    #[test]
    fn accepts_v1_schema_without_reminder_fields() {
        let path = temp_path("v1-schema.json");
        let content = "{\n  \"schema_version\": 1,\n  \"tasks\": [\n    {\n      \"id\": \"task-1\",\n      \"title\": \"demo\",\n      \"description\": \"d\",\n      \"status\": \"pending\",\n      \"priority\": \"high\",\n      \"due_date\": \"2025-06-01\",\n      \"user_id\": \"user-1\",\n      \"created_at\": \"2025-05-20T00:00:00Z\",\n      \"updated_at\": \"2025-05-20T00:00:00Z\"\n    }\n  ]\n}";
        fs::write(&path, content).unwrap();

        let loaded = load_tasks(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, TaskStatus::Pending);
        assert_eq!(loaded[0].priority, Priority::High);
        assert!(!loaded[0].reminder_sent);
        assert_eq!(loaded[0].last_reminder_sent, None);
        assert!(loaded[0].tags.is_empty());
    }

    #[test]
    fn rejects_unknown_status_value() {
        let path = temp_path("bad-status.json");
        let content = "{\n  \"schema_version\": 2,\n  \"tasks\": [\n    {\n      \"id\": \"task-1\",\n      \"title\": \"demo\",\n      \"description\": \"d\",\n      \"status\": \"blocked\",\n      \"priority\": \"high\",\n      \"due_date\": \"2025-06-01\",\n      \"user_id\": \"user-1\",\n      \"created_at\": \"2025-05-20T00:00:00Z\",\n      \"updated_at\": \"2025-05-20T00:00:00Z\"\n    }\n  ]\n}";
        fs::write(&path, content).unwrap();

        let err = load_tasks(&path).unwrap_err();
        fs::remove_file(&path).ok();

        assert_eq!(err.code(), "invalid_data");
    }

    #[test]
    fn schema_version_must_match() {
        let path = temp_path("bad-schema.json");
        let bad = format!(
            "{{\n  \"schema_version\": {},\n  \"tasks\": []\n}}",
            SCHEMA_VERSION + 1
        );
        fs::write(&path, bad).unwrap();

        let err = load_tasks(&path).unwrap_err();
        fs::remove_file(&path).ok();

        assert_eq!(err.code(), "invalid_data");
    }

    #[test]
    fn open_tasks_excludes_completed_and_resolves_owner() {
        let path = temp_path("open-tasks.json");
        let state = TaskState {
            users: vec![user("user-1")],
            tasks: vec![
                task("task-1", TaskStatus::Pending, "user-1"),
                task("task-2", TaskStatus::Completed, "user-1"),
                task("task-3", TaskStatus::InProgress, "user-gone"),
            ],
        };
        save_state(&path, &state).unwrap();

        let store = JsonTaskStore::new(path.clone());
        let open = store.open_tasks_with_owner().unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(open.len(), 2);
        assert_eq!(open[0].task.id, "task-1");
        assert_eq!(open[0].owner.as_ref().map(|u| u.id.as_str()), Some("user-1"));
        assert_eq!(open[1].task.id, "task-3");
        assert!(open[1].owner.is_none());
    }

    #[test]
    fn record_reminder_sets_ledger_fields() {
        let path = temp_path("record.json");
        let state = TaskState {
            users: vec![user("user-1")],
            tasks: vec![task("task-1", TaskStatus::Pending, "user-1")],
        };
        save_state(&path, &state).unwrap();

        let store = JsonTaskStore::new(path.clone());
        store
            .record_reminder("task-1", datetime!(2025-06-01 00:01 UTC))
            .unwrap();
        let loaded = load_tasks(&path).unwrap();
        fs::remove_file(&path).ok();

        assert!(loaded[0].reminder_sent);
        assert_eq!(
            loaded[0].last_reminder_sent.as_deref(),
            Some("2025-06-01T00:01:00Z")
        );
    }

    #[test]
    fn unreadable_task_is_skipped_and_left_intact() {
        let path = temp_path("skip-bad-record.json");
        let content = serde_json::json!({
            "schema_version": 2,
            "users": [user("user-1")],
            "tasks": [
                {
                    "id": "task-bad",
                    "title": "demo",
                    "description": "d",
                    "status": "blocked",
                    "priority": "high",
                    "due_date": "2025-06-01",
                    "user_id": "user-1",
                    "created_at": "2025-05-20T00:00:00Z",
                    "updated_at": "2025-05-20T00:00:00Z"
                },
                task("task-1", TaskStatus::Pending, "user-1")
            ]
        });
        fs::write(&path, serde_json::to_string_pretty(&content).unwrap()).unwrap();

        let store = JsonTaskStore::new(path.clone());
        let open = store.open_tasks_with_owner().unwrap();
        store
            .record_reminder("task-1", datetime!(2025-06-01 00:01 UTC))
            .unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(open.len(), 1);
        assert_eq!(open[0].task.id, "task-1");
        assert_eq!(written["tasks"][0]["id"], "task-bad");
        assert_eq!(written["tasks"][0]["status"], "blocked");
        assert_eq!(written["tasks"][1]["reminder_sent"], true);
        assert_eq!(written["tasks"][1]["last_reminder_sent"], "2025-06-01T00:01:00Z");
    }

    #[test]
    fn record_reminder_rejects_missing_task() {
        let path = temp_path("record-missing.json");
        save_state(&path, &TaskState::default()).unwrap();

        let store = JsonTaskStore::new(path.clone());
        let err = store
            .record_reminder("task-1", datetime!(2025-06-01 00:01 UTC))
            .unwrap_err();
        fs::remove_file(&path).ok();

        assert_eq!(err.code(), "invalid_input");
    }
}
