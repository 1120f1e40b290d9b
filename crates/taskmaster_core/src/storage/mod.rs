use crate::error::AppError;
use crate::model::{Task, User};
use time::OffsetDateTime;

pub mod json_store;

pub use json_store::JsonTaskStore;

/// An open task together with the user that owns it, if that user still exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedTask {
    pub task: Task,
    pub owner: Option<User>,
}

/// The slice of task persistence the reminder scheduler depends on.
pub trait TaskStore: Send + Sync {
    /// Every task whose status is not completed, with its owner resolved.
    /// Records that cannot be read are skipped.
    fn open_tasks_with_owner(&self) -> Result<Vec<OwnedTask>, AppError>;

    /// Mark a reminder as dispatched at `sent_at` and persist it.
    fn record_reminder(&self, task_id: &str, sent_at: OffsetDateTime) -> Result<(), AppError>;
}
