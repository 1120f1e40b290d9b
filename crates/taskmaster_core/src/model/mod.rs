mod task;
mod user;

pub use task::{Priority, Task, TaskStatus};
pub use user::User;
