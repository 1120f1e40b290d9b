use crate::model::Task;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl ReminderMessage {
    pub fn for_task(task: &Task, recipient: &str, app_url: &str) -> Self {
        let link = task_link(app_url, &task.id);
        let body = format!(
            "Hi,\n\n\
             This is a reminder for your task: \"{}\"\n\
             Due Date: {}\n\
             Priority: {}\n\
             Description: {}\n\n\
             View Task: {}\n\n\
             Best,\n\
             TaskMaster\n",
            task.title, task.due_date, task.priority, task.description, link
        );

        Self {
            recipient: recipient.to_string(),
            subject: format!("Task Reminder: {}", task.title),
            body,
        }
    }
}

/// Deep link that opens the task list with `task_id` highlighted.
pub fn task_link(app_url: &str, task_id: &str) -> String {
    format!("{}/tasks?highlight={}", app_url.trim_end_matches('/'), task_id)
}
