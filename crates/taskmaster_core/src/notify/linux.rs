use crate::error::AppError;
use crate::model::Task;
use crate::notify::{Notifier, launch_show, notification_body, notification_title, parse_activation_argument};
use notify_rust::Notification;

pub struct LinuxNotifier;

/// Keeps the server's default expiry: the notification closes on its own,
/// which also ends the thread waiting on its action.
fn build_notification(task: &Task, action: &str) -> Notification {
    let mut notification = Notification::new();
    notification
        .appname("taskmaster")
        .summary(&notification_title(task))
        .body(&notification_body(task));
    if !action.trim().is_empty() {
        notification.action(action, "Open");
    }
    notification
}

impl Notifier for LinuxNotifier {
    fn notify(&self, task: &Task) -> Result<(), AppError> {
        self.notify_with_action(task, "")
    }

    fn notify_with_action(&self, task: &Task, action: &str) -> Result<(), AppError> {
        let handle = build_notification(task, action)
            .show()
            .map_err(|err| AppError::delivery(err.to_string()))?;

        if !action.trim().is_empty() {
            let action_key = action.to_string();
            let task_id = task.id.clone();
            std::thread::spawn(move || {
                handle.wait_for_action(|selected| {
                    if selected == action_key || selected == "default" {
                        let id = parse_activation_argument(&action_key).unwrap_or(task_id);
                        let _ = launch_show(&id);
                    }
                });
            });
        }

        Ok(())
    }
}
