use crate::error::AppError;
use crate::model::Task;
use crate::notify::{Notifier, launch_show, notification_body, notification_title, parse_activation_argument};
use tauri_winrt_notification::Toast;

pub struct WindowsNotifier;

impl Notifier for WindowsNotifier {
    fn notify(&self, task: &Task) -> Result<(), AppError> {
        self.notify_with_action(task, "")
    }

    fn notify_with_action(&self, task: &Task, action: &str) -> Result<(), AppError> {
        let task_id = task.id.clone();
        let action_value = action.to_string();
        let mut toast = Toast::new(Toast::POWERSHELL_APP_ID)
            .title(&notification_title(task))
            .text1(&notification_body(task));

        if !action_value.trim().is_empty() {
            toast = toast.add_button("Open", &action_value);
        }

        toast
            .on_activated(move |args| {
                let id = args
                    .as_deref()
                    .and_then(parse_activation_argument)
                    .unwrap_or_else(|| task_id.clone());
                let _ = launch_show(&id);
                Ok(())
            })
            .show()
            .map_err(|err| AppError::delivery(err.to_string()))?;
        Ok(())
    }
}
