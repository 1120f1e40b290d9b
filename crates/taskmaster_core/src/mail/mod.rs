use crate::config::SmtpSettings;
use crate::error::AppError;
use crate::reminder::ReminderMessage;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

mod smtp;

pub use smtp::SmtpMailer;

/// Outbound "send message to address" capability used for reminder emails.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &ReminderMessage) -> Result<(), AppError>;
}

/// Stand-in channel used when no SMTP credentials are configured. The
/// message is written to the log instead of being delivered.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &ReminderMessage) -> Result<(), AppError> {
        info!(
            recipient = %message.recipient,
            subject = %message.subject,
            body = %message.body,
            "email delivery not configured, logging reminder instead"
        );
        Ok(())
    }
}

pub fn mailer_from_settings(settings: Option<&SmtpSettings>) -> Result<Arc<dyn Mailer>, AppError> {
    match settings {
        Some(settings) => Ok(Arc::new(SmtpMailer::new(settings)?)),
        None => Ok(Arc::new(LogMailer)),
    }
}

#[cfg(test)]
mod tests {
    use super::{LogMailer, Mailer, mailer_from_settings};
    use crate::config::SmtpSettings;
    use crate::reminder::ReminderMessage;

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        let message = ReminderMessage {
            recipient: "ada@example.com".to_string(),
            subject: "Task Reminder: demo".to_string(),
            body: "body".to_string(),
        };

        LogMailer.send(&message).await.unwrap();
    }

    #[tokio::test]
    async fn smtp_mailer_rejects_invalid_sender() {
        let settings = SmtpSettings {
            host: "smtp.example.com".to_string(),
            port: Some(2525),
            username: "bot".to_string(),
            password: "secret".to_string(),
            from: "not an address".to_string(),
        };

        let err = mailer_from_settings(Some(&settings)).err().unwrap();
        assert_eq!(err.code(), "invalid_data");
    }
}
