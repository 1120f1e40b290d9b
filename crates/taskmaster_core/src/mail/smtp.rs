use crate::config::SmtpSettings;
use crate::error::AppError;
use crate::mail::Mailer;
use crate::reminder::ReminderMessage;
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings) -> Result<Self, AppError> {
        let from: Mailbox = settings.from.parse().map_err(|err| {
            AppError::invalid_data(format!("invalid sender '{}': {}", settings.from, err))
        })?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
            .map_err(|err| AppError::invalid_data(format!("smtp relay {}: {}", settings.host, err)))?
            .credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ));
        if let Some(port) = settings.port {
            builder = builder.port(port);
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &ReminderMessage) -> Result<(), AppError> {
        let to: Mailbox = message.recipient.parse().map_err(|err| {
            AppError::delivery(format!("invalid recipient '{}': {}", message.recipient, err))
        })?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|err| AppError::delivery(err.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|err| AppError::delivery(err.to_string()))?;
        Ok(())
    }
}
