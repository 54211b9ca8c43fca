//! Outgoing mail. Without a configured SMTP host messages are only logged.

use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    address::AddressError,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use snapgram_common::model::{activation::ActivationCode, user::EmailAddress};
use std::fmt::{Debug, Formatter};
use thiserror::Error;
use tracing::info;

pub const ACTIVATION_SUBJECT: &str = "Confirm your registration";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid mail address: {0}")]
    Address(#[from] AddressError),
    #[error("Building the message failed: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: String,
    pub smtp_starttls: bool,
}

pub struct Mailer {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
}

impl Debug for Mailer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailer")
            .field("from", &self.from)
            .field("smtp", &self.transport.is_some())
            .finish()
    }
}

impl Mailer {
    pub fn new(config: &MailConfig) -> Result<Self, MailError> {
        let from = config.smtp_from.parse::<Mailbox>()?;

        if config.smtp_host.trim().is_empty() {
            info!("No SMTP host configured, mail will only be logged");
            return Ok(Self::log_only(from));
        }

        let builder = if config.smtp_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?
        }
        .port(config.smtp_port);

        let builder = match (&config.smtp_username, &config.smtp_password) {
            (Some(username), Some(password)) => {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            }
            _ => builder,
        };

        Ok(Self {
            transport: Some(builder.build()),
            from,
        })
    }

    #[must_use]
    pub fn log_only(from: Mailbox) -> Self {
        Self {
            transport: None,
            from,
        }
    }

    pub async fn send_activation_code(
        &self,
        recipient: &EmailAddress,
        code: ActivationCode,
    ) -> Result<(), MailError> {
        let body = activation_body(code);
        self.send(recipient, ACTIVATION_SUBJECT, body).await
    }

    async fn send(
        &self,
        recipient: &EmailAddress,
        subject: &str,
        body: String,
    ) -> Result<(), MailError> {
        let Some(transport) = &self.transport else {
            info!(
                recipient = recipient.get(),
                subject,
                body = body.as_str(),
                "Not sending mail"
            );
            return Ok(());
        };

        let message = Message::builder()
            .from(self.from.clone())
            .to(recipient.get().parse::<Mailbox>()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)?;

        transport.send(message).await?;
        info!(recipient = recipient.get(), subject, "Sent mail");

        Ok(())
    }
}

fn activation_body(code: ActivationCode) -> String {
    format!("Please confirm your email address to get full access to Snapgram.\n {code}")
}
