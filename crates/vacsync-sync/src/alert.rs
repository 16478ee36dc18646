//! Outbound failure notification over SMTP.

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use thiserror::Error;
use tracing::info;

/// Subject line used for run-failure notifications.
pub const ALERT_SUBJECT: &str = "vacancy sync is down";

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("invalid alert address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("building alert message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Delivers a diagnostic to a configured recipient. Failures of the alert
/// channel itself are the caller's problem to log, nothing more.
pub trait Alerter: Send + Sync {
    fn notify(&self, subject: &str, body: &str) -> Result<(), AlertError>;
}

/// STARTTLS SMTP relay alerter, credentials shared with the sender address.
pub struct SmtpAlerter {
    relay: String,
    sender: String,
    password: String,
    recipient: String,
}

impl SmtpAlerter {
    pub fn new(relay: String, sender: String, password: String, recipient: String) -> Self {
        Self {
            relay,
            sender,
            password,
            recipient,
        }
    }
}

impl Alerter for SmtpAlerter {
    fn notify(&self, subject: &str, body: &str) -> Result<(), AlertError> {
        let message = Message::builder()
            .from(self.sender.parse::<Mailbox>()?)
            .to(self.recipient.parse::<Mailbox>()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;

        let mailer = SmtpTransport::starttls_relay(&self.relay)?
            .credentials(Credentials::new(self.sender.clone(), self.password.clone()))
            .build();
        mailer.send(&message)?;
        info!(recipient = %self.recipient, "delivered failure alert");
        Ok(())
    }
}

/// Used when alert email is not configured.
pub struct NoopAlerter;

impl Alerter for NoopAlerter {
    fn notify(&self, _subject: &str, _body: &str) -> Result<(), AlertError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_alerter_swallows_notifications() {
        NoopAlerter
            .notify(ALERT_SUBJECT, "check it")
            .expect("noop never fails");
    }
}
