//! Outbound delivery of new items.
//!
//! A [`Notifier`] opens one [`Session`] per sync run, and the session sends
//! every notification of that run, one at a time.

mod render;
mod smtp;

use async_trait::async_trait;
use thiserror::Error;

pub use render::render_notification;
pub use smtp::SmtpNotifier;

/// Errors raised while delivering notifications. All of them end the run.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Could not connect to mail server {server}: {reason}")]
    Connect { server: String, reason: String },

    #[error("Mail server {server} rejected credentials for {username}: {reason}")]
    Auth {
        server: String,
        username: String,
        reason: String,
    },

    #[error("Failed to send mail to {recipient}: {reason}")]
    Transport { recipient: String, reason: String },

    /// The message could not be assembled (bad address, header, etc.)
    #[error("Could not build message: {0}")]
    Message(String),
}

/// One rendered message, ready to hand to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Sender display name; the feed's title or URL
    pub from_name: String,
    pub subject: String,
    pub html_body: String,
}

/// Opens delivery sessions.
#[async_trait]
pub trait Notifier: Send + Sync {
    type Session: Session;

    async fn connect(&self) -> Result<Self::Session, NotifyError>;
}

/// An open delivery session.
#[async_trait]
pub trait Session: Send {
    async fn send(&mut self, notification: &Notification, recipient: &str)
        -> Result<(), NotifyError>;

    async fn close(self) -> Result<(), NotifyError>;
}

// ============================================================================
// Dry Run
// ============================================================================

/// Notifier that logs each message instead of sending it.
///
/// Used to catch up a new subscription: every item is recorded as
/// delivered without any mail going out.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunNotifier;

/// Session of a [`DryRunNotifier`]; counts what it would have sent.
#[derive(Debug, Default)]
pub struct DryRunSession {
    skipped: usize,
}

#[async_trait]
impl Notifier for DryRunNotifier {
    type Session = DryRunSession;

    async fn connect(&self) -> Result<DryRunSession, NotifyError> {
        tracing::info!("Dry run: no mail will be sent");
        Ok(DryRunSession::default())
    }
}

#[async_trait]
impl Session for DryRunSession {
    async fn send(
        &mut self,
        notification: &Notification,
        recipient: &str,
    ) -> Result<(), NotifyError> {
        tracing::debug!(
            from = %notification.from_name,
            subject = %notification.subject,
            recipient = %recipient,
            "Dry run: not sending"
        );
        self.skipped += 1;
        Ok(())
    }

    async fn close(self) -> Result<(), NotifyError> {
        tracing::debug!(skipped = self.skipped, "Dry run session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_always_succeeds() {
        let mut session = DryRunNotifier.connect().await.unwrap();
        let notification = Notification {
            from_name: "Feed".to_string(),
            subject: "Hello".to_string(),
            html_body: "<h1>Hello</h1>".to_string(),
        };

        session.send(&notification, "").await.unwrap();
        session.send(&notification, "me@example.com").await.unwrap();
        assert_eq!(session.skipped, 2);
        session.close().await.unwrap();
    }
}
