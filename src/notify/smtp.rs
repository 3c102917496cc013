use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::PoolConfig;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;

use super::{Notification, Notifier, NotifyError, Session};
use crate::config::SmtpSettings;

/// Sends notifications through an authenticated STARTTLS relay.
#[derive(Debug)]
pub struct SmtpNotifier {
    settings: SmtpSettings,
    from: Address,
}

impl SmtpNotifier {
    /// # Errors
    ///
    /// Returns [`NotifyError::Message`] if the sender address is not a valid
    /// mail address.
    pub fn new(settings: SmtpSettings) -> Result<Self, NotifyError> {
        let from = settings
            .from_address
            .parse::<Address>()
            .map_err(|e| {
                NotifyError::Message(format!(
                    "invalid sender address {:?}: {e}",
                    settings.from_address
                ))
            })?;

        Ok(Self { settings, from })
    }

    fn server(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    type Session = SmtpSession;

    /// Build the transport and check the server and credentials.
    ///
    /// The check runs on its own short-lived connection, which is closed
    /// before this returns. The session's sends then share one pooled
    /// connection, opened by the first send and reused until
    /// [`Session::close`]. A run therefore makes two connections: one to
    /// fail fast on bad credentials, one to deliver.
    async fn connect(&self) -> Result<SmtpSession, NotifyError> {
        let server = self.server();

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.settings.host)
            .map_err(|e| NotifyError::Connect {
                server: server.clone(),
                reason: e.to_string(),
            })?
            .port(self.settings.port)
            .credentials(Credentials::new(
                self.settings.username.clone(),
                self.settings.password.expose_secret().to_string(),
            ))
            // One connection, reused for every message of the run
            .pool_config(PoolConfig::new().max_size(1))
            .build();

        // Connecting authenticates, so a bad password surfaces here
        match transport.test_connection().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(NotifyError::Connect {
                    server,
                    reason: "server did not respond".to_string(),
                })
            }
            Err(e) if e.is_permanent() => {
                return Err(NotifyError::Auth {
                    server,
                    username: self.settings.username.clone(),
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                return Err(NotifyError::Connect {
                    server,
                    reason: e.to_string(),
                })
            }
        }

        tracing::info!(server = %server, "Connected to mail server");

        Ok(SmtpSession {
            transport,
            from: self.from.clone(),
        })
    }
}

/// Open SMTP session.
pub struct SmtpSession {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Address,
}

#[async_trait]
impl Session for SmtpSession {
    async fn send(
        &mut self,
        notification: &Notification,
        recipient: &str,
    ) -> Result<(), NotifyError> {
        let message = build_message(&self.from, notification, recipient)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Transport {
                recipient: recipient.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(subject = %notification.subject, recipient = %recipient, "Mail accepted");
        Ok(())
    }

    async fn close(self) -> Result<(), NotifyError> {
        // Dropping the transport closes its pooled connection
        drop(self.transport);
        Ok(())
    }
}

fn build_message(
    from: &Address,
    notification: &Notification,
    recipient: &str,
) -> Result<Message, NotifyError> {
    let to = recipient
        .parse::<Mailbox>()
        .map_err(|e| NotifyError::Message(format!("invalid recipient {recipient:?}: {e}")))?;

    Message::builder()
        .from(Mailbox::new(
            Some(notification.from_name.clone()),
            from.clone(),
        ))
        .to(to)
        .subject(notification.subject.as_str())
        .header(ContentType::TEXT_HTML)
        .body(notification.html_body.clone())
        .map_err(|e| NotifyError::Message(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn notification() -> Notification {
        Notification {
            from_name: "Food Blog".to_string(),
            subject: "Fish & Chips".to_string(),
            html_body: "<h1>Fish &amp; Chips</h1>".to_string(),
        }
    }

    fn settings(from_address: &str) -> SmtpSettings {
        SmtpSettings {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: "bot@example.com".to_string(),
            password: SecretString::from("hunter2"),
            from_address: from_address.to_string(),
        }
    }

    #[test]
    fn test_build_message_headers() {
        let from: Address = "bot@example.com".parse().unwrap();
        let message = build_message(&from, &notification(), "me@example.com").unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Food Blog"), "{raw}");
        assert!(raw.contains("<bot@example.com>"), "{raw}");
        assert!(raw.contains("To: me@example.com"), "{raw}");
        assert!(raw.contains("Subject: Fish & Chips"), "{raw}");
        assert!(raw.contains("Content-Type: text/html"), "{raw}");
        assert!(raw.contains("<h1>Fish &amp; Chips</h1>"), "{raw}");
    }

    #[test]
    fn test_build_message_rejects_bad_recipient() {
        let from: Address = "bot@example.com".parse().unwrap();
        let result = build_message(&from, &notification(), "not an address");
        assert!(matches!(result, Err(NotifyError::Message(_))));
    }

    #[test]
    fn test_new_rejects_bad_sender() {
        assert!(SmtpNotifier::new(settings("bot@example.com")).is_ok());
        assert!(matches!(
            SmtpNotifier::new(settings("no-at-sign")),
            Err(NotifyError::Message(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_unreachable_server() {
        let mut s = settings("bot@example.com");
        // Nothing listens on port 1 locally
        s.host = "127.0.0.1".to_string();
        s.port = 1;

        let notifier = SmtpNotifier::new(s).unwrap();
        let result = notifier.connect().await;
        assert!(
            matches!(result, Err(NotifyError::Connect { .. })),
            "Expected Connect error, got {:?}",
            result.map(|_| ())
        );
    }
}
