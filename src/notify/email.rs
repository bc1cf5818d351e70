//! Email delivery via SMTP.
//!
//! [`EmailTransport`] wraps the `lettre` async SMTP transport. The mailer is
//! built once and reused for every send. Configuration comes from the
//! environment; without `SMTP_HOST` [`EmailConfig::from_lookup`] returns
//! `Ok(None)` and the email channel stays unconfigured.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use super::{Notification, Transport, TransportError};
use crate::config::{ConfigError, parse_var};
use crate::model::Channel;

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// Default sender address when `SMTP_FROM` is not set.
const DEFAULT_FROM_ADDRESS: &str = "Landslide System <alerts@soilwatch.local>";

/// Configuration for SMTP delivery.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// SMTP server hostname.
    pub smtp_host: String,
    /// SMTP server port (defaults to 587).
    pub smtp_port: u16,
    /// RFC 5322 "From" mailbox.
    pub from_address: String,
    /// Optional SMTP username.
    pub smtp_user: Option<String>,
    /// Optional SMTP password.
    pub smtp_password: Option<String>,
}

impl EmailConfig {
    /// Load configuration through `lookup` (usually the process environment).
    ///
    /// | Variable        | Required | Default                                     |
    /// |-----------------|----------|---------------------------------------------|
    /// | `SMTP_HOST`     | yes      |                                             |
    /// | `SMTP_PORT`     | no       | `587`                                       |
    /// | `SMTP_FROM`     | no       | `Landslide System <alerts@soilwatch.local>` |
    /// | `SMTP_USER`     | no       |                                             |
    /// | `SMTP_PASSWORD` | no       |                                             |
    ///
    /// A set but unparsable `SMTP_PORT` is an error rather than a silent
    /// fallback to the default.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        let Some(smtp_host) = lookup("SMTP_HOST") else {
            return Ok(None);
        };
        Ok(Some(Self {
            smtp_host,
            smtp_port: parse_var(&lookup, "SMTP_PORT", DEFAULT_SMTP_PORT)?,
            from_address: lookup("SMTP_FROM").unwrap_or_else(|| DEFAULT_FROM_ADDRESS.to_string()),
            smtp_user: lookup("SMTP_USER"),
            smtp_password: lookup("SMTP_PASSWORD"),
        }))
    }
}

/// Sends alert emails over SMTP.
pub struct EmailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailTransport {
    /// Build the SMTP mailer for `config`.
    pub fn new(config: &EmailConfig) -> Result<Self, TransportError> {
        let from: Mailbox = config.from_address.parse()?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }
}

/// Assemble the MIME message for one recipient.
fn build_message(
    from: &Mailbox,
    to: &str,
    notification: &Notification,
) -> Result<Message, TransportError> {
    Message::builder()
        .from(from.clone())
        .to(to.parse()?)
        .subject(notification.subject.as_str())
        .header(ContentType::TEXT_PLAIN)
        .body(notification.body.clone())
        .map_err(|e| TransportError::Build(e.to_string()))
}

#[async_trait]
impl Transport for EmailTransport {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, to: &str, notification: &Notification) -> Result<(), TransportError> {
        let message = build_message(&self.from, to, notification)?;
        self.mailer.send(message).await?;

        debug!(subject = %notification.subject, "Alert email accepted by SMTP relay");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn notification() -> Notification {
        Notification {
            subject: "LANDSLIDE DANGER ALERT".to_string(),
            body: "body".to_string(),
        }
    }

    #[test]
    fn test_from_lookup_returns_none_without_smtp_host() {
        let config = EmailConfig::from_lookup(lookup(&[("SMTP_PORT", "25")])).unwrap();
        assert!(config.is_none());
    }

    #[test]
    fn test_from_lookup_applies_defaults() {
        let config = EmailConfig::from_lookup(lookup(&[("SMTP_HOST", "smtp.example.com")]))
            .unwrap()
            .unwrap();
        assert_eq!(config.smtp_port, 587);
        assert_eq!(config.from_address, DEFAULT_FROM_ADDRESS);
        assert!(config.smtp_user.is_none());
    }

    #[test]
    fn test_from_lookup_rejects_bad_port() {
        let err = EmailConfig::from_lookup(lookup(&[
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_PORT", "not-a-port"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "SMTP_PORT"));
    }

    #[test]
    fn test_build_message_rejects_bad_recipient() {
        let from: Mailbox = DEFAULT_FROM_ADDRESS.parse().unwrap();
        let err = build_message(&from, "not-an-email", &notification()).unwrap_err();
        assert!(matches!(err, TransportError::Address(_)));
        assert!(err.to_string().contains("email address parse error"));
    }

    #[test]
    fn test_build_message_accepts_valid_recipient() {
        let from: Mailbox = DEFAULT_FROM_ADDRESS.parse().unwrap();
        assert!(build_message(&from, "resident@example.com", &notification()).is_ok());
    }

    #[test]
    fn test_new_rejects_bad_sender() {
        let config = EmailConfig {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            from_address: "nobody".to_string(),
            smtp_user: None,
            smtp_password: None,
        };
        assert!(matches!(
            EmailTransport::new(&config),
            Err(TransportError::Address(_))
        ));
    }
}
