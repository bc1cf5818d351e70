//! Outbound notification transports.
//!
//! Each transport delivers a rendered [`Notification`] to a single address
//! on one [`Channel`]. The dispatcher holds at most one transport per
//! channel and treats every send as an opaque, fallible operation.
//!
//! - [`email`]: SMTP delivery through `lettre`
//! - [`sms`]: text messages through an HTTP SMS gateway

pub mod email;
pub mod sms;

use std::time::Duration;

use async_trait::async_trait;

use crate::model::Channel;

pub use email::{EmailConfig, EmailTransport};
pub use sms::{SmsConfig, SmsTransport};

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Subject line. Channels without subjects ignore it.
    pub subject: String,
    /// Message body.
    pub body: String,
}

/// Error type for a single failed send.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The underlying HTTP request failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The gateway answered with a non-2xx status.
    #[error("gateway returned HTTP {0}")]
    HttpStatus(u16),

    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The message could not be assembled.
    #[error("message build error: {0}")]
    Build(String),

    /// The send did not finish within the allowed time.
    #[error("send timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// No transport is configured for the channel.
    #[error("no {0} transport configured")]
    NotConfigured(Channel),
}

/// A delivery channel implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Channel this transport serves.
    fn channel(&self) -> Channel;

    /// Transport name for logs.
    fn name(&self) -> &str;

    /// Deliver `notification` to `to`.
    async fn send(&self, to: &str, notification: &Notification) -> Result<(), TransportError>;
}
