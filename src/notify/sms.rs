//! SMS delivery through the Semaphore HTTP gateway.
//!
//! Each send is a single JSON POST:
//!
//! ```json
//! { "apikey": "...", "number": "09171234567", "message": "...", "sendername": "SOILWATCH" }
//! ```
//!
//! Any non-2xx answer counts as a failed send.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::{Notification, Transport, TransportError};
use crate::model::Channel;

/// Default gateway endpoint.
const SEMAPHORE_API_URL: &str = "https://api.semaphore.co/api/v4/messages";

/// Configuration for the SMS gateway.
#[derive(Debug, Clone)]
pub struct SmsConfig {
    /// Gateway API key.
    pub api_key: String,
    /// Messages endpoint.
    pub api_url: String,
    /// Registered sender name, if any.
    pub sender_name: Option<String>,
}

impl SmsConfig {
    /// Load configuration through `lookup`. Returns `None` without `SMS_API_KEY`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let api_key = lookup("SMS_API_KEY")?;
        Some(Self {
            api_key,
            api_url: lookup("SMS_API_URL").unwrap_or_else(|| SEMAPHORE_API_URL.to_string()),
            sender_name: lookup("SMS_SENDER_NAME"),
        })
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    apikey: &'a str,
    number: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sendername: Option<&'a str>,
}

/// Client for the SMS gateway.
#[derive(Clone)]
pub struct SmsTransport {
    client: reqwest::Client,
    config: SmsConfig,
}

impl SmsTransport {
    pub fn new(config: SmsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Transport for SmsTransport {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn name(&self) -> &str {
        "semaphore"
    }

    async fn send(&self, to: &str, notification: &Notification) -> Result<(), TransportError> {
        let request = SendRequest {
            apikey: &self.config.api_key,
            number: to,
            message: &notification.body,
            sendername: self.config.sender_name.as_deref(),
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::HttpStatus(response.status().as_u16()));
        }

        debug!(status = response.status().as_u16(), "SMS accepted by gateway");
        Ok(())
    }
}
