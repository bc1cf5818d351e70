//! Notification dispatch.
//!
//! A triggered [`AlertEpisode`] is rendered once per channel and sent to
//! every resolved recipient. Sends run concurrently, each bounded by a
//! timeout, and every send is attempted regardless of how the others fare.
//! Individual failures are recorded in the [`DispatchSummary`]; only a
//! directory failure makes the dispatch itself fail.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use crate::model::{
    AlertEpisode, Channel, DeliveryResult, DispatchSummary, Recipient, format_moisture,
};
use crate::notify::{Notification, Transport, TransportError};
use crate::recipients::RecipientResolver;

/// Upper bound on a single send attempt.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Subject line of alert emails.
pub const ALERT_SUBJECT: &str = "LANDSLIDE DANGER ALERT";

/// Advisory sentence closing every alert.
pub const ADVISORY: &str = "Please take precautions immediately.";

/// Structural dispatch failure.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The recipient directory could not be queried.
    #[error("recipient directory unavailable: {0:#}")]
    DirectoryUnavailable(anyhow::Error),
}

/// Render the alert for one channel.
///
/// Output depends only on the episode's sensor name and moisture.
pub fn compose(episode: &AlertEpisode, channel: Channel) -> Notification {
    let moisture = format_moisture(episode.moisture);
    let body = match channel {
        Channel::Email => format!(
            "LANDSLIDE ALERT!\n\
             Location: {}\n\
             Soil moisture reached {}%.\n\
             Status: DANGER\n\
             {}",
            episode.sensor_name, moisture, ADVISORY
        ),
        Channel::Sms => format!(
            "LANDSLIDE ALERT! {}: soil moisture reached {}%. Status: DANGER. {}",
            episode.sensor_name, moisture, ADVISORY
        ),
    };

    Notification {
        subject: ALERT_SUBJECT.to_string(),
        body,
    }
}

/// Fans alert episodes out to recipients.
pub struct Dispatcher {
    resolver: RecipientResolver,
    email: Option<Arc<dyn Transport>>,
    sms: Option<Arc<dyn Transport>>,
    send_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher with no transports configured.
    pub fn new(resolver: RecipientResolver) -> Self {
        Self {
            resolver,
            email: None,
            sms: None,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Install `transport` for the channel it serves, replacing any previous one.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        match transport.channel() {
            Channel::Email => self.email = Some(transport),
            Channel::Sms => self.sms = Some(transport),
        }
        self
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    fn transport(&self, channel: Channel) -> Option<&Arc<dyn Transport>> {
        match channel {
            Channel::Email => self.email.as_ref(),
            Channel::Sms => self.sms.as_ref(),
        }
    }

    /// Resolve the current recipients and dispatch `episode` to them.
    pub async fn resolve_and_dispatch(
        &self,
        episode: &AlertEpisode,
    ) -> Result<DispatchSummary, DispatchError> {
        let recipients = self
            .resolver
            .resolve()
            .await
            .map_err(DispatchError::DirectoryUnavailable)?;

        if recipients.is_empty() {
            info!(sensor = %episode.sensor_id, "No alert recipients registered; nothing to send");
            return Ok(DispatchSummary::default());
        }

        Ok(self.dispatch(episode, &recipients).await)
    }

    /// Send `episode` to every recipient, one attempt each.
    pub async fn dispatch(&self, episode: &AlertEpisode, recipients: &[Recipient]) -> DispatchSummary {
        let email = compose(episode, Channel::Email);
        let sms = compose(episode, Channel::Sms);

        let sends = recipients.iter().map(|recipient| {
            let notification = match recipient.channel {
                Channel::Email => &email,
                Channel::Sms => &sms,
            };
            self.send_one(recipient, notification)
        });
        let summary = DispatchSummary::from_results(join_all(sends).await);

        info!(
            sensor = %episode.sensor_id,
            moisture = episode.moisture,
            sent = summary.sent,
            failed = summary.failed,
            "Alert dispatched"
        );
        summary
    }

    async fn send_one(&self, recipient: &Recipient, notification: &Notification) -> DeliveryResult {
        let outcome = match self.transport(recipient.channel) {
            None => Err(TransportError::NotConfigured(recipient.channel)),
            Some(transport) => {
                match tokio::time::timeout(
                    self.send_timeout,
                    transport.send(&recipient.address, notification),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout(self.send_timeout)),
                }
            }
        };

        let error = outcome.err().map(|e| {
            warn!(
                channel = %recipient.channel,
                transport = self.transport(recipient.channel).map_or("none", |t| t.name()),
                user_id = %recipient.user_id,
                error = %e,
                "Alert delivery failed"
            );
            e.to_string()
        });

        DeliveryResult {
            channel: recipient.channel,
            address: recipient.address.clone(),
            user_id: recipient.user_id.clone(),
            success: error.is_none(),
            error,
        }
    }
}
