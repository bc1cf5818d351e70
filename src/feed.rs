//! Sensor feed input.
//!
//! The feed delivers a JSON object keyed by sensor identifier:
//!
//! ```json
//! {
//!     "sensor1": { "name": "Hillside", "moisture": 82, "timestamp": 1718000000, "status": "Danger" },
//!     "sensor2": { "moisture": 41, "timestamp": 1718000000 }
//! }
//! ```
//!
//! Devices write this object directly, so entries are parsed leniently:
//! a sensor whose entry is missing is simply absent, and a sensor whose entry
//! is malformed is reported in [`FeedUpdate::malformed`] and left out of the
//! update. The `status` field written by devices is ignored because risk is
//! recomputed from the current thresholds.
//!
//! [`FeedClient`] polls a realtime-database REST endpoint for the same
//! object and pushes each change into the engine's ordered update channel.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One sensor entry as written by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSensor {
    pub name: Option<String>,
    pub moisture: Option<f64>,
    pub timestamp: Option<i64>,
}

/// A parsed feed update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedUpdate {
    /// Valid sensor entries keyed by identifier.
    pub sensors: BTreeMap<String, RawSensor>,

    /// Identifiers of entries that were present but unusable.
    pub malformed: Vec<String>,
}

impl FeedUpdate {
    /// Parse a raw feed value.
    ///
    /// A value that is not an object yields an empty update. Within the
    /// object, `null` entries are treated as absent; an entry is malformed
    /// when it is not an object, when `moisture` or `timestamp` has the
    /// wrong type, or when it carries neither a moisture nor a timestamp.
    pub fn parse(value: &Value) -> Self {
        let Some(entries) = value.as_object() else {
            if !value.is_null() {
                warn!("Feed update is not an object; ignoring all entries");
            }
            return Self::default();
        };

        let mut update = Self::default();
        for (id, entry) in entries {
            if entry.is_null() {
                continue;
            }
            match parse_sensor(entry) {
                Some(sensor) => {
                    update.sensors.insert(id.clone(), sensor);
                }
                None => update.malformed.push(id.clone()),
            }
        }
        update
    }
}

fn parse_sensor(entry: &Value) -> Option<RawSensor> {
    let fields = entry.as_object()?;

    let moisture = match fields.get("moisture") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(n.as_f64()?),
        Some(_) => return None,
    };

    let timestamp = match fields.get("timestamp") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(match n.as_i64() {
            Some(ts) => ts,
            None => n.as_f64()?.trunc() as i64,
        }),
        Some(_) => return None,
    };

    if moisture.is_none() && timestamp.is_none() {
        return None;
    }

    Some(RawSensor {
        name: display_name(fields),
        moisture,
        timestamp,
    })
}

fn display_name(fields: &Map<String, Value>) -> Option<String> {
    fields
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Polling client
// ============================================================================

/// Path of the latest-readings node under the database root.
const LATEST_PATH: &str = "sensors/latest.json";

/// Client for polling the latest sensor readings over REST.
#[derive(Clone)]
pub struct FeedClient {
    client: reqwest::Client,
    base_url: String,
    auth: Option<String>,
}

impl FeedClient {
    /// Create a client for the database rooted at `base_url`.
    pub fn new(base_url: &str, auth: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    fn latest_url(&self) -> String {
        match &self.auth {
            Some(token) => format!(
                "{}/{}?auth={}",
                self.base_url,
                LATEST_PATH,
                urlencoding::encode(token)
            ),
            None => format!("{}/{}", self.base_url, LATEST_PATH),
        }
    }

    /// Fetch the current readings. Returns `None` when the node is empty.
    pub async fn fetch_latest(&self) -> anyhow::Result<Option<Value>> {
        let response = self
            .client
            .get(self.latest_url())
            .send()
            .await?
            .error_for_status()?;
        let body = response.json::<Value>().await?;
        Ok(if body.is_null() { None } else { Some(body) })
    }

    /// Poll until the receiving side of `updates` is dropped.
    ///
    /// Only bodies that differ from the previous one are forwarded, so an
    /// idle device does not append duplicate history points. Fetch errors
    /// are logged and polling continues.
    pub async fn poll(self, updates: mpsc::Sender<Value>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut previous: Option<Value> = None;

        info!(base_url = %self.base_url, interval_secs = interval.as_secs(), "Feed poller started");

        loop {
            ticker.tick().await;

            let body = match self.fetch_latest().await {
                Ok(Some(body)) => body,
                Ok(None) => {
                    debug!("Feed node is empty");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to poll sensor feed");
                    continue;
                }
            };

            if previous.as_ref() == Some(&body) {
                continue;
            }
            previous = Some(body.clone());

            if updates.send(body).await.is_err() {
                info!("Update channel closed; feed poller stopping");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_entries() {
        let update = FeedUpdate::parse(&json!({
            "sensor1": { "name": "Hillside", "moisture": 82, "timestamp": 1_700_000_000, "status": "Danger" },
            "sensor2": { "moisture": 41.5, "timestamp": 1_700_000_001 }
        }));

        assert!(update.malformed.is_empty());
        assert_eq!(update.sensors.len(), 2);

        let s1 = &update.sensors["sensor1"];
        assert_eq!(s1.name.as_deref(), Some("Hillside"));
        assert_eq!(s1.moisture, Some(82.0));
        assert_eq!(s1.timestamp, Some(1_700_000_000));

        let s2 = &update.sensors["sensor2"];
        assert_eq!(s2.name, None);
        assert_eq!(s2.moisture, Some(41.5));
    }

    #[test]
    fn test_parse_null_entry_is_absent_not_malformed() {
        let update = FeedUpdate::parse(&json!({
            "sensor1": null,
            "sensor2": { "moisture": 10, "timestamp": 5 }
        }));

        assert!(update.malformed.is_empty());
        assert_eq!(update.sensors.len(), 1);
        assert!(update.sensors.contains_key("sensor2"));
    }

    #[test]
    fn test_parse_malformed_entries_are_reported() {
        let update = FeedUpdate::parse(&json!({
            "a": "not an object",
            "b": { "moisture": "high", "timestamp": 5 },
            "c": { "moisture": 20, "timestamp": "yesterday" },
            "d": { "name": "empty" },
            "e": { "moisture": 30 }
        }));

        assert_eq!(update.malformed, vec!["a", "b", "c", "d"]);
        assert_eq!(update.sensors.len(), 1);
        assert_eq!(update.sensors["e"].timestamp, None);
    }

    #[test]
    fn test_parse_fractional_timestamp_truncates() {
        let update = FeedUpdate::parse(&json!({
            "sensor1": { "moisture": 1, "timestamp": 1_700_000_000.9 }
        }));
        assert_eq!(update.sensors["sensor1"].timestamp, Some(1_700_000_000));
    }

    #[test]
    fn test_parse_blank_name_is_unset() {
        let update = FeedUpdate::parse(&json!({
            "sensor1": { "name": "   ", "moisture": 1, "timestamp": 1 }
        }));
        assert_eq!(update.sensors["sensor1"].name, None);
    }

    #[test]
    fn test_parse_non_object_snapshot() {
        assert_eq!(FeedUpdate::parse(&json!([1, 2, 3])), FeedUpdate::default());
        assert_eq!(FeedUpdate::parse(&Value::Null), FeedUpdate::default());
    }

    #[test]
    fn test_latest_url_encodes_auth() {
        let client = FeedClient::new("https://db.example.com/", Some("a b&c".to_string()));
        assert_eq!(
            client.latest_url(),
            "https://db.example.com/sensors/latest.json?auth=a%20b%26c"
        );

        let client = FeedClient::new("https://db.example.com", None);
        assert_eq!(
            client.latest_url(),
            "https://db.example.com/sensors/latest.json"
        );
    }
}
