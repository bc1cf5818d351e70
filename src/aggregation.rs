//! Aggregation of raw feed entries into system snapshots.
//!
//! Each feed update is turned into a fresh [`SystemSnapshot`]: every valid
//! sensor is classified against the thresholds in force, its staleness is
//! checked against the freshness window, and the system risk is the maximum
//! risk over all valid sensors. Nothing here has side effects.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::feed::FeedUpdate;
use crate::model::{
    DEFAULT_SENSOR_NAME, Freshness, RiskLevel, SensorNames, SensorReading, SystemSnapshot,
    Thresholds,
};

/// Age after which a sensor is considered offline.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);

/// Whether a reading taken at `last_timestamp` is stale at `now`.
///
/// Offline iff `now - last_timestamp > window`; an age exactly equal to the
/// window is still fresh. Both timestamps are epoch seconds.
pub fn is_offline(last_timestamp: i64, now: i64, window: Duration) -> bool {
    let window = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
    now.saturating_sub(last_timestamp) > window
}

/// Freshness of a reading, distinguishing "no timestamp" from "stale".
pub fn freshness(last_timestamp: Option<i64>, now: i64, window: Duration) -> Freshness {
    match last_timestamp {
        None => Freshness::NoData,
        Some(ts) if is_offline(ts, now, window) => Freshness::Offline,
        Some(_) => Freshness::Fresh,
    }
}

/// Build the snapshot for one feed update.
///
/// Malformed entries carried by `update` are listed in
/// [`SystemSnapshot::excluded`] and take no part in the aggregate risk.
/// A name in `names` overrides the one the device published.
pub fn build_snapshot(
    update: &FeedUpdate,
    thresholds: &Thresholds,
    names: &SensorNames,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> SystemSnapshot {
    let now_ts = now.timestamp();

    let sensors: Vec<SensorReading> = update
        .sensors
        .iter()
        .map(|(id, raw)| SensorReading {
            id: id.clone(),
            name: names
                .get(id)
                .or(raw.name.as_ref())
                .cloned()
                .unwrap_or_else(|| DEFAULT_SENSOR_NAME.to_string()),
            moisture: raw.moisture.unwrap_or(0.0),
            timestamp: raw.timestamp,
            risk: RiskLevel::classify(raw.moisture, thresholds),
            freshness: freshness(raw.timestamp, now_ts, stale_after),
        })
        .collect();

    let risk = sensors
        .iter()
        .map(|s| s.risk)
        .max()
        .unwrap_or(RiskLevel::Safe);

    SystemSnapshot {
        evaluated_at: now,
        risk,
        sensors,
        excluded: update.malformed.clone(),
    }
}

/// Pick the sensor an alert should be about.
///
/// Among sensors at Danger, the highest moisture wins; equal moisture is
/// broken by the lexicographically smallest identifier. Returns `None` when
/// no sensor is at Danger.
pub fn select_alert_sensor(snapshot: &SystemSnapshot) -> Option<&SensorReading> {
    snapshot
        .sensors
        .iter()
        .filter(|s| s.risk == RiskLevel::Danger)
        .min_by(|a, b| {
            b.moisture
                .partial_cmp(&a.moisture)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        })
}
