//! Alert episode tracking.
//!
//! [`AlertTracker`] is an edge trigger over the stream of system snapshots.
//! It has two states:
//!
//! - `Clear`: no sensor is at Danger.
//! - `Alerting`: a danger episode is in progress.
//!
//! Entering Danger from `Clear` opens an episode and yields exactly one
//! [`Transition::Triggered`]. Further Danger snapshots are swallowed until
//! the aggregate risk drops below Danger, which closes the episode. Closing
//! an episode sends nothing; there is no "all clear" notification.
//!
//! The tracker relies on observing snapshots in feed order. It is owned by a
//! single engine and is never shared without that engine's lock.

use crate::aggregation::select_alert_sensor;
use crate::model::{AlertEpisode, RiskLevel, SystemSnapshot};

/// Current state of the tracker.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AlertState {
    #[default]
    Clear,
    Alerting(AlertEpisode),
}

/// Result of observing one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Clear -> Alerting. The episode should be dispatched.
    Triggered(AlertEpisode),
    /// Alerting -> Clear.
    Cleared,
    /// No state change.
    Unchanged,
}

#[derive(Debug, Default)]
pub struct AlertTracker {
    state: AlertState,
}

impl AlertTracker {
    /// Create a tracker in the `Clear` state.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AlertState {
        &self.state
    }

    pub fn is_alerting(&self) -> bool {
        matches!(self.state, AlertState::Alerting(_))
    }

    /// The episode in progress, if any.
    pub fn current_episode(&self) -> Option<&AlertEpisode> {
        match &self.state {
            AlertState::Alerting(episode) => Some(episode),
            AlertState::Clear => None,
        }
    }

    /// Advance the state machine with the next snapshot.
    pub fn observe(&mut self, snapshot: &SystemSnapshot) -> Transition {
        let in_danger = snapshot.risk == RiskLevel::Danger;

        match (&self.state, in_danger) {
            (AlertState::Clear, true) => {
                let Some(sensor) = select_alert_sensor(snapshot) else {
                    return Transition::Unchanged;
                };
                let episode = AlertEpisode {
                    sensor_id: sensor.id.clone(),
                    sensor_name: sensor.name.clone(),
                    moisture: sensor.moisture,
                    reading_timestamp: sensor.timestamp,
                    triggered_at: snapshot.evaluated_at,
                };
                self.state = AlertState::Alerting(episode.clone());
                Transition::Triggered(episode)
            }
            (AlertState::Alerting(_), false) => {
                self.state = AlertState::Clear;
                Transition::Cleared
            }
            _ => Transition::Unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{DEFAULT_STALE_AFTER, build_snapshot};
    use crate::feed::FeedUpdate;
    use crate::model::{SensorNames, Thresholds};
    use chrono::{DateTime, Utc};
    use serde_json::json;

    fn snap(value: serde_json::Value) -> SystemSnapshot {
        let now: DateTime<Utc> = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        build_snapshot(
            &FeedUpdate::parse(&value),
            &Thresholds::default(),
            &SensorNames::new(),
            now,
            DEFAULT_STALE_AFTER,
        )
    }

    fn single(moisture: f64) -> SystemSnapshot {
        snap(json!({ "sensor1": { "name": "Hillside", "moisture": moisture, "timestamp": 1_700_000_000 } }))
    }

    fn count_triggers(tracker: &mut AlertTracker, seq: &[f64]) -> usize {
        seq.iter()
            .filter(|m| matches!(tracker.observe(&single(**m)), Transition::Triggered(_)))
            .count()
    }

    #[test]
    fn test_starts_clear() {
        let tracker = AlertTracker::new();
        assert_eq!(tracker.state(), &AlertState::Clear);
        assert!(!tracker.is_alerting());
    }

    #[test]
    fn test_repeated_danger_triggers_once() {
        let mut tracker = AlertTracker::new();
        assert_eq!(count_triggers(&mut tracker, &[80.0, 80.0]), 1);
        assert!(tracker.is_alerting());
    }

    #[test]
    fn test_edge_trigger_sequence() {
        // Safe -> Danger -> Danger -> Safe -> Danger
        let mut tracker = AlertTracker::new();
        assert_eq!(
            count_triggers(&mut tracker, &[30.0, 80.0, 85.0, 30.0, 80.0]),
            2
        );
    }

    #[test]
    fn test_warning_clears_episode() {
        let mut tracker = AlertTracker::new();
        assert!(matches!(tracker.observe(&single(80.0)), Transition::Triggered(_)));
        assert_eq!(tracker.observe(&single(70.0)), Transition::Cleared);
        assert_eq!(tracker.observe(&single(70.0)), Transition::Unchanged);
        assert!(!tracker.is_alerting());
    }

    #[test]
    fn test_clear_to_clear_is_noop() {
        let mut tracker = AlertTracker::new();
        assert_eq!(tracker.observe(&single(10.0)), Transition::Unchanged);
        assert_eq!(tracker.state(), &AlertState::Clear);
    }

    #[test]
    fn test_episode_carries_trigger_reading() {
        let mut tracker = AlertTracker::new();
        let Transition::Triggered(episode) = tracker.observe(&single(80.0)) else {
            panic!("expected trigger");
        };
        assert_eq!(episode.sensor_id, "sensor1");
        assert_eq!(episode.sensor_name, "Hillside");
        assert_eq!(episode.moisture, 80.0);
        assert_eq!(episode.reading_timestamp, Some(1_700_000_000));

        // The episode is not replaced by later, higher readings
        tracker.observe(&single(95.0));
        assert_eq!(tracker.current_episode().unwrap().moisture, 80.0);
    }

    #[test]
    fn test_multiple_danger_sensors_emit_one_event() {
        let mut tracker = AlertTracker::new();
        let transition = tracker.observe(&snap(json!({
            "sensor1": { "moisture": 82, "timestamp": 1_700_000_000 },
            "sensor2": { "moisture": 90, "timestamp": 1_700_000_000 }
        })));
        let Transition::Triggered(episode) = transition else {
            panic!("expected trigger");
        };
        assert_eq!(episode.sensor_id, "sensor2");
        assert_eq!(episode.moisture, 90.0);
    }

    #[test]
    fn test_malformed_danger_sensor_does_not_trigger() {
        let mut tracker = AlertTracker::new();
        let transition = tracker.observe(&snap(json!({
            "sensor1": { "moisture": "99", "timestamp": 1_700_000_000 },
            "sensor2": { "moisture": 20, "timestamp": 1_700_000_000 }
        })));
        assert_eq!(transition, Transition::Unchanged);
    }

    #[test]
    fn test_malformed_update_clears_when_no_valid_danger_remains() {
        let mut tracker = AlertTracker::new();
        tracker.observe(&single(80.0));
        let transition = tracker.observe(&snap(json!({ "sensor1": [1, 2] })));
        assert_eq!(transition, Transition::Cleared);
    }
}
