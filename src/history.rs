//! Bounded window of recent readings for charting and export.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{HistoryPoint, SystemSnapshot, format_moisture};

/// Number of points retained by default.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Sensor plotted in the first history column.
pub const PRIMARY_SENSOR: &str = "sensor1";

/// Sensor plotted in the second history column.
pub const SECONDARY_SENSOR: &str = "sensor2";

/// Time-ascending ring of the most recent history points.
#[derive(Debug, Clone)]
pub struct HistoryWindow {
    capacity: usize,
    points: VecDeque<HistoryPoint>,
}

impl HistoryWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            points: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a point derived from `snapshot`.
    ///
    /// The point's time is the newest device timestamp in the snapshot.
    /// Snapshots without any timestamp, and snapshots older than the newest
    /// retained point, are dropped. Returns whether a point was appended.
    pub fn record(&mut self, snapshot: &SystemSnapshot) -> bool {
        let Some(time) = snapshot
            .latest_timestamp()
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        else {
            return false;
        };

        if self.points.back().is_some_and(|last| time < last.time) {
            return false;
        }

        let moisture = |id: &str| snapshot.sensor(id).map_or(0.0, |s| s.moisture);
        self.points.push_back(HistoryPoint {
            time,
            sensor1: moisture(PRIMARY_SENSOR),
            sensor2: moisture(SECONDARY_SENSOR),
        });

        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
        true
    }

    /// Retained points, oldest first.
    pub fn points(&self) -> Vec<HistoryPoint> {
        self.points.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Render the retained window as CSV with a `time,sensor1,sensor2` header.
    pub fn to_csv(&self) -> anyhow::Result<String> {
        // Header is written explicitly so an empty window still has one
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(["time", PRIMARY_SENSOR, SECONDARY_SENSOR])?;
        for point in &self.points {
            writer.serialize(ExportRow {
                time: format_export_time(point.time),
                sensor1: format_moisture(point.sensor1),
                sensor2: format_moisture(point.sensor2),
            })?;
        }

        let bytes = writer.into_inner().map_err(|e| e.into_error())?;
        Ok(String::from_utf8(bytes)?)
    }
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

#[derive(Serialize)]
struct ExportRow {
    time: String,
    sensor1: String,
    sensor2: String,
}

/// Render a timestamp as `M/D/YYYY, h:mm:ss AM|PM` (UTC).
pub fn format_export_time(time: DateTime<Utc>) -> String {
    time.format("%-m/%-d/%Y, %-I:%M:%S %p").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{DEFAULT_STALE_AFTER, build_snapshot};
    use crate::feed::FeedUpdate;
    use crate::model::{SensorNames, Thresholds};
    use serde_json::json;

    fn snap(value: serde_json::Value) -> SystemSnapshot {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        build_snapshot(
            &FeedUpdate::parse(&value),
            &Thresholds::default(),
            &SensorNames::new(),
            now,
            DEFAULT_STALE_AFTER,
        )
    }

    fn reading(ts: i64, m1: f64, m2: f64) -> SystemSnapshot {
        snap(json!({
            "sensor1": { "moisture": m1, "timestamp": ts },
            "sensor2": { "moisture": m2, "timestamp": ts }
        }))
    }

    #[test]
    fn test_window_keeps_last_twenty_oldest_first() {
        let mut history = HistoryWindow::default();
        for i in 0..25 {
            assert!(history.record(&reading(1000 + i, i as f64, 0.0)));
        }

        let points = history.points();
        assert_eq!(points.len(), 20);
        assert_eq!(points[0].sensor1, 5.0);
        assert_eq!(points[19].sensor1, 24.0);
        assert!(points.windows(2).all(|w| w[0].time <= w[1].time));
    }

    #[test]
    fn test_missing_timestamp_is_dropped() {
        let mut history = HistoryWindow::default();
        assert!(!history.record(&snap(json!({ "sensor1": { "moisture": 40 } }))));
        assert!(history.is_empty());
    }

    #[test]
    fn test_absent_sensor_records_zero() {
        let mut history = HistoryWindow::default();
        history.record(&snap(json!({ "sensor2": { "moisture": 33, "timestamp": 10 } })));
        let point = &history.points()[0];
        assert_eq!(point.sensor1, 0.0);
        assert_eq!(point.sensor2, 33.0);
    }

    #[test]
    fn test_out_of_order_point_is_dropped() {
        let mut history = HistoryWindow::default();
        assert!(history.record(&reading(200, 1.0, 1.0)));
        assert!(!history.record(&reading(100, 2.0, 2.0)));
        assert!(history.record(&reading(200, 3.0, 3.0)));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_export_csv() {
        let mut history = HistoryWindow::default();
        // 2024-01-15 15:04:05 UTC
        history.record(&reading(1_705_331_045, 80.0, 41.5));

        let csv = history.to_csv().unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("time,sensor1,sensor2"));
        assert_eq!(lines.next(), Some("\"1/15/2024, 3:04:05 PM\",80,41.5"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_export_empty_window_has_header() {
        let csv = HistoryWindow::default().to_csv().unwrap();
        assert_eq!(csv, "time,sensor1,sensor2\n");
    }
}
