//! Data models for SoilWatch.
//!
//! Everything the engine passes between its stages lives here: readings as
//! they come off the feed, the thresholds that classify them, the aggregated
//! system snapshot, alert episodes, and the recipients and delivery results
//! produced when an episode is dispatched.
//!
//! Types in this module are plain data. Classification is the only logic
//! that lives here, because it is a pure function of a reading and the
//! thresholds.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display name used when a sensor has no configured name.
pub const DEFAULT_SENSOR_NAME: &str = "Unknown Location";

/// Default upper bound (exclusive) of the Safe band.
pub const DEFAULT_SAFE_THRESHOLD: f64 = 60.0;

/// Default upper bound (exclusive) of the Warning band.
pub const DEFAULT_WARNING_THRESHOLD: f64 = 75.0;

/// Default raw probe reading in dry soil.
pub const DEFAULT_CALIBRATION_DRY: f64 = 3300.0;

/// Default raw probe reading in saturated soil.
pub const DEFAULT_CALIBRATION_WET: f64 = 1400.0;

/// Error type for rejected runtime settings.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    /// A value is NaN or infinite.
    #[error("{0} must be a finite number")]
    NotFinite(&'static str),

    /// A value is below zero.
    #[error("{field} must not be negative (got {value})")]
    Negative { field: &'static str, value: f64 },

    /// The Safe band ends above the Warning band.
    #[error("safe threshold {safe} exceeds warning threshold {warning}")]
    SafeAboveWarning { safe: f64, warning: f64 },

    /// Dry and wet calibration points coincide.
    #[error("dry and wet calibration points must differ (both {0})")]
    CalibrationCollapsed(f64),

    /// A sensor display name is empty after trimming.
    #[error("sensor name must not be blank")]
    BlankName,
}

fn check_non_negative(field: &'static str, value: f64) -> Result<(), SettingsError> {
    if !value.is_finite() {
        return Err(SettingsError::NotFinite(field));
    }
    if value < 0.0 {
        return Err(SettingsError::Negative { field, value });
    }
    Ok(())
}

/// Moisture boundaries used to classify readings.
///
/// A reading below `safe` is Safe, below `warning` is Warning, and anything
/// at or above `warning` is Danger. Missing fields fall back to their
/// individual defaults, so `{"warning": 80}` still yields `safe = 60`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Moisture percentage at which readings leave the Safe band.
    #[serde(default = "default_safe")]
    pub safe: f64,

    /// Moisture percentage at which readings become Danger.
    #[serde(default = "default_warning")]
    pub warning: f64,
}

fn default_safe() -> f64 {
    DEFAULT_SAFE_THRESHOLD
}

fn default_warning() -> f64 {
    DEFAULT_WARNING_THRESHOLD
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            safe: DEFAULT_SAFE_THRESHOLD,
            warning: DEFAULT_WARNING_THRESHOLD,
        }
    }
}

impl Thresholds {
    /// Check the `0 <= safe <= warning` invariant.
    pub fn validate(&self) -> Result<(), SettingsError> {
        check_non_negative("safe", self.safe)?;
        check_non_negative("warning", self.warning)?;
        if self.safe > self.warning {
            return Err(SettingsError::SafeAboveWarning {
                safe: self.safe,
                warning: self.warning,
            });
        }
        Ok(())
    }
}

/// Probe calibration points stored for the field devices.
///
/// The devices map raw probe readings onto a 0-100 moisture percentage
/// between these two points before publishing. The service only stores and
/// serves them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Raw reading in dry soil (0% moisture).
    #[serde(default = "default_dry")]
    pub dry: f64,

    /// Raw reading in saturated soil (100% moisture).
    #[serde(default = "default_wet")]
    pub wet: f64,
}

fn default_dry() -> f64 {
    DEFAULT_CALIBRATION_DRY
}

fn default_wet() -> f64 {
    DEFAULT_CALIBRATION_WET
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            dry: DEFAULT_CALIBRATION_DRY,
            wet: DEFAULT_CALIBRATION_WET,
        }
    }
}

impl Calibration {
    /// Both points must be non-negative and distinct.
    pub fn validate(&self) -> Result<(), SettingsError> {
        check_non_negative("dry", self.dry)?;
        check_non_negative("wet", self.wet)?;
        if self.dry == self.wet {
            return Err(SettingsError::CalibrationCollapsed(self.dry));
        }
        Ok(())
    }
}

/// Operator-assigned display names, keyed by sensor identifier.
///
/// A stored name takes precedence over the name carried in the feed.
pub type SensorNames = BTreeMap<String, String>;

/// Ordinal risk classification of a moisture reading.
///
/// The derived ordering (`Safe < Warning < Danger`) is what system-wide
/// aggregation relies on: the system risk is the maximum over all sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    /// Moisture below the safe threshold.
    Safe,
    /// Moisture between the safe and warning thresholds.
    Warning,
    /// Moisture at or above the warning threshold.
    Danger,
}

impl RiskLevel {
    /// Classify a moisture percentage against the given thresholds.
    ///
    /// # Bands
    ///
    /// - `Safe`: moisture < safe
    /// - `Warning`: safe <= moisture < warning
    /// - `Danger`: moisture >= warning
    ///
    /// A missing (or non-finite) moisture value is classified as 0 rather
    /// than rejected; callers decide separately whether the reading is
    /// usable at all.
    pub fn classify(moisture: Option<f64>, thresholds: &Thresholds) -> Self {
        let moisture = moisture.filter(|m| m.is_finite()).unwrap_or(0.0);

        if moisture < thresholds.safe {
            RiskLevel::Safe
        } else if moisture < thresholds.warning {
            RiskLevel::Warning
        } else {
            RiskLevel::Danger
        }
    }

    /// Get a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "Safe",
            RiskLevel::Warning => "Warning",
            RiskLevel::Danger => "Danger",
        }
    }
}

/// How current a sensor's last reading is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Reading is within the staleness window.
    Fresh,
    /// Reading is older than the staleness window.
    Offline,
    /// Reading carries no timestamp, so its age is unknown.
    NoData,
}

/// A single sensor reading after classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Feed key of the sensor, e.g. `"sensor1"`.
    pub id: String,

    /// Display name, or [`DEFAULT_SENSOR_NAME`] when unset.
    pub name: String,

    /// Soil moisture percentage. Nominally 0-100 but not clamped.
    pub moisture: f64,

    /// Epoch seconds at which the device took the reading.
    pub timestamp: Option<i64>,

    /// Risk level derived from the thresholds in force for this update.
    pub risk: RiskLevel,

    /// Staleness of the reading at evaluation time.
    pub freshness: Freshness,
}

/// Point-in-time view over all valid sensors in one feed update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// When the snapshot was evaluated.
    pub evaluated_at: DateTime<Utc>,

    /// Maximum risk over all valid sensors (Safe when there are none).
    pub risk: RiskLevel,

    /// Valid readings, ordered by sensor identifier.
    pub sensors: Vec<SensorReading>,

    /// Sensor identifiers whose entries were malformed and left out.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded: Vec<String>,
}

impl SystemSnapshot {
    /// Look up a valid reading by sensor identifier.
    pub fn sensor(&self, id: &str) -> Option<&SensorReading> {
        self.sensors.iter().find(|s| s.id == id)
    }

    /// Newest device timestamp across all valid readings.
    pub fn latest_timestamp(&self) -> Option<i64> {
        self.sensors.iter().filter_map(|s| s.timestamp).max()
    }

    /// Whether any valid sensor is offline.
    pub fn any_offline(&self) -> bool {
        self.sensors
            .iter()
            .any(|s| s.freshness == Freshness::Offline)
    }
}

/// One continuous interval during which the aggregate risk is Danger.
///
/// Carries the reading that opened the episode, which is what recipients
/// are told about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEpisode {
    /// Identifier of the sensor that triggered the episode.
    pub sensor_id: String,

    /// Display name of that sensor.
    pub sensor_name: String,

    /// Moisture percentage at trigger time.
    pub moisture: f64,

    /// Device timestamp of the triggering reading, if it had one.
    pub reading_timestamp: Option<i64>,

    /// When the engine observed the transition.
    pub triggered_at: DateTime<Utc>,
}

/// Delivery channel for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Email via SMTP.
    Email,
    /// Text message via the SMS gateway.
    Sms,
}

impl Channel {
    /// Get a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A user record as held by the recipient directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Directory key for the user.
    pub id: String,

    /// Email address, if the user registered one.
    #[serde(default)]
    pub email: Option<String>,

    /// Mobile number, if the user registered one.
    #[serde(default)]
    pub phone: Option<String>,

    /// Role such as `"user"` or `"admin"`. Unset is treated as `"user"`.
    #[serde(default)]
    pub role: Option<String>,
}

/// Role assumed for users whose record carries none.
pub const DEFAULT_ROLE: &str = "user";

impl UserRecord {
    /// The user's role, falling back to [`DEFAULT_ROLE`].
    pub fn role(&self) -> &str {
        self.role.as_deref().unwrap_or(DEFAULT_ROLE)
    }
}

/// A resolved notification target: one address on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Recipient {
    /// Channel the address belongs to.
    pub channel: Channel,

    /// Email address or phone number.
    pub address: String,

    /// Directory identifier of the owning user.
    pub user_id: String,
}

/// Outcome of one send attempt to one recipient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryResult {
    pub channel: Channel,
    pub address: String,
    pub user_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate outcome of a dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchSummary {
    /// Number of successful sends.
    pub sent: usize,

    /// Number of failed sends.
    pub failed: usize,

    /// Per-recipient outcomes in recipient order.
    pub results: Vec<DeliveryResult>,
}

impl DispatchSummary {
    /// Tally a list of delivery results.
    pub fn from_results(results: Vec<DeliveryResult>) -> Self {
        let sent = results.iter().filter(|r| r.success).count();
        Self {
            sent,
            failed: results.len() - sent,
            results,
        }
    }
}

/// A retained history point for charting and export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    /// Device time of the update.
    pub time: DateTime<Utc>,

    /// Moisture of `sensor1` (0 when absent).
    pub sensor1: f64,

    /// Moisture of `sensor2` (0 when absent).
    pub sensor2: f64,
}

/// Render a moisture percentage without a trailing `.0` for whole numbers.
pub fn format_moisture(moisture: f64) -> String {
    if moisture.fract() == 0.0 && moisture.abs() < 1e15 {
        format!("{:.0}", moisture)
    } else {
        moisture.to_string()
    }
}

// ============================================================================
// HTTP request / response bodies
// ============================================================================

/// Request body for POST /alert.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertRequest {
    /// Location name to report. Empty falls back to [`DEFAULT_SENSOR_NAME`].
    #[serde(rename = "sensorName", alias = "SensorName", default)]
    pub sensor_name: String,

    /// Moisture percentage to report.
    pub moisture: f64,

    /// Optional status; anything other than `"Danger"` skips the dispatch.
    #[serde(default)]
    pub status: Option<String>,
}

/// Response body for POST /alert.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlertResponse {
    pub ok: bool,

    /// Number of successful sends.
    #[serde(rename = "sentTo", skip_serializing_if = "Option::is_none")]
    pub sent_to: Option<usize>,

    /// Number of failed sends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<usize>,

    /// Set when the request did not describe a Danger condition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,

    /// Structural failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request body for PUT /sensors/{id}/name.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorNameRequest {
    pub name: String,
}

impl SensorNameRequest {
    /// The trimmed name, rejecting blanks.
    pub fn validated(&self) -> Result<String, SettingsError> {
        match self.name.trim() {
            "" => Err(SettingsError::BlankName),
            name => Ok(name.to_string()),
        }
    }
}

/// Response body for GET /status.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Whether a danger episode is in progress.
    pub alerting: bool,

    /// Whether the system has stopped reporting fresh readings.
    pub offline: bool,

    /// The episode in progress, if any.
    pub episode: Option<AlertEpisode>,

    /// Latest evaluated snapshot, if any update has arrived.
    pub snapshot: Option<SystemSnapshot>,
}
