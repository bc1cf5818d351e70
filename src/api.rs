//! HTTP API handlers for SoilWatch.
//!
//! - **POST /feed**: Push a sensor snapshot into the ordered update stream.
//! - **GET /status**: Latest snapshot and whether a danger episode is open.
//! - **GET /history**, **GET /history/export**: Retained readings as JSON or CSV.
//! - **GET|PUT /settings/thresholds**: Read or replace classification thresholds.
//! - **GET|PUT /settings/calibration**: Read or replace probe calibration points.
//! - **GET /sensors/names**, **PUT /sensors/{id}/name**: Sensor display names.
//! - **POST /users**: Register or update an alert contact.
//! - **POST /alert**: Dispatch an alert immediately, bypassing the tracker.
//! - **GET /health**: Health check.
//!
//! Contact addresses are never written to the logs; handlers log identifiers
//! and counts only.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post, put},
};
use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use crate::engine::Monitor;
use crate::model::{
    AlertEpisode, AlertRequest, AlertResponse, Calibration, DEFAULT_SENSOR_NAME, HistoryPoint,
    RiskLevel, SensorNameRequest, SensorNames, StatusResponse, Thresholds, UserRecord,
};
use crate::storage::Storage;

/// Sensor id recorded on episodes raised through POST /alert.
const MANUAL_SENSOR_ID: &str = "manual";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub monitor: Monitor,
    pub storage: Storage,
    /// Sending side of the monitor's ordered update channel.
    pub feed: mpsc::Sender<Value>,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/feed", post(post_feed))
        .route("/status", get(get_status))
        .route("/history", get(get_history))
        .route("/history/export", get(export_history))
        .route(
            "/settings/thresholds",
            get(get_thresholds).put(put_thresholds),
        )
        .route(
            "/settings/calibration",
            get(get_calibration).put(put_calibration),
        )
        .route("/sensors/names", get(get_sensor_names))
        .route("/sensors/:id/name", put(put_sensor_name))
        .route("/users", post(post_user))
        .route("/alert", post(post_alert))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_body(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

/// POST /feed - Push a sensor snapshot.
///
/// # Request Body
///
/// ```json
/// {
///     "sensor1": { "name": "Hillside", "moisture": 82, "timestamp": 1718000000 },
///     "sensor2": { "moisture": 41, "timestamp": 1718000000 }
/// }
/// ```
///
/// # Response
///
/// Returns `202 Accepted` once the snapshot is queued. Snapshots are
/// processed in the order they are accepted. A body that is not a JSON
/// object (such as `null`) is rejected with `400 Bad Request`.
#[instrument(skip_all)]
pub async fn post_feed(State(state): State<AppState>, Json(snapshot): Json<Value>) -> StatusCode {
    if !snapshot.is_object() {
        return StatusCode::BAD_REQUEST;
    }

    match state.feed.send(snapshot).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => {
            warn!("Monitor is not consuming updates");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// GET /status - Current system snapshot.
#[instrument(skip(state))]
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(state.monitor.status().await)
}

/// GET /history - Retained history points, oldest first.
#[instrument(skip(state))]
pub async fn get_history(State(state): State<AppState>) -> Json<Vec<HistoryPoint>> {
    Json(state.monitor.history().await)
}

/// GET /history/export - Retained history as a CSV download.
#[instrument(skip(state))]
pub async fn export_history(State(state): State<AppState>) -> impl IntoResponse {
    match state.monitor.export_history().await {
        Ok(csv) => Ok((
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"sensor_history.csv\"",
                ),
            ],
            csv,
        )),
        Err(e) => {
            warn!(error = %e, "Failed to export history");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /settings/thresholds - Thresholds currently in force.
#[instrument(skip(state))]
pub async fn get_thresholds(State(state): State<AppState>) -> Json<Thresholds> {
    Json(state.monitor.thresholds().await)
}

/// PUT /settings/thresholds - Replace the thresholds.
///
/// # Request Body
///
/// ```json
/// { "safe": 60, "warning": 75 }
/// ```
///
/// Omitted fields take their defaults. Returns `400 Bad Request` unless
/// `0 <= safe <= warning`.
#[instrument(skip(state))]
pub async fn put_thresholds(
    State(state): State<AppState>,
    Json(thresholds): Json<Thresholds>,
) -> impl IntoResponse {
    if let Err(e) = thresholds.validate() {
        return Err(error_body(StatusCode::BAD_REQUEST, e.to_string()));
    }

    match state.storage.save_thresholds(&thresholds).await {
        Ok(()) => {
            info!(
                safe = thresholds.safe,
                warning = thresholds.warning,
                "Thresholds updated"
            );
            Ok(Json(thresholds))
        }
        Err(e) => {
            warn!(error = %e, "Failed to save thresholds");
            Err(error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to save thresholds",
            ))
        }
    }
}

/// GET /settings/calibration - Probe calibration points served to devices.
#[instrument(skip(state))]
pub async fn get_calibration(State(state): State<AppState>) -> impl IntoResponse {
    match state.storage.load_calibration().await {
        Ok(calibration) => Ok(Json(calibration)),
        Err(e) => {
            warn!(error = %e, "Failed to load calibration");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// PUT /settings/calibration - Replace the probe calibration points.
///
/// # Request Body
///
/// ```json
/// { "dry": 3300, "wet": 1400 }
/// ```
///
/// Returns `400 Bad Request` for negative or identical points.
#[instrument(skip(state))]
pub async fn put_calibration(
    State(state): State<AppState>,
    Json(calibration): Json<Calibration>,
) -> impl IntoResponse {
    if let Err(e) = calibration.validate() {
        return Err(error_body(StatusCode::BAD_REQUEST, e.to_string()));
    }

    match state.storage.save_calibration(&calibration).await {
        Ok(()) => {
            info!(dry = calibration.dry, wet = calibration.wet, "Calibration updated");
            Ok(Json(calibration))
        }
        Err(e) => {
            warn!(error = %e, "Failed to save calibration");
            Err(error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to save calibration",
            ))
        }
    }
}

/// GET /sensors/names - Operator-assigned sensor names.
#[instrument(skip(state))]
pub async fn get_sensor_names(State(state): State<AppState>) -> Json<SensorNames> {
    Json(state.monitor.sensor_names().await)
}

/// PUT /sensors/{id}/name - Rename a sensor.
///
/// # Request Body
///
/// ```json
/// { "name": "North Slope" }
/// ```
///
/// The name replaces whatever the device publishes, from the next update on,
/// and is what alert messages report. Returns `400 Bad Request` for a blank
/// name.
#[instrument(skip(state, request))]
pub async fn put_sensor_name(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SensorNameRequest>,
) -> impl IntoResponse {
    let name = match request.validated() {
        Ok(name) => name,
        Err(e) => return Err(error_body(StatusCode::BAD_REQUEST, e.to_string())),
    };

    match state.storage.save_sensor_name(&id, &name).await {
        Ok(()) => {
            info!(name = %name, "Sensor renamed");
            Ok(Json(json!({ "id": id, "name": name })))
        }
        Err(e) => {
            warn!(error = %e, "Failed to rename sensor");
            Err(error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to rename sensor",
            ))
        }
    }
}

/// Whether `phone` is a Philippine mobile number in `09XXXXXXXXX` form.
pub fn is_valid_mobile(phone: &str) -> bool {
    phone.len() == 11 && phone.starts_with("09") && phone.bytes().all(|b| b.is_ascii_digit())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// POST /users - Register or update an alert contact.
///
/// # Request Body
///
/// ```json
/// { "id": "uid-123", "email": "resident@example.com", "phone": "09171234567" }
/// ```
///
/// Fields left out keep their stored values. Returns `201 Created` with the
/// stored record, or `400 Bad Request` for a malformed email or phone.
#[instrument(skip_all)]
pub async fn post_user(
    State(state): State<AppState>,
    Json(user): Json<UserRecord>,
) -> impl IntoResponse {
    let user = UserRecord {
        id: user.id.trim().to_string(),
        email: non_blank(user.email),
        phone: non_blank(user.phone),
        role: non_blank(user.role),
    };

    if user.id.is_empty() {
        return Err(error_body(StatusCode::BAD_REQUEST, "user id is required"));
    }
    if let Some(phone) = &user.phone {
        if !is_valid_mobile(phone) {
            return Err(error_body(
                StatusCode::BAD_REQUEST,
                "invalid mobile number format, use 09XXXXXXXXX",
            ));
        }
    }
    if let Some(email) = &user.email {
        if email.parse::<lettre::Address>().is_err() {
            return Err(error_body(StatusCode::BAD_REQUEST, "invalid email address"));
        }
    }

    let stored = match state.storage.upsert_user(&user).await {
        Ok(()) => state.storage.get_user(&user.id).await,
        Err(e) => Err(e),
    };

    match stored {
        Ok(Some(stored)) => {
            info!(
                user_id = %stored.id,
                has_email = stored.email.is_some(),
                has_phone = stored.phone.is_some(),
                role = stored.role(),
                "Contact saved"
            );
            Ok((StatusCode::CREATED, Json(stored)))
        }
        Ok(None) => {
            warn!(user_id = %user.id, "Contact missing right after upsert");
            Err(error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to save profile",
            ))
        }
        Err(e) => {
            warn!(user_id = %user.id, error = %e, "Failed to save contact");
            Err(error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to save profile",
            ))
        }
    }
}

/// POST /alert - Dispatch an alert now.
///
/// # Request Body
///
/// ```json
/// { "sensorName": "Hillside", "moisture": 82 }
/// ```
///
/// When `status` is present and not `"Danger"` nothing is sent.
///
/// # Response
///
/// ```json
/// { "ok": true, "sentTo": 3, "failed": 0 }
/// ```
///
/// A directory failure answers `500` with `{ "ok": false, "error": "..." }`.
/// Individual send failures are counted in `failed` and do not fail the call.
#[instrument(skip_all)]
pub async fn post_alert(
    State(state): State<AppState>,
    Json(request): Json<AlertRequest>,
) -> (StatusCode, Json<AlertResponse>) {
    if let Some(status) = &request.status {
        if status != RiskLevel::Danger.label() {
            info!(status = %status, "Alert request is not a danger condition; skipping");
            return (
                StatusCode::OK,
                Json(AlertResponse {
                    ok: true,
                    skipped: Some(true),
                    ..Default::default()
                }),
            );
        }
    }

    let sensor_name = match request.sensor_name.trim() {
        "" => DEFAULT_SENSOR_NAME.to_string(),
        name => name.to_string(),
    };
    let episode = AlertEpisode {
        sensor_id: MANUAL_SENSOR_ID.to_string(),
        sensor_name,
        moisture: request.moisture,
        reading_timestamp: None,
        triggered_at: Utc::now(),
    };

    match state.monitor.dispatcher().resolve_and_dispatch(&episode).await {
        Ok(summary) => (
            StatusCode::OK,
            Json(AlertResponse {
                ok: true,
                sent_to: Some(summary.sent),
                failed: Some(summary.failed),
                ..Default::default()
            }),
        ),
        Err(e) => {
            warn!(error = %e, "Manual alert dispatch failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AlertResponse {
                    ok: false,
                    error: Some(e.to_string()),
                    ..Default::default()
                }),
            )
        }
    }
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_mobile() {
        assert!(is_valid_mobile("09171234567"));
        assert!(!is_valid_mobile("9171234567"));
        assert!(!is_valid_mobile("0917123456"));
        assert!(!is_valid_mobile("091712345678"));
        assert!(!is_valid_mobile("+639171234567"));
        assert!(!is_valid_mobile("0917123456a"));
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  x ".to_string())), Some("x".to_string()));
        assert_eq!(non_blank(Some("   ".to_string())), None);
        assert_eq!(non_blank(None), None);
    }
}
