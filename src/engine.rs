//! The monitoring engine.
//!
//! [`MonitorEngine`] is the synchronous core: for each feed update it builds
//! a snapshot, advances the alert tracker, and appends to the history
//! window. It performs no I/O. A snapshot that is not a JSON object (an
//! empty feed node reads as `null`) carries no readings and is ignored
//! without touching any state.
//!
//! [`Monitor`] wraps the engine for the running service. It consumes the
//! ordered update channel, fetches the thresholds and sensor names in force
//! before each update, and spawns a dispatch task whenever an episode triggers. The
//! dispatch runs on its own task so a slow transport never delays the next
//! update.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::aggregation::{DEFAULT_STALE_AFTER, build_snapshot, is_offline};
use crate::dispatch::{DispatchError, Dispatcher};
use crate::feed::FeedUpdate;
use crate::history::{DEFAULT_HISTORY_LIMIT, HistoryWindow};
use crate::model::{
    AlertEpisode, DispatchSummary, HistoryPoint, SensorNames, StatusResponse, SystemSnapshot,
    Thresholds,
};
use crate::storage::Storage;
use crate::tracker::{AlertTracker, Transition};

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Age after which a sensor is reported offline.
    pub stale_after: Duration,
    /// Number of history points retained.
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Result of processing one feed update.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub snapshot: SystemSnapshot,
    pub transition: Transition,
    /// Whether the update produced a history point.
    pub recorded: bool,
}

/// Single-owner state of the monitoring pipeline.
#[derive(Debug)]
pub struct MonitorEngine {
    config: EngineConfig,
    tracker: AlertTracker,
    history: HistoryWindow,
    latest: Option<SystemSnapshot>,
}

impl MonitorEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            tracker: AlertTracker::new(),
            history: HistoryWindow::new(config.history_limit),
            latest: None,
            config,
        }
    }

    /// Process one raw feed update.
    ///
    /// Returns `None`, leaving the tracker, history and latest snapshot
    /// untouched, when `raw` is not a JSON object.
    pub fn process(
        &mut self,
        raw: &Value,
        thresholds: &Thresholds,
        names: &SensorNames,
        now: DateTime<Utc>,
    ) -> Option<UpdateOutcome> {
        if !raw.is_object() {
            warn!(kind = json_kind(raw), "Ignoring feed snapshot that is not an object");
            return None;
        }

        let update = FeedUpdate::parse(raw);
        if !update.malformed.is_empty() {
            warn!(sensors = ?update.malformed, "Excluding malformed sensor entries");
        }

        let snapshot = build_snapshot(&update, thresholds, names, now, self.config.stale_after);
        let transition = self.tracker.observe(&snapshot);
        let recorded = self.history.record(&snapshot);

        match &transition {
            Transition::Triggered(episode) => info!(
                sensor = %episode.sensor_id,
                name = %episode.sensor_name,
                moisture = episode.moisture,
                "Danger episode started"
            ),
            Transition::Cleared => info!(risk = snapshot.risk.label(), "Danger episode cleared"),
            Transition::Unchanged => {}
        }

        self.latest = Some(snapshot.clone());

        Some(UpdateOutcome {
            snapshot,
            transition,
            recorded,
        })
    }

    pub fn latest(&self) -> Option<&SystemSnapshot> {
        self.latest.as_ref()
    }

    pub fn tracker(&self) -> &AlertTracker {
        &self.tracker
    }

    pub fn history(&self) -> &HistoryWindow {
        &self.history
    }

    /// Whether the system counts as offline at `now`.
    ///
    /// True when the latest snapshot had an offline sensor, or when its
    /// newest reading has since aged past the freshness window because the
    /// feed went quiet.
    pub fn is_offline_at(&self, now: DateTime<Utc>) -> bool {
        self.latest.as_ref().is_some_and(|snapshot| {
            snapshot.any_offline()
                || snapshot.latest_timestamp().is_some_and(|ts| {
                    is_offline(ts, now.timestamp(), self.config.stale_after)
                })
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Handle of a spawned dispatch task.
pub type DispatchHandle = JoinHandle<Result<DispatchSummary, DispatchError>>;

/// The running monitoring service.
#[derive(Clone)]
pub struct Monitor {
    engine: Arc<RwLock<MonitorEngine>>,
    dispatcher: Arc<Dispatcher>,
    storage: Storage,
}

impl Monitor {
    pub fn new(engine: MonitorEngine, dispatcher: Dispatcher, storage: Storage) -> Self {
        Self {
            engine: Arc::new(RwLock::new(engine)),
            dispatcher: Arc::new(dispatcher),
            storage,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Thresholds in force right now, falling back to defaults if the
    /// settings store cannot be read.
    pub async fn thresholds(&self) -> Thresholds {
        match self.storage.load_thresholds().await {
            Ok(thresholds) => thresholds,
            Err(e) => {
                warn!(error = %e, "Failed to load thresholds; using defaults");
                Thresholds::default()
            }
        }
    }

    /// Operator-assigned sensor names, or none if the store cannot be read.
    pub async fn sensor_names(&self) -> SensorNames {
        match self.storage.load_sensor_names().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Failed to load sensor names; using feed names");
                SensorNames::new()
            }
        }
    }

    /// Process one update and, on a new episode, start its dispatch.
    ///
    /// Returns `None` for an ignored snapshot. The engine lock is held only
    /// for the synchronous processing step.
    pub async fn handle_update(
        &self,
        raw: Value,
    ) -> Option<(UpdateOutcome, Option<DispatchHandle>)> {
        let thresholds = self.thresholds().await;
        let names = self.sensor_names().await;

        let outcome = {
            let mut engine = self.engine.write().await;
            engine.process(&raw, &thresholds, &names, Utc::now())?
        };

        let handle = match &outcome.transition {
            Transition::Triggered(episode) => Some(self.spawn_dispatch(episode.clone())),
            _ => None,
        };

        Some((outcome, handle))
    }

    /// Dispatch `episode` on a background task.
    ///
    /// A failed dispatch is logged and not retried; the episode stays open
    /// until the readings clear.
    pub fn spawn_dispatch(&self, episode: AlertEpisode) -> DispatchHandle {
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move {
            let result = dispatcher.resolve_and_dispatch(&episode).await;
            if let Err(e) = &result {
                error!(sensor = %episode.sensor_id, error = %e, "Alert dispatch failed");
            }
            result
        })
    }

    /// Consume updates in order until the channel closes.
    pub async fn run(self, mut updates: mpsc::Receiver<Value>) {
        info!("Monitor consuming sensor feed");
        while let Some(raw) = updates.recv().await {
            self.handle_update(raw).await;
        }
        info!("Sensor feed closed; monitor stopping");
    }

    pub async fn status(&self) -> StatusResponse {
        let engine = self.engine.read().await;
        StatusResponse {
            alerting: engine.tracker().is_alerting(),
            offline: engine.is_offline_at(Utc::now()),
            episode: engine.tracker().current_episode().cloned(),
            snapshot: engine.latest().cloned(),
        }
    }

    pub async fn history(&self) -> Vec<HistoryPoint> {
        self.engine.read().await.history().points()
    }

    /// Retained history as CSV.
    pub async fn export_history(&self) -> anyhow::Result<String> {
        self.engine.read().await.history().to_csv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Channel, RiskLevel, UserRecord};
    use crate::notify::{Notification, Transport, TransportError};
    use crate::recipients::{RecipientPolicy, RecipientResolver};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSms {
        bodies: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for RecordingSms {
        fn channel(&self) -> Channel {
            Channel::Sms
        }

        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, _to: &str, notification: &Notification) -> Result<(), TransportError> {
            self.bodies.lock().unwrap().push(notification.body.clone());
            Ok(())
        }
    }

    fn reading(moisture: f64) -> Value {
        json!({
            "sensor1": { "name": "Hillside", "moisture": moisture, "timestamp": Utc::now().timestamp() }
        })
    }

    async fn monitor_with_one_recipient() -> (Monitor, Arc<RecordingSms>) {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        storage
            .upsert_user(&UserRecord {
                id: "u1".to_string(),
                email: None,
                phone: Some("09170000001".to_string()),
                role: None,
            })
            .await
            .unwrap();

        let sms = Arc::new(RecordingSms::default());
        let resolver = RecipientResolver::new(Arc::new(storage.clone()), RecipientPolicy::AllUsers);
        let dispatcher = Dispatcher::new(resolver).with_transport(sms.clone());
        let monitor = Monitor::new(
            MonitorEngine::new(EngineConfig::default()),
            dispatcher,
            storage,
        );
        (monitor, sms)
    }

    #[test]
    fn test_engine_process_updates_latest_and_history() {
        let mut engine = MonitorEngine::new(EngineConfig::default());
        let outcome = engine
            .process(&reading(65.0), &Thresholds::default(), &SensorNames::new(), Utc::now())
            .unwrap();

        assert_eq!(outcome.snapshot.risk, RiskLevel::Warning);
        assert_eq!(outcome.transition, Transition::Unchanged);
        assert!(outcome.recorded);
        assert_eq!(engine.latest(), Some(&outcome.snapshot));
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn test_engine_uses_thresholds_per_call() {
        let mut engine = MonitorEngine::new(EngineConfig::default());
        let strict = Thresholds {
            safe: 40.0,
            warning: 50.0,
        };

        let names = SensorNames::new();

        let outcome = engine
            .process(&reading(55.0), &Thresholds::default(), &names, Utc::now())
            .unwrap();
        assert_eq!(outcome.snapshot.risk, RiskLevel::Safe);

        let outcome = engine
            .process(&reading(55.0), &strict, &names, Utc::now())
            .unwrap();
        assert!(matches!(outcome.transition, Transition::Triggered(_)));
    }

    #[test]
    fn test_non_object_snapshot_keeps_episode_open() {
        let mut engine = MonitorEngine::new(EngineConfig::default());
        let thresholds = Thresholds::default();
        let names = SensorNames::new();

        let first = engine
            .process(&reading(80.0), &thresholds, &names, Utc::now())
            .unwrap();
        assert!(matches!(first.transition, Transition::Triggered(_)));
        let latest = engine.latest().cloned();

        for ignored in [Value::Null, json!(42), json!("x"), json!([])] {
            assert!(engine.process(&ignored, &thresholds, &names, Utc::now()).is_none());
        }
        assert!(engine.tracker().is_alerting());
        assert_eq!(engine.latest().cloned(), latest);
        assert_eq!(engine.history().len(), 1);

        let again = engine
            .process(&reading(80.0), &thresholds, &names, Utc::now())
            .unwrap();
        assert_eq!(again.transition, Transition::Unchanged);
    }

    #[test]
    fn test_offline_when_feed_goes_quiet() {
        let mut engine = MonitorEngine::new(EngineConfig::default());
        assert!(!engine.is_offline_at(Utc::now()));

        let now = Utc::now();
        engine
            .process(&reading(30.0), &Thresholds::default(), &SensorNames::new(), now)
            .unwrap();
        assert!(!engine.is_offline_at(now));
        assert!(engine.is_offline_at(now + chrono::Duration::seconds(120)));
    }

    #[tokio::test]
    async fn test_scenario_dispatches_once_per_episode() {
        let (monitor, sms) = monitor_with_one_recipient().await;

        let mut dispatches = 0;
        for moisture in [80.0, 80.0, 50.0, 80.0] {
            let (_, handle) = monitor.handle_update(reading(moisture)).await.unwrap();
            if let Some(handle) = handle {
                let summary = handle.await.unwrap().unwrap();
                assert_eq!(summary.sent, 1);
                dispatches += 1;
            }
        }

        assert_eq!(dispatches, 2);
        let bodies = sms.bodies.lock().unwrap().clone();
        assert_eq!(bodies.len(), 2);
        assert!(bodies[0].contains("80%"));
        assert!(bodies[0].contains("Hillside"));
    }

    #[tokio::test]
    async fn test_thresholds_read_from_storage() {
        let (monitor, _) = monitor_with_one_recipient().await;
        monitor
            .storage
            .save_thresholds(&Thresholds {
                safe: 10.0,
                warning: 20.0,
            })
            .await
            .unwrap();

        let (outcome, handle) = monitor.handle_update(reading(25.0)).await.unwrap();
        assert_eq!(outcome.snapshot.risk, RiskLevel::Danger);
        assert!(handle.is_some());
    }

    #[tokio::test]
    async fn test_stored_sensor_name_reaches_alert() {
        let (monitor, sms) = monitor_with_one_recipient().await;
        monitor
            .storage
            .save_sensor_name("sensor1", "North Slope")
            .await
            .unwrap();

        let (outcome, handle) = monitor.handle_update(reading(90.0)).await.unwrap();
        assert_eq!(outcome.snapshot.sensors[0].name, "North Slope");
        handle.unwrap().await.unwrap().unwrap();

        let bodies = sms.bodies.lock().unwrap().clone();
        assert!(bodies[0].contains("North Slope"));
        assert!(!bodies[0].contains("Hillside"));
    }

    #[tokio::test]
    async fn test_status_reflects_episode() {
        let (monitor, _) = monitor_with_one_recipient().await;
        assert!(!monitor.status().await.alerting);

        let (_, handle) = monitor.handle_update(reading(90.0)).await.unwrap();
        handle.unwrap().await.unwrap().unwrap();

        let status = monitor.status().await;
        assert!(status.alerting);
        assert_eq!(status.episode.unwrap().moisture, 90.0);
        assert_eq!(status.snapshot.unwrap().risk, RiskLevel::Danger);
    }

    #[tokio::test]
    async fn test_run_consumes_in_order() {
        let (monitor, sms) = monitor_with_one_recipient().await;
        let (tx, rx) = mpsc::channel(8);

        for moisture in [30.0, 80.0, 85.0, 30.0] {
            tx.send(reading(moisture)).await.unwrap();
        }
        drop(tx);
        monitor.clone().run(rx).await;

        assert_eq!(monitor.history().await.len(), 4);
        assert!(!monitor.status().await.alerting);

        // Let the spawned dispatch finish
        for _ in 0..50 {
            if !sms.bodies.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sms.bodies.lock().unwrap().len(), 1);
    }
}
