//! SoilWatch - Soil-moisture monitoring with landslide danger alerts.
//!
//! # API Endpoints
//!
//! - `POST /feed` - Push a sensor snapshot
//! - `GET /status` - Current snapshot and alert state
//! - `GET /history` - Retained reading history
//! - `GET /history/export` - Reading history as CSV
//! - `GET|PUT /settings/thresholds` - Classification thresholds
//! - `GET|PUT /settings/calibration` - Probe calibration points
//! - `GET /sensors/names`, `PUT /sensors/{id}/name` - Sensor display names
//! - `POST /users` - Register an alert contact
//! - `POST /alert` - Dispatch an alert immediately
//! - `GET /health` - Health check

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use soilwatch::api::{self, AppState};
use soilwatch::config::Config;
use soilwatch::dispatch::Dispatcher;
use soilwatch::engine::{EngineConfig, Monitor, MonitorEngine};
use soilwatch::feed::FeedClient;
use soilwatch::notify::{EmailTransport, SmsTransport};
use soilwatch::recipients::RecipientResolver;
use soilwatch::storage::Storage;

/// Capacity of the ordered update channel.
const UPDATE_QUEUE_DEPTH: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Contact addresses are only ever logged at debug level
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("soilwatch=info".parse()?))
        .init();

    let config = Config::from_env()?;

    info!(port = config.port, db_url = %config.database_url, "Starting SoilWatch server");

    let storage = Storage::new(&config.database_url).await?;
    info!("Database initialized");

    let resolver = RecipientResolver::new(Arc::new(storage.clone()), config.recipient_policy.clone());
    info!(policy = ?resolver.policy(), "Recipient policy");
    let mut dispatcher = Dispatcher::new(resolver).with_send_timeout(config.send_timeout);

    match &config.email {
        Some(email) => match EmailTransport::new(email) {
            Ok(transport) => {
                info!(host = %email.smtp_host, "Email alerts enabled");
                dispatcher = dispatcher.with_transport(Arc::new(transport));
            }
            Err(e) => warn!(error = %e, "Email transport unavailable; email alerts disabled"),
        },
        None => warn!("SMTP_HOST not set; email alerts disabled"),
    }

    match config.sms.clone() {
        Some(sms) => {
            info!("SMS alerts enabled");
            dispatcher = dispatcher.with_transport(Arc::new(SmsTransport::new(sms)));
        }
        None => warn!("SMS_API_KEY not set; SMS alerts disabled"),
    }

    let engine = MonitorEngine::new(EngineConfig {
        stale_after: config.stale_after,
        history_limit: config.history_limit,
    });
    let monitor = Monitor::new(engine, dispatcher, storage.clone());

    let (tx, rx) = mpsc::channel(UPDATE_QUEUE_DEPTH);
    tokio::spawn(monitor.clone().run(rx));

    if let Some(feed) = &config.feed {
        info!(interval_secs = feed.poll_interval.as_secs(), "Polling sensor feed");
        let client = FeedClient::new(&feed.url, feed.auth.clone());
        tokio::spawn(client.poll(tx.clone(), feed.poll_interval));
    }

    let app = api::router(AppState {
        monitor,
        storage,
        feed: tx,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "SoilWatch is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
