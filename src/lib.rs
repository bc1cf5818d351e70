//! SoilWatch - Soil-moisture monitoring with landslide danger alerts.
//!
//! # Overview
//!
//! SoilWatch consumes a stream of soil-moisture snapshots from field
//! sensors, classifies each sensor against configurable thresholds, and
//! raises an alert to every registered contact when the system enters a
//! danger state. Alerts are edge-triggered: one dispatch per danger
//! episode, no matter how many dangerous updates arrive while it lasts.
//!
//! # Alert Guarantees
//!
//! - A continuous danger episode produces exactly one dispatch
//! - Returning below danger ends the episode; the next danger starts a new one
//! - One failing recipient never prevents delivery to the others
//! - A slow transport never delays processing of the next update
//!
//! # Modules
//!
//! - [`model`]: Data types for readings, snapshots, episodes, and deliveries
//! - [`feed`]: Raw feed parsing and the optional polling client
//! - [`aggregation`]: Risk classification and staleness
//! - [`tracker`]: Edge-triggered alert state machine
//! - [`history`]: Bounded reading history and CSV export
//! - [`recipients`]: Recipient resolution from the user directory
//! - [`notify`]: Email and SMS transports
//! - [`dispatch`]: Concurrent per-recipient alert delivery
//! - [`engine`]: The monitoring pipeline tying the above together
//! - [`storage`]: SQLite storage for users and settings
//! - [`config`]: Environment configuration
//! - [`api`]: HTTP API handlers

pub mod aggregation;
pub mod api;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod feed;
pub mod history;
pub mod model;
pub mod notify;
pub mod recipients;
pub mod storage;
pub mod tracker;
