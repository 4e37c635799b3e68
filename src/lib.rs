//! WiFi trajectory service.
//!
//! Scan reports arrive over MQTT, each reported access point is looked up in
//! a reference database of known coordinates, and matched access points are
//! combined into one weighted-centroid position. Positions are appended to
//! a durable trajectory served over HTTP.
//!
//! Components, leaf first:
//! - [`reference`] – immutable access point lookup built from CSV
//! - [`estimator`] – RSSI to distance, weighted centroid
//! - [`history`] – append-only, write-through trajectory
//! - [`ingest`] – scan report parsing and routing
//! - [`mqtt`], [`routes`] – transports

pub mod config;
pub mod estimator;
pub mod history;
pub mod ingest;
pub mod models;
pub mod mqtt;
pub mod reference;
pub mod routes;

pub use config::Config;

// Shared types live at the crate root; components import them from `crate::`.
pub use models::{AccessPointRecord, Observation, PositionEstimate};
