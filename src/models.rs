//! Data models shared by the reference store, estimator and history log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---

/// A known access point with fixed coordinates, keyed by its canonical address.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessPointRecord {
    // ---
    pub identifier: String,
    pub latitude: f64,
    pub longitude: f64,
    pub ssid: Option<String>,
}

/// One access point as reported in a scan.
///
/// The identifier is taken as-is from the sensing device; it is normalized
/// at lookup time, never here.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Observation {
    // ---
    #[serde(rename = "mac", alias = "bssid", default)]
    pub identifier: String,
    #[serde(rename = "rssi")]
    pub signal_strength: i32,
}

impl Observation {
    pub fn new(identifier: impl Into<String>, signal_strength: i32) -> Self {
        Self {
            identifier: identifier.into(),
            signal_strength,
        }
    }
}

/// A single point of the trajectory.
///
/// Serialized field names match the on-disk history format and the
/// `/api/trajectory` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    // ---
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "aps_count")]
    pub matched_count: usize,
}
