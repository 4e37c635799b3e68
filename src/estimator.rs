//! Weighted-centroid position estimator.
//!
//! Each observation matched against the reference store is converted from
//! RSSI to an estimated distance with a log-distance path-loss model, then
//! weighted by `1 / (distance + DISTANCE_DAMPING_M)`. The estimate is the
//! weighted mean of the matched access point coordinates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::{reference::ReferenceStore, Observation, PositionEstimate};

// ---

/// Expected RSSI at one metre from the access point, in dBm.
pub const REFERENCE_RSSI_DBM: f64 = -50.0;

/// Path-loss exponent for the log-distance model (indoor, cluttered).
pub const PATH_LOSS_EXPONENT: f64 = 3.0;

/// Added to every distance so a very strong signal cannot produce an unbounded weight.
pub const DISTANCE_DAMPING_M: f64 = 0.1;

/// Log-distance path-loss parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathLossModel {
    pub reference_rssi: f64,
    pub exponent: f64,
}

impl Default for PathLossModel {
    fn default() -> Self {
        Self {
            reference_rssi: REFERENCE_RSSI_DBM,
            exponent: PATH_LOSS_EXPONENT,
        }
    }
}

impl PathLossModel {
    /// Estimated distance in metres: `10 ^ ((ref - rssi) / (10 * n))`.
    ///
    /// Strictly decreasing in `rssi`.
    pub fn rssi_to_distance(&self, rssi: i32) -> f64 {
        10f64.powf((self.reference_rssi - f64::from(rssi)) / (10.0 * self.exponent))
    }
}

/// Distance using the default model.
pub fn rssi_to_distance(rssi: i32) -> f64 {
    PathLossModel::default().rssi_to_distance(rssi)
}

/// Inverse-distance weight with damping.
pub fn distance_weight(distance: f64) -> f64 {
    1.0 / (distance + DISTANCE_DAMPING_M)
}

/// Running sums for the weighted centroid.
#[derive(Debug, Default)]
struct Centroid {
    lat_sum: f64,
    lon_sum: f64,
    weight_sum: f64,
    count: usize,
}

impl Centroid {
    fn add(&mut self, latitude: f64, longitude: f64, weight: f64) {
        self.lat_sum += weight * latitude;
        self.lon_sum += weight * longitude;
        self.weight_sum += weight;
        self.count += 1;
    }

    fn finish(self, timestamp: DateTime<Utc>) -> Option<PositionEstimate> {
        // ---
        if self.weight_sum == 0.0 {
            return None;
        }

        Some(PositionEstimate {
            latitude: self.lat_sum / self.weight_sum,
            longitude: self.lon_sum / self.weight_sum,
            timestamp,
            matched_count: self.count,
        })
    }
}

/// Turns a scan into a position, reading from a shared reference store.
#[derive(Debug, Clone)]
pub struct PositionEstimator {
    store: Arc<ReferenceStore>,
    model: PathLossModel,
}

impl PositionEstimator {
    pub fn new(store: Arc<ReferenceStore>) -> Self {
        Self {
            store,
            model: PathLossModel::default(),
        }
    }

    pub fn store(&self) -> &ReferenceStore {
        &self.store
    }

    /// Estimate a position stamped with the current time.
    ///
    /// Returns `None` when no observation matches the reference store, or
    /// when every matched signal is so weak its weight underflows to zero.
    pub fn estimate(&self, observations: &[Observation]) -> Option<PositionEstimate> {
        self.estimate_at(observations, Utc::now())
    }

    /// Same as [`estimate`](Self::estimate) with an explicit timestamp.
    ///
    /// Duplicate identifiers are not merged; each occurrence contributes.
    pub fn estimate_at(
        &self,
        observations: &[Observation],
        timestamp: DateTime<Utc>,
    ) -> Option<PositionEstimate> {
        // ---
        let mut centroid = Centroid::default();

        for obs in observations {
            let Some(ap) = self.store.lookup(&obs.identifier) else {
                trace!("Unmatched access point '{}'", obs.identifier.trim());
                continue;
            };

            let distance = self.model.rssi_to_distance(obs.signal_strength);
            let weight = distance_weight(distance);
            debug!(
                "  -> used in calculation: {} '{}' ({} dBm) ~ {:.1} m, weight {:.3}",
                ap.identifier,
                ap.ssid.as_deref().unwrap_or("hidden"),
                obs.signal_strength,
                distance,
                weight
            );

            centroid.add(ap.latitude, ap.longitude, weight);
        }

        centroid.finish(timestamp)
    }
}
