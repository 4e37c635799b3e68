//! Ingestion pipeline: scan report -> estimator -> history.
//!
//! The pipeline is transport-agnostic. The MQTT subscriber hands it raw
//! payload bytes one at a time; tests call it directly.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    estimator::PositionEstimator,
    history::{HistoryError, HistoryLog},
    Observation, PositionEstimate,
};

// ---

#[derive(Debug, Error)]
pub enum ScanReportError {
    #[error("Invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Payload has no '{0}' field")]
    MissingField(&'static str),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Malformed scan report: {0}")]
    Malformed(#[from] ScanReportError),

    #[error(transparent)]
    Persist(#[from] HistoryError),
}

/// A parsed scan: the reporting device and what it heard.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub device_id: Option<String>,
    pub observations: Vec<Observation>,
}

/// What happened to one report.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// The report carried no access points.
    Empty,
    /// None of the observed access points are in the reference store.
    Unmatched { observed: usize },
    /// Some access points are known, but none has a signal strong enough
    /// to carry any weight.
    Unusable { matched: usize },
    /// An estimate was made and persisted.
    Recorded {
        estimate: PositionEstimate,
        history_len: usize,
    },
}

// The Things Network v3 uplink envelope, reduced to the fields we read.

#[derive(Debug, Deserialize)]
struct Uplink {
    end_device_ids: Option<DeviceIds>,
    uplink_message: Option<UplinkMessage>,
}

#[derive(Debug, Deserialize)]
struct DeviceIds {
    device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UplinkMessage {
    decoded_payload: Option<DecodedPayload>,
}

#[derive(Debug, Deserialize)]
struct DecodedPayload {
    wifi_access_points: Option<Vec<Observation>>,
}

/// Parse an uplink payload into a scan report.
///
/// A payload without `wifi_access_points` is a valid, empty report.
pub fn parse_scan_report(payload: &[u8]) -> Result<ScanReport, ScanReportError> {
    // ---
    let uplink: Uplink = serde_json::from_slice(payload)?;

    let decoded = uplink
        .uplink_message
        .ok_or(ScanReportError::MissingField("uplink_message"))?
        .decoded_payload
        .ok_or(ScanReportError::MissingField("decoded_payload"))?;

    Ok(ScanReport {
        device_id: uplink.end_device_ids.and_then(|ids| ids.device_id),
        observations: decoded.wifi_access_points.unwrap_or_default(),
    })
}

/// Routes scan reports through the estimator into the history log.
#[derive(Debug, Clone)]
pub struct Pipeline {
    estimator: PositionEstimator,
    history: Arc<HistoryLog>,
}

impl Pipeline {
    pub fn new(estimator: PositionEstimator, history: Arc<HistoryLog>) -> Self {
        Self { estimator, history }
    }

    /// Handle one payload and log the result. Never fails; a bad report
    /// only affects itself.
    pub async fn process(&self, payload: &[u8]) {
        // ---
        match self.handle_payload(payload).await {
            Ok(IngestOutcome::Empty) => debug!("Scan report without access points ignored"),
            Ok(IngestOutcome::Unmatched { observed }) => {
                warn!("No known access points among {} in this scan", observed);
            }
            Ok(IngestOutcome::Unusable { matched }) => {
                warn!("{} known access points, none with a usable signal", matched);
            }
            Ok(IngestOutcome::Recorded {
                estimate,
                history_len,
            }) => {
                info!(
                    "Estimated position: {:.5}, {:.5} from {} APs ({} points in history)",
                    estimate.latitude, estimate.longitude, estimate.matched_count, history_len
                );
            }
            Err(IngestError::Malformed(e)) => warn!("Dropping scan report: {}", e),
            Err(IngestError::Persist(e)) => {
                error!("Estimate NOT recorded, history write failed: {}", e);
            }
        }
    }

    /// Parse a raw payload and handle the resulting report.
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<IngestOutcome, IngestError> {
        // ---
        let report = parse_scan_report(payload)?;
        Ok(self.handle_report(report).await?)
    }

    pub async fn handle_report(&self, report: ScanReport) -> Result<IngestOutcome, HistoryError> {
        // ---
        if report.observations.is_empty() {
            return Ok(IngestOutcome::Empty);
        }

        info!(
            "Scan received from {} with {} APs",
            report.device_id.as_deref().unwrap_or("unknown device"),
            report.observations.len()
        );
        let matched = self.log_matches(&report.observations);

        let Some(estimate) = self.estimator.estimate(&report.observations) else {
            if matched > 0 {
                return Ok(IngestOutcome::Unusable { matched });
            }
            return Ok(IngestOutcome::Unmatched {
                observed: report.observations.len(),
            });
        };

        let history_len = self.history.append(estimate.clone()).await?;
        Ok(IngestOutcome::Recorded {
            estimate,
            history_len,
        })
    }

    /// Log each observation's lookup result; returns how many matched.
    fn log_matches(&self, observations: &[Observation]) -> usize {
        // ---
        let store = self.estimator.store();
        let mut matched = 0;
        for obs in observations {
            if store.lookup(&obs.identifier).is_some() {
                debug!("  match: '{}' is in the reference database", obs.identifier.trim());
                matched += 1;
            } else {
                debug!("  no match: '{}' not in the reference database", obs.identifier.trim());
            }
        }
        matched
    }
}
