//! Reference database of known access points.
//!
//! The store is built once at startup from a CSV export (WiGLE or the
//! reduced `dbform.csv` layout) and is read-only afterwards, so it can be
//! shared behind an `Arc` without any locking.
//!
//! Column names are not fixed. Each row is resolved by looking for the
//! first field whose name carries an address marker (`MAC` or `BSSID`), a
//! latitude marker (`Lat`) and a longitude marker (`Lon`). Rows that cannot
//! produce a usable record are skipped with a [`SkipReason`].

use std::{collections::HashMap, path::Path};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::AccessPointRecord;

// ---

const ADDRESS_MARKERS: [&str; 2] = ["MAC", "BSSID"];
const LATITUDE_MARKER: &str = "Lat";
const LONGITUDE_MARKER: &str = "Lon";
const SSID_MARKER: &str = "SSID";

/// First line of a raw WiGLE export, written before the real header row.
const WIGLE_PREAMBLE: &str = "WigleWifi";

/// Canonical form of a hardware address: trimmed and upper-cased.
///
/// Applied identically on insert and on lookup.
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Why a reference row did not produce a record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkipReason {
    #[error("no address column")]
    MissingAddressColumn,

    #[error("empty address")]
    EmptyAddress,

    #[error("no {0} column")]
    MissingCoordinateColumn(&'static str),

    #[error("column '{column}' is not a number: '{value}'")]
    InvalidCoordinate { column: String, value: String },

    #[error("column '{column}' out of range: {value}")]
    CoordinateOutOfRange { column: String, value: f64 },
}

/// Summary of a reference load, for startup logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
    pub duplicates: usize,
}

/// Immutable mapping from canonical address to access point record.
#[derive(Debug, Default)]
pub struct ReferenceStore {
    records: HashMap<String, AccessPointRecord>,
}

impl ReferenceStore {
    /// Load the store from a CSV file.
    ///
    /// Never fails: an unreadable file yields an empty store, which is logged
    /// at `error` because every later scan will then go unmatched.
    pub fn load(path: impl AsRef<Path>) -> (Self, LoadReport) {
        // ---
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(
                    "Cannot read reference database '{}': {}. Every scan will be unmatched.",
                    path.display(),
                    e
                );
                return (Self::default(), LoadReport::default());
            }
        };

        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    "Reference database '{}' is not valid UTF-8, decoding lossily",
                    path.display()
                );
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };

        let (store, report) = Self::from_csv_str(&text);
        store.log_summary(&report);
        (store, report)
    }

    /// Build the store from CSV text with a header row.
    pub fn from_csv_str(text: &str) -> (Self, LoadReport) {
        // ---
        let body = strip_preamble(text);
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(body.as_bytes());

        let mut store = Self::default();
        let mut report = LoadReport::default();

        let headers = match reader.headers() {
            Ok(headers) => headers.clone(),
            Err(e) => {
                error!("Reference database has no readable header row: {}", e);
                return (store, report);
            }
        };

        for (index, record) in reader.records().enumerate() {
            match record {
                Ok(record) => {
                    let fields: Vec<(&str, &str)> = headers.iter().zip(record.iter()).collect();
                    store.insert_row(index, &fields, &mut report);
                }
                Err(e) => {
                    debug!("Reference row {} unreadable: {}", index, e);
                    report.skipped += 1;
                }
            }
        }

        report.loaded = store.len();
        (store, report)
    }

    /// Build the store from already-split rows of `(column name, value)` pairs.
    pub fn from_rows<'a, I, R>(rows: I) -> (Self, LoadReport)
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = (&'a str, &'a str)>,
    {
        // ---
        let mut store = Self::default();
        let mut report = LoadReport::default();

        for (index, row) in rows.into_iter().enumerate() {
            let fields: Vec<(&str, &str)> = row.into_iter().collect();
            store.insert_row(index, &fields, &mut report);
        }

        report.loaded = store.len();
        (store, report)
    }

    /// Look up an access point by address in any case or padding.
    pub fn lookup(&self, identifier: &str) -> Option<&AccessPointRecord> {
        self.records.get(&normalize_identifier(identifier))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Any one stored key, used to show the key format in the startup log.
    pub fn example_key(&self) -> Option<&str> {
        self.records.keys().next().map(String::as_str)
    }

    fn insert_row(&mut self, index: usize, fields: &[(&str, &str)], report: &mut LoadReport) {
        // ---
        match resolve_row(fields) {
            Ok(record) => {
                if self.records.insert(record.identifier.clone(), record).is_some() {
                    report.duplicates += 1;
                }
            }
            Err(reason) => {
                debug!("Reference row {} skipped: {}", index, reason);
                report.skipped += 1;
            }
        }
    }

    fn log_summary(&self, report: &LoadReport) {
        // ---
        if self.is_empty() {
            error!("Reference database is empty. Every scan will be unmatched.");
            return;
        }

        info!("Reference database loaded: {} access points", report.loaded);
        if let Some(key) = self.example_key() {
            info!("  Example key: '{}'", key);
        }
        if report.skipped > 0 {
            warn!("  Skipped {} unusable rows", report.skipped);
        }
        if report.duplicates > 0 {
            warn!("  {} duplicate addresses replaced by later rows", report.duplicates);
        }
    }
}

// ---

/// Turn one raw row into a typed record, or say why it cannot be used.
pub fn resolve_row(fields: &[(&str, &str)]) -> Result<AccessPointRecord, SkipReason> {
    // ---
    let (_, address) = find_field(fields, |name| {
        ADDRESS_MARKERS.iter().any(|marker| name.contains(marker))
    })
    .ok_or(SkipReason::MissingAddressColumn)?;

    let identifier = normalize_identifier(address);
    if identifier.is_empty() {
        return Err(SkipReason::EmptyAddress);
    }

    let (lat_name, lat_raw) = find_field(fields, |name| name.contains(LATITUDE_MARKER))
        .ok_or(SkipReason::MissingCoordinateColumn("latitude"))?;
    let (lon_name, lon_raw) = find_field(fields, |name| name.contains(LONGITUDE_MARKER))
        .ok_or(SkipReason::MissingCoordinateColumn("longitude"))?;

    let latitude = parse_coordinate(lat_name, lat_raw, 90.0)?;
    let longitude = parse_coordinate(lon_name, lon_raw, 180.0)?;

    let ssid = find_field(fields, |name| {
        name.contains(SSID_MARKER) && !name.contains("BSSID")
    })
    .map(|(_, value)| value.trim())
    .filter(|value| !value.is_empty())
    .map(String::from);

    Ok(AccessPointRecord {
        identifier,
        latitude,
        longitude,
        ssid,
    })
}

fn find_field<'a>(
    fields: &[(&'a str, &'a str)],
    matches: impl Fn(&str) -> bool,
) -> Option<(&'a str, &'a str)> {
    fields.iter().copied().find(|(name, _)| matches(name))
}

/// Parse a coordinate, rejecting NaN, infinities and values beyond `bound`.
fn parse_coordinate(column: &str, raw: &str, bound: f64) -> Result<f64, SkipReason> {
    // ---
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| SkipReason::InvalidCoordinate {
            column: column.to_string(),
            value: raw.to_string(),
        })?;

    if !value.is_finite() {
        return Err(SkipReason::InvalidCoordinate {
            column: column.to_string(),
            value: raw.to_string(),
        });
    }
    if value.abs() > bound {
        return Err(SkipReason::CoordinateOutOfRange {
            column: column.to_string(),
            value,
        });
    }

    Ok(value)
}

fn strip_preamble(text: &str) -> &str {
    // ---
    let text = text.trim_start_matches('\u{feff}');
    if text.starts_with(WIGLE_PREAMBLE) {
        text.split_once('\n').map_or("", |(_, rest)| rest)
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::io::Write;

    const DBFORM: &str = "\
SSID,Adr MAC (BSSID),Latitude,Longitude
Office,aa:bb:cc:dd:ee:01,10.0,20.0
Hidden,AA:BB:CC:DD:EE:02,10.0,20.1
";

    #[test]
    fn test_normalize_is_idempotent() {
        // ---
        for raw in ["  aa:bb:cc:dd:ee:ff ", "AA:BB:CC:DD:EE:FF", "\tAa:bB:cc:DD:ee:Ff\n", ""] {
            let once = normalize_identifier(raw);
            assert_eq!(normalize_identifier(&once), once);
        }
        assert_eq!(normalize_identifier(" aa:bb:cc:dd:ee:ff "), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_load_dbform_layout() {
        // ---
        let (store, report) = ReferenceStore::from_csv_str(DBFORM);

        assert_eq!(report.loaded, 2);
        assert_eq!(report.skipped, 0);

        let ap = store.lookup("AA:BB:CC:DD:EE:01").unwrap();
        assert_eq!((ap.latitude, ap.longitude), (10.0, 20.0));
        assert_eq!(ap.ssid.as_deref(), Some("Office"));

        // Lookup normalizes the same way storage does
        let ap = store.lookup("  aa:bb:cc:dd:ee:02").unwrap();
        assert_eq!((ap.latitude, ap.longitude), (10.0, 20.1));
    }

    #[test]
    fn test_load_raw_wigle_export() {
        // ---
        let text = "\
WigleWifi-1.4,appRelease=2.26,model=Pixel,release=11,device=x,display=y,board=z,brand=g
MAC,SSID,AuthMode,FirstSeen,Channel,RSSI,CurrentLatitude,CurrentLongitude,AltitudeMeters,AccuracyMeters,Type
12:34:56:78:9a:bc,Cafe,[WPA2],2024-01-01 10:00:00,6,-70,48.8566,2.3522,35,5,WIFI
12:34:56:78:9a:bd,,[ESS],2024-01-01 10:00:01,11,-80,48.8570,2.3530,35,5,WIFI
";
        let (store, report) = ReferenceStore::from_csv_str(text);

        assert_eq!(report.loaded, 2);
        let ap = store.lookup("12:34:56:78:9A:BC").unwrap();
        assert_eq!(ap.latitude, 48.8566);
        assert_eq!(ap.longitude, 2.3522);
        assert_eq!(store.lookup("12:34:56:78:9a:bd").unwrap().ssid, None);
    }

    #[test]
    fn test_rows_with_heterogeneous_columns() {
        // ---
        let rows = vec![
            vec![("BSSID", "01:02:03:04:05:06"), ("Lat", "1.5"), ("Lon", "2.5")],
            vec![("mac MAC", "01:02:03:04:05:07"), ("GeoLatitude", "-3"), ("GeoLongitude", "4")],
        ];
        let (store, report) = ReferenceStore::from_rows(rows);

        assert_eq!(report.loaded, 2);
        assert_eq!(store.lookup("01:02:03:04:05:07").unwrap().latitude, -3.0);
    }

    #[test]
    fn test_rows_without_address_are_skipped() {
        // ---
        let rows = vec![
            vec![("Name", "x"), ("Lat", "1"), ("Lon", "2")],
            vec![("MAC", "   "), ("Lat", "1"), ("Lon", "2")],
            vec![("MAC", "AA"), ("Lat", "1"), ("Lon", "2")],
        ];
        let (store, report) = ReferenceStore::from_rows(rows);

        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped, 2);
        assert!(store.lookup("aa").is_some());
    }

    #[test]
    fn test_non_numeric_coordinates_never_stored() {
        // ---
        let text = "\
MAC,Latitude,Longitude
AA:00,north,20.0
AA:01,NaN,20.0
AA:02,10.0,inf
AA:03,95.0,20.0
AA:04,10.0,-181
AA:05,10.0,20.0
";
        let (store, report) = ReferenceStore::from_csv_str(text);

        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped, 5);
        assert!(store.lookup("AA:00").is_none());
        assert!(store.lookup("AA:01").is_none());
        assert!(store.lookup("AA:05").is_some());
    }

    #[test]
    fn test_resolve_row_reasons() {
        // ---
        assert_eq!(
            resolve_row(&[("Lat", "1"), ("Lon", "2")]),
            Err(SkipReason::MissingAddressColumn)
        );
        assert_eq!(
            resolve_row(&[("MAC", "AA"), ("Lon", "2")]),
            Err(SkipReason::MissingCoordinateColumn("latitude"))
        );
        assert_eq!(
            resolve_row(&[("MAC", "AA"), ("Lat", "x"), ("Lon", "2")]),
            Err(SkipReason::InvalidCoordinate {
                column: "Lat".into(),
                value: "x".into()
            })
        );
    }

    #[test]
    fn test_duplicates_keep_later_row() {
        // ---
        let rows = vec![
            vec![("MAC", "aa:01"), ("Lat", "1"), ("Lon", "1")],
            vec![("MAC", "AA:01 "), ("Lat", "2"), ("Lon", "2")],
        ];
        let (store, report) = ReferenceStore::from_rows(rows);

        assert_eq!(report.loaded, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(store.lookup("aa:01").unwrap().latitude, 2.0);
    }

    #[test]
    fn test_missing_file_yields_empty_store() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let (store, report) = ReferenceStore::load(dir.path().join("absent.csv"));

        assert!(store.is_empty());
        assert_eq!(report, LoadReport::default());
    }

    #[test]
    fn test_load_latin1_file() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dbcompl.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"SSID,MAC,Latitude,Longitude\nCaf\xe9,aa:01,1.0,2.0\n")
            .unwrap();

        let (store, report) = ReferenceStore::load(&path);

        assert_eq!(report.loaded, 1);
        assert_eq!(store.example_key(), Some("AA:01"));
    }
}
