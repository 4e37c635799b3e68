use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tempfile::TempDir;

use wifitrack::{
    estimator::PositionEstimator,
    history::HistoryLog,
    ingest::{IngestOutcome, Pipeline},
    reference::ReferenceStore,
    routes::{self, AppState},
};

#[derive(Debug, Deserialize)]
struct TrajectoryPoint {
    lat: f64,
    lon: f64,
    timestamp: DateTime<Utc>,
    aps_count: usize,
}

#[derive(Debug, Deserialize)]
struct Health {
    status: String,
    reference_records: usize,
    trajectory_points: usize,
}

const REFERENCE_CSV: &str = "\
SSID,Adr MAC (BSSID),Latitude,Longitude
Office,AA:BB:CC:DD:EE:01,10.0,20.0
Lobby,AA:BB:CC:DD:EE:02,10.0,20.1
";

struct Service {
    base: String,
    pipeline: Pipeline,
    dir: TempDir,
}

/// Start the HTTP service in-process on an ephemeral port.
async fn start(reference_csv: &str) -> Result<Service> {
    // ---
    let dir = tempfile::tempdir()?;
    let static_dir = dir.path().join("public");
    std::fs::create_dir(&static_dir)?;
    std::fs::write(static_dir.join("index.html"), "<html>map</html>")?;

    let reference_path = dir.path().join("dbform.csv");
    std::fs::write(&reference_path, reference_csv)?;

    let (store, _) = ReferenceStore::load(&reference_path);
    let store = Arc::new(store);
    let history = Arc::new(HistoryLog::open(dir.path().join("history.json")).await);
    let pipeline = Pipeline::new(PositionEstimator::new(store.clone()), history.clone());

    let app = routes::router(AppState { history, store }, &static_dir);
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move { axum::serve(listener, app).await });

    Ok(Service {
        base: format!("http://{}", addr),
        pipeline,
        dir,
    })
}

fn uplink(aps: &str) -> Vec<u8> {
    format!(r#"{{"uplink_message":{{"decoded_payload":{{"wifi_access_points":{aps}}}}}}}"#)
        .into_bytes()
}

#[tokio::test]
async fn trajectory_reflects_ingested_scans() -> Result<()> {
    // ---
    let service = start(REFERENCE_CSV).await?;
    let client = Client::new();
    let url = format!("{}/api/trajectory", service.base);

    let points: Vec<TrajectoryPoint> = client.get(&url).send().await?.json().await?;
    assert!(points.is_empty(), "fresh service should have no trajectory");

    let outcome = service
        .pipeline
        .handle_payload(&uplink(
            r#"[{"mac":"aa:bb:cc:dd:ee:01","rssi":-50},{"mac":"aa:bb:cc:dd:ee:02","rssi":-60}]"#,
        ))
        .await?;
    assert!(matches!(outcome, IngestOutcome::Recorded { .. }));

    // Unmatched and malformed reports do not reach the trajectory
    service
        .pipeline
        .process(&uplink(r#"[{"mac":"00:00:00:00:00:00","rssi":-40}]"#))
        .await;
    service.pipeline.process(b"{broken").await;

    let points: Vec<TrajectoryPoint> = client.get(&url).send().await?.json().await?;
    assert_eq!(points.len(), 1);

    let p = &points[0];
    assert!((p.lat - 10.0).abs() < 1e-9, "latitude {} should be 10.0", p.lat);
    assert!((p.lon - 20.033).abs() < 1e-3, "longitude {} should be ~20.033", p.lon);
    assert_eq!(p.aps_count, 2);
    assert!(p.timestamp > DateTime::from_timestamp(0, 0).unwrap());

    // The history file on disk holds the same point
    let on_disk = std::fs::read_to_string(service.dir.path().join("history.json"))?;
    assert!(on_disk.contains("\"aps_count\":2"));

    Ok(())
}

#[tokio::test]
async fn trajectory_limit_returns_latest() -> Result<()> {
    // ---
    let service = start(REFERENCE_CSV).await?;
    for rssi in [-50, -60, -70] {
        let payload = uplink(&format!(r#"[{{"mac":"AA:BB:CC:DD:EE:02","rssi":{rssi}}}]"#));
        service.pipeline.handle_payload(&payload).await?;
    }

    let url = format!("{}/api/trajectory?limit=2", service.base);
    let points: Vec<TrajectoryPoint> = Client::new().get(&url).send().await?.json().await?;

    assert_eq!(points.len(), 2);
    assert!(points[0].timestamp <= points[1].timestamp);

    Ok(())
}

#[tokio::test]
async fn health_reports_reference_state() -> Result<()> {
    // ---
    let client = Client::new();

    let service = start(REFERENCE_CSV).await?;
    let health: Health = client
        .get(format!("{}/health", service.base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(health.status, "ok");
    assert_eq!(health.reference_records, 2);
    assert_eq!(health.trajectory_points, 0);

    // An unusable reference database keeps the service up but degraded
    let degraded = start("no,useful,columns\n1,2,3\n").await?;
    let health: Health = client
        .get(format!("{}/health", degraded.base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(health.status, "degraded");
    assert_eq!(health.reference_records, 0);

    Ok(())
}

#[tokio::test]
async fn static_files_are_served() -> Result<()> {
    // ---
    let service = start(REFERENCE_CSV).await?;
    let body = Client::new()
        .get(format!("{}/index.html", service.base))
        .send()
        .await?
        .text()
        .await?;

    assert_eq!(body, "<html>map</html>");
    Ok(())
}
