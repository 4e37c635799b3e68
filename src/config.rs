//! Configuration loader for the `wifitrack` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
//!
use std::{env, path::PathBuf};

use anyhow::{anyhow, Result};

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u16 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u16>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Read an optional string environment variable with a default value.
macro_rules! env_or {
    ($var_name:expr, $default:expr) => {
        env::var($var_name).unwrap_or_else(|_| $default.into())
    };
}

const DEFAULT_BROKER_URL: &str = "mqtt://eu1.cloud.thethings.network:1883";
const DEFAULT_TOPIC: &str = "v3/+/devices/+/up";
const DEFAULT_MQTT_PORT: u16 = 1883;

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Broker URL, `mqtt://host:port`.
    pub mqtt_broker_url: String,

    /// Broker username (TTN application id).
    pub mqtt_username: String,

    /// Broker password (TTN API key).
    pub mqtt_password: String,

    /// Uplink topic filter.
    pub mqtt_topic: String,

    pub mqtt_client_id: String,

    /// CSV file with known access point coordinates.
    pub reference_db_path: PathBuf,

    /// JSON file holding the trajectory.
    pub history_path: PathBuf,

    /// Directory served for any path not handled by the API.
    pub static_dir: PathBuf,

    pub http_port: u16,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `MQTT_USERNAME` – broker username
/// - `MQTT_PASSWORD` – broker password / API key
///
/// Optional:
/// - `MQTT_BROKER_URL` – (default: TTN EU1 cluster, port 1883)
/// - `MQTT_TOPIC` – (default: `v3/+/devices/+/up`)
/// - `MQTT_CLIENT_ID` – (default: `wifitrack-<uuid>`)
/// - `REFERENCE_DB_PATH` – (default: `dbform.csv`)
/// - `HISTORY_PATH` – (default: `history.json`)
/// - `STATIC_DIR` – (default: `public`)
/// - `HTTP_PORT` – (default: 3000)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let mqtt_username = require_env!("MQTT_USERNAME");
    let mqtt_password = require_env!("MQTT_PASSWORD");
    let mqtt_broker_url = env_or!("MQTT_BROKER_URL", DEFAULT_BROKER_URL);
    let mqtt_topic = env_or!("MQTT_TOPIC", DEFAULT_TOPIC);
    let mqtt_client_id = env_or!(
        "MQTT_CLIENT_ID",
        format!("wifitrack-{}", uuid::Uuid::new_v4().simple())
    );
    let reference_db_path = PathBuf::from(env_or!("REFERENCE_DB_PATH", "dbform.csv"));
    let history_path = PathBuf::from(env_or!("HISTORY_PATH", "history.json"));
    let static_dir = PathBuf::from(env_or!("STATIC_DIR", "public"));
    let http_port = parse_env_u16!("HTTP_PORT", 3000);

    // Fail at startup rather than on first connect
    parse_broker_url(&mqtt_broker_url)?;

    Ok(Config {
        mqtt_broker_url,
        mqtt_username,
        mqtt_password,
        mqtt_topic,
        mqtt_client_id,
        reference_db_path,
        history_path,
        static_dir,
        http_port,
    })
}

/// Split a broker URL into host and port.
///
/// Accepts `mqtt://host:port`, `tcp://host:port` or a bare `host[:port]`.
pub fn parse_broker_url(url: &str) -> Result<(String, u16)> {
    // ---
    let rest = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url)
        .trim_end_matches('/');

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|e| anyhow!("Invalid port in broker URL '{}': {}", url, e))?;
            (host, port)
        }
        None => (rest, DEFAULT_MQTT_PORT),
    };

    if host.is_empty() {
        return Err(anyhow!("Broker URL '{}' has no host", url));
    }

    Ok((host.to_string(), port))
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the broker password while showing all other values.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  MQTT_BROKER_URL   : {}", self.mqtt_broker_url);
        tracing::info!("  MQTT_USERNAME     : {}", self.mqtt_username);
        tracing::info!("  MQTT_PASSWORD     : {}", mask(&self.mqtt_password));
        tracing::info!("  MQTT_TOPIC        : {}", self.mqtt_topic);
        tracing::info!("  MQTT_CLIENT_ID    : {}", self.mqtt_client_id);
        tracing::info!("  REFERENCE_DB_PATH : {}", self.reference_db_path.display());
        tracing::info!("  HISTORY_PATH      : {}", self.history_path.display());
        tracing::info!("  STATIC_DIR        : {}", self.static_dir.display());
        tracing::info!("  HTTP_PORT         : {}", self.http_port);
    }
}

/// Keep the first few characters of a secret so operators can tell keys apart.
fn mask(secret: &str) -> String {
    // ---
    let visible: String = secret.chars().take(6).collect();
    if secret.chars().count() <= 6 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}
