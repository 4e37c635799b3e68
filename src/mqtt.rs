//! MQTT subscriber feeding uplink payloads into the ingestion pipeline.
//!
//! The event loop reconnects on its own on the next `poll` after an error.
//! We subscribe again on every `ConnAck` so a clean-session reconnect keeps
//! receiving uplinks, and back off between failed attempts.

use std::time::Duration;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tracing::{debug, error, info, warn};

use crate::{config::parse_broker_url, ingest::Pipeline, Config};

// ---

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Build client options from configuration.
pub fn mqtt_options(config: &Config) -> Result<MqttOptions> {
    // ---
    let (host, port) = parse_broker_url(&config.mqtt_broker_url)?;

    let mut options = MqttOptions::new(config.mqtt_client_id.clone(), host, port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_credentials(config.mqtt_username.clone(), config.mqtt_password.clone());
    Ok(options)
}

/// Next reconnect delay: doubled, capped at `MAX_BACKOFF`.
pub fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// Receive uplinks forever, handing each payload to the pipeline in order.
///
/// Only returns if the options cannot be built.
pub async fn run_subscriber(config: Config, pipeline: Pipeline) -> Result<()> {
    // ---
    let options = mqtt_options(&config)?;
    info!("Connecting to MQTT broker at {}", config.mqtt_broker_url);

    let (client, mut eventloop) = AsyncClient::new(options, 10);
    let mut backoff = MIN_BACKOFF;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                backoff = MIN_BACKOFF;
                info!("Connected to MQTT broker");
                match client.try_subscribe(config.mqtt_topic.as_str(), QoS::AtLeastOnce) {
                    Ok(()) => info!("Subscribed to MQTT topic: {}", config.mqtt_topic),
                    Err(e) => error!("Failed to subscribe to '{}': {}", config.mqtt_topic, e),
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(
                    "Message on '{}' ({} bytes)",
                    publish.topic,
                    publish.payload.len()
                );
                pipeline.process(&publish.payload).await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT connection error: {}. Retrying in {:?}", e, backoff);
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::path::PathBuf;

    fn config(broker: &str) -> Config {
        // ---
        Config {
            mqtt_broker_url: broker.to_string(),
            mqtt_username: "my-app@ttn".to_string(),
            mqtt_password: "NNSXS.SECRET".to_string(),
            mqtt_topic: "v3/+/devices/+/up".to_string(),
            mqtt_client_id: "wifitrack-test".to_string(),
            reference_db_path: PathBuf::from("dbform.csv"),
            history_path: PathBuf::from("history.json"),
            static_dir: PathBuf::from("public"),
            http_port: 3000,
        }
    }

    #[test]
    fn test_options_from_config() {
        // ---
        let options = mqtt_options(&config("mqtt://broker.local:1884")).unwrap();

        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(options.client_id(), "wifitrack-test");
        assert_eq!(options.keep_alive(), KEEP_ALIVE);
    }

    #[test]
    fn test_options_reject_bad_url() {
        // ---
        assert!(mqtt_options(&config("mqtt://broker.local:99999")).is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        // ---
        let mut delay = MIN_BACKOFF;
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(delay.as_secs());
            delay = next_backoff(delay);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 30, 30]);
    }
}
