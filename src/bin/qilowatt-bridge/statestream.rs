//! Mirrors Home Assistant entity states published by `mqtt_statestream`
//! into an in-memory state store.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hass2qilowatt::{host::MemoryStates, mqtt_config::MqttConfig};
use log::{debug, info, warn};
use rumqttc::{Client, Event, Packet, QoS};

use crate::rumqttc_wrapper::mqtt_options;

pub const DEFAULT_BASE_TOPIC: &str = "homeassistant";

/// Maps `<base>/<domain>/<object_id>/state` to `<domain>.<object_id>`.
pub fn entity_id_from_topic(base: &str, topic: &str) -> Option<String> {
    let rest = topic.strip_prefix(base)?.strip_prefix('/')?;
    let mut parts = rest.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(domain), Some(object_id), Some("state"), None)
            if !domain.is_empty() && !object_id.is_empty() =>
        {
            Some(format!("{domain}.{object_id}"))
        }
        _ => None,
    }
}

/// Statestream encodes plain states as JSON strings; anything else is kept
/// verbatim.
pub fn decode_state(payload: &[u8]) -> String {
    let raw = String::from_utf8_lossy(payload);
    match serde_json::from_str::<String>(&raw) {
        Ok(text) => text,
        Err(_) => raw.trim().to_string(),
    }
}

/// Subscribes to the statestream topics and keeps `states` up to date from a
/// background thread.
pub fn spawn(config: &MqttConfig, base: &str, states: Arc<MemoryStates>) -> anyhow::Result<()> {
    let options = mqtt_options(config, "qilowatt-bridge-statestream")?;
    let (client, mut connection) = Client::new(options, 64);
    let filter = format!("{base}/+/+/state");
    let base = base.to_string();

    thread::Builder::new()
        .name("statestream".into())
        .spawn(move || {
            for notification in connection.iter() {
                match notification {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Subscribing to {filter}");
                        if let Err(e) = client.try_subscribe(&filter, QoS::AtMostOnce) {
                            warn!("subscription to {filter} failed: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if let Some(entity_id) = entity_id_from_topic(&base, &publish.topic) {
                            let state = decode_state(&publish.payload);
                            debug!("{entity_id} = {state}");
                            states.set(entity_id, state);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("statestream connection error: {e}");
                        thread::sleep(Duration::from_secs(5));
                    }
                }
            }
        })?;
    Ok(())
}
