use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Local;
use hass2qilowatt::{
    config_entry::Credentials,
    mqtt_config::MqttConfig,
    snapshot::{EnergySnapshot, MetricsSnapshot, WorkModeCommand},
    telemetry::{CommandCallback, Liveness, TelemetryConnection},
};
use log::{debug, error, info, warn};
use rumqttc::{
    tokio_rustls::rustls::{ClientConfig, RootCertStore},
    Client, ConnectReturnCode, Event, MqttOptions, Outgoing, Packet, QoS, Transport,
};
use serde_derive::Deserialize;
use serde_json::json;

pub const QILOWATT_BROKER_HOST: &str = "mqtt.qilowatt.it";
pub const QILOWATT_BROKER_PORT: u16 = 8883;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Waits out the reconnect delay, returning early with `true` once `stopping`
/// is set.
fn reconnect_delay(stopping: &AtomicBool) -> bool {
    let mut waited = Duration::ZERO;
    while waited < RECONNECT_DELAY {
        if stopping.load(Ordering::SeqCst) {
            return true;
        }
        thread::sleep(STOP_CHECK_INTERVAL);
        waited += STOP_CHECK_INTERVAL;
    }
    stopping.load(Ordering::SeqCst)
}

/// Builds client options for `config`, with native root certificates when
/// TLS is enabled.
pub fn mqtt_options(config: &MqttConfig, default_client_id: &str) -> anyhow::Result<MqttOptions> {
    let client_id = config
        .client_id
        .clone()
        .unwrap_or_else(|| default_client_id.to_string());
    let mut mqttoptions = MqttOptions::new(client_id, &config.host, config.port_or_default());
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    if config.use_tls() {
        let native = rustls_native_certs::load_native_certs();
        for e in &native.errors {
            warn!("could not load a platform certificate: {e}");
        }
        if native.certs.is_empty() {
            bail!("no platform root certificates available");
        }
        let mut roots = RootCertStore::empty();
        for cert in native.certs {
            roots.add(cert).context("invalid platform certificate")?;
        }

        let client_config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        mqttoptions.set_transport(Transport::tls_with_config(client_config.into()));
    }

    //parse the mqtt authentication options
    if let Some((username, password)) = match (&config.username, &config.password) {
        (None, None) => None,
        (None, Some(_)) => None,
        (Some(username), None) => Some((username.clone(), "".into())),
        (Some(username), Some(password)) => Some((username.clone(), password.clone())),
    } {
        mqttoptions.set_credentials(username, password);
    }
    Ok(mqttoptions)
}

pub fn sensor_topic(inverter_id: &str) -> String {
    format!("Q/{inverter_id}/SENSOR")
}

pub fn command_topic(inverter_id: &str) -> String {
    format!("Q/{inverter_id}/cmnd/backlog")
}

#[derive(Debug, Deserialize)]
struct Backlog {
    #[serde(rename = "WORKMODE")]
    workmode: Option<WorkModeCommand>,
}

/// Extracts the WORKMODE command of a backlog payload, if it carries one.
pub fn parse_command(payload: &[u8]) -> anyhow::Result<Option<WorkModeCommand>> {
    let backlog: Backlog = serde_json::from_slice(payload).context("malformed command payload")?;
    Ok(backlog.workmode)
}

/// Qilowatt cloud connection on top of a blocking rumqttc client.
pub struct RumqttcWrapper {
    config: MqttConfig,
    inverter_id: String,
    liveness: Liveness,
    callback: Option<Arc<CommandCallback>>,
    client: Option<Client>,
    network: Option<JoinHandle<()>>,
    /// Set by `disconnect`; ends the network thread even while the broker is
    /// unreachable and the queued disconnect request is never processed.
    stopping: Arc<AtomicBool>,
}

impl RumqttcWrapper {
    fn publish_json(&mut self, payload: serde_json::Value) -> anyhow::Result<()> {
        let Some(client) = self.client.as_mut() else {
            bail!("not connected");
        };
        let topic = sensor_topic(&self.inverter_id);
        debug!("Publishing to {topic} with payload {payload}");
        let payload = serde_json::to_vec(&payload)?;
        client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .context("publish queue rejected the message")?;
        Ok(())
    }
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

impl TelemetryConnection for RumqttcWrapper {
    fn new(credentials: &Credentials) -> Self {
        let config = MqttConfig {
            host: QILOWATT_BROKER_HOST.to_string(),
            port: Some(QILOWATT_BROKER_PORT),
            username: Some(credentials.username.clone()),
            password: Some(credentials.password.clone()),
            client_id: Some(format!("qilowatt-bridge-{}", credentials.inverter_id)),
            tls: Some(true),
        };
        Self {
            config,
            inverter_id: credentials.inverter_id.clone(),
            liveness: Liveness::new(),
            callback: None,
            client: None,
            network: None,
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    fn connect(&mut self) -> anyhow::Result<()> {
        if self.client.is_some() {
            return Ok(());
        }
        let options = mqtt_options(&self.config, "qilowatt-bridge")?;
        let (client, mut connection) = Client::new(options, 64);

        let stopping = Arc::new(AtomicBool::new(false));
        self.stopping = stopping.clone();
        let listener = client.clone();
        let liveness = self.liveness.clone();
        let callback = self.callback.clone();
        let inverter_id = self.inverter_id.clone();
        let commands = command_topic(&self.inverter_id);
        let network = thread::Builder::new()
            .name(format!("qilowatt-mqtt-{inverter_id}"))
            .spawn(move || {
                for notification in connection.iter() {
                    if stopping.load(Ordering::SeqCst) {
                        debug!("Qilowatt network thread for {inverter_id} stopping");
                        break;
                    }
                    match notification {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            if ack.code != ConnectReturnCode::Success {
                                warn!("Qilowatt broker refused {inverter_id}: {:?}", ack.code);
                                continue;
                            }
                            info!("Connected to Qilowatt broker as {inverter_id}");
                            // subscriptions do not survive a clean session
                            if let Err(e) = listener.try_subscribe(&commands, QoS::AtLeastOnce) {
                                error!("subscription to {commands} failed: {e}");
                            }
                            liveness.set(true);
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) if publish.topic == commands => {
                            match parse_command(&publish.payload) {
                                Ok(Some(command)) => {
                                    if let Some(callback) = callback.as_deref() {
                                        callback(command);
                                    }
                                }
                                Ok(None) => debug!("ignoring backlog without WORKMODE"),
                                Err(e) => warn!("{e:#}"),
                            }
                        }
                        Ok(Event::Incoming(Packet::Disconnect)) => {
                            warn!("Qilowatt broker disconnected {inverter_id}");
                            liveness.set(false);
                        }
                        Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                            liveness.set(false);
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            if liveness.is_up() {
                                warn!("Qilowatt connection for {inverter_id} lost: {e}");
                            } else {
                                debug!("Qilowatt connection attempt failed: {e}");
                            }
                            liveness.set(false);
                            if reconnect_delay(&stopping) {
                                break;
                            }
                        }
                    }
                }
                liveness.set(false);
            })?;

        self.client = Some(client);
        self.network = Some(network);
        Ok(())
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        self.stopping.store(true, Ordering::SeqCst);
        self.liveness.set(false);
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        let result = client.disconnect().context("disconnect request failed");
        // the thread sees `stopping` within one connection attempt, so it is not joined
        self.network.take();
        result
    }

    fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    fn set_energy_data(&mut self, data: EnergySnapshot) -> anyhow::Result<()> {
        self.publish_json(json!({ "Time": timestamp(), "ENERGY": data }))
    }

    fn set_metrics_data(&mut self, data: MetricsSnapshot) -> anyhow::Result<()> {
        self.publish_json(json!({ "Time": timestamp(), "METRICS": data }))
    }

    fn set_command_callback(&mut self, callback: CommandCallback) {
        self.callback = Some(Arc::new(callback));
    }
}
