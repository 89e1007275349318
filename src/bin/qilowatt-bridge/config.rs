use std::{env, fs, path::PathBuf};

use hass2qilowatt::{
    config_flow::{DeviceInput, OptionsInput, UserInput},
    host::{DeviceEntry, MemoryRegistry},
    mqtt_config::MqttConfig,
};
use log::{info, warn};
use serde_derive::Deserialize;

pub const DEFAULT_STARTUP_DELAY: u64 = 60;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct QilowattConfig {
    #[serde(flatten)]
    pub user: UserInput,
    #[serde(flatten)]
    pub overrides: DeviceInput,
    #[serde(flatten)]
    pub options: OptionsInput,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub entities: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub qilowatt: QilowattConfig,
    /// Seconds to wait for the state store to fill before polling starts.
    pub startup_delay: Option<u64>,
    /// Broker carrying the Home Assistant statestream.
    pub home_assistant: Option<MqttConfig>,
    pub statestream_base_topic: Option<String>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Config {
    /// Reads `config.toml` from the working directory, or next to the
    /// executable, then applies environment overrides.
    pub fn load() -> Config {
        let contents = match config_path().and_then(|path| {
            info!("loading configuration from {}", path.display());
            Ok(fs::read_to_string(path)?)
        }) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Could not read config.toml: {e}");
                "".into()
            }
        };
        let mut config = Config::parse(&contents);
        config.apply_env(|key| env::var(key).ok());
        config
    }

    pub fn parse(contents: &str) -> Config {
        match toml::from_str::<Config>(contents) {
            Ok(config) => config,
            Err(e) => {
                warn!("toml config unparsable: {e}");
                Config::default()
            }
        }
    }

    /// Overwrites settings with the environment variables `lookup` finds.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let user = &mut self.qilowatt.user;
        // $QILOWATT_MQTT_USERNAME, $QILOWATT_MQTT_PASSWORD, $QILOWATT_INVERTER_ID
        if let Some(username) = lookup("QILOWATT_MQTT_USERNAME") {
            user.mqtt_username = username;
        }
        if let Some(password) = lookup("QILOWATT_MQTT_PASSWORD") {
            user.mqtt_password = password;
        }
        if let Some(inverter_id) = lookup("QILOWATT_INVERTER_ID") {
            user.inverter_id = inverter_id;
        }
        // $QILOWATT_INVERTER_MODEL (optional)
        if let Some(model) = lookup("QILOWATT_INVERTER_MODEL") {
            user.inverter_model = Some(model);
        }

        // $MQTT_BROKER_HOST
        if let Some(host) = lookup("MQTT_BROKER_HOST") {
            self.home_assistant
                .get_or_insert_with(MqttConfig::default)
                .host = host;
        }
        // $MQTT_USERNAME (optional)
        if let Some(username) = lookup("MQTT_USERNAME") {
            self.home_assistant
                .get_or_insert_with(MqttConfig::default)
                .username = Some(username);
        }
        // $MQTT_PASSWORD (optional)
        if let Some(password) = lookup("MQTT_PASSWORD") {
            self.home_assistant
                .get_or_insert_with(MqttConfig::default)
                .password = Some(password);
        }
        // $MQTT_PORT (optional)
        if let Some(port) = lookup("MQTT_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    self.home_assistant
                        .get_or_insert_with(MqttConfig::default)
                        .port = Some(port)
                }
                Err(e) => warn!("ignoring MQTT_PORT={port}: {e}"),
            }
        }
    }

    pub fn startup_delay(&self) -> u64 {
        self.startup_delay.unwrap_or(DEFAULT_STARTUP_DELAY)
    }

    pub fn registry(&self) -> MemoryRegistry {
        let mut registry = MemoryRegistry::new();
        for device in &self.devices {
            registry.add_device(DeviceEntry {
                id: device.id.clone(),
                name: device.name.clone(),
                manufacturer: device.manufacturer.clone(),
                model: device.model.clone(),
            });
            for entity_id in &device.entities {
                registry.add_entity(entity_id, Some(&device.id), None);
            }
        }
        registry
    }
}

// load configuration from current working dir, or relative to executable if former location fails
fn config_path() -> anyhow::Result<PathBuf> {
    let mut path = env::current_dir()?;
    path.push("config.toml");
    if !path.exists() {
        info!("{} does not exist. Trying relative path", path.display());
        path = env::current_exe()?;
        path.pop();
        path.push("config.toml");
    }
    Ok(path)
}
