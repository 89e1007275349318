use std::time::Duration;

use crate::inverter::{InverterModel, Overrides};
use crate::DOMAIN;

pub const CONF_MQTT_USERNAME: &str = "mqtt_username";
pub const CONF_MQTT_PASSWORD: &str = "mqtt_password";
pub const CONF_INVERTER_ID: &str = "inverter_id";
pub const CONF_INVERTER_MODEL: &str = "inverter_model";
pub const CONF_DEVICE_ID: &str = "device_id";
pub const CONF_BATTERY_SOC_SENSOR: &str = "battery_soc_sensor";
pub const CONF_EXPORT_LIMIT: &str = "export_limit";
pub const CONF_UPDATE_INTERVAL: &str = "update_interval";

pub const DEFAULT_UPDATE_INTERVAL: u64 = 10;
pub const MIN_UPDATE_INTERVAL: u64 = 5;

/// Validated settings of one configured inverter.
#[derive(Clone, Debug, PartialEq)]
pub struct EntryData {
    pub mqtt_username: String,
    pub mqtt_password: String,
    pub inverter_id: String,
    pub inverter_model: InverterModel,
    pub device_id: Option<String>,
    pub battery_soc_sensor: Option<String>,
    pub export_limit: Option<f64>,
}

impl EntryData {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            battery_soc_sensor: self.battery_soc_sensor.clone(),
            export_limit: self.export_limit,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EntryOptions {
    /// Seconds between poll cycles.
    pub update_interval: u64,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            update_interval: DEFAULT_UPDATE_INTERVAL,
        }
    }
}

impl EntryOptions {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval.max(MIN_UPDATE_INTERVAL))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConfigEntry {
    pub entry_id: String,
    pub title: String,
    pub data: EntryData,
    pub options: EntryOptions,
}

impl ConfigEntry {
    pub fn new(data: EntryData) -> Self {
        Self {
            entry_id: format!("{DOMAIN}_{}", data.inverter_id),
            title: format!("Inverter {}", data.inverter_id),
            data,
            options: EntryOptions::default(),
        }
    }

    pub fn inverter_id(&self) -> &str {
        &self.data.inverter_id
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.data.mqtt_username.clone(),
            password: self.data.mqtt_password.clone(),
            inverter_id: self.data.inverter_id.clone(),
        }
    }
}

/// What the telemetry connection is constructed from.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub inverter_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("inverter_id", &self.inverter_id)
            .finish()
    }
}
