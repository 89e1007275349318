//! Payload records exchanged with the Qilowatt service.
//!
//! Field names follow the vendor's JSON schema, hence the PascalCase renames.

use serde_derive::{Deserialize, Serialize};

/// Grid-side reading: per-phase power, current and voltage plus energy counters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnergySnapshot {
    pub power: [f64; 3],
    pub today: f64,
    pub total: f64,
    pub current: [f64; 3],
    pub voltage: [f64; 3],
    pub frequency: f64,
}

/// Alarm codes are numeric placeholders for most brands, fault text for others.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlarmCodes {
    Numeric(Vec<i64>),
    Text(Vec<String>),
}

impl AlarmCodes {
    pub const MAX_LEN: usize = 6;

    /// Six zero placeholders, the payload default.
    pub fn none() -> Self {
        AlarmCodes::Numeric(vec![0; Self::MAX_LEN])
    }

    pub fn len(&self) -> usize {
        match self {
            AlarmCodes::Numeric(codes) => codes.len(),
            AlarmCodes::Text(codes) => codes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AlarmCodes {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricsSnapshot {
    pub pv_power: [f64; 2],
    pub pv_voltage: [f64; 2],
    pub pv_current: [f64; 2],
    pub load_power: Vec<f64>,
    pub alarm_codes: AlarmCodes,
    #[serde(rename = "BatterySOC")]
    pub battery_soc: i64,
    pub load_current: Vec<f64>,
    pub battery_power: [f64; 1],
    pub battery_current: [f64; 1],
    pub battery_voltage: [f64; 1],
    pub inverter_status: i64,
    pub grid_export_limit: f64,
    pub battery_temperature: [f64; 1],
    pub inverter_temperature: f64,
}

/// Inbound WORKMODE instruction. Owned by the service; every field is optional
/// on the wire and only ever read here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkModeCommand {
    #[serde(rename = "Mode", default)]
    pub mode: Option<String>,
    #[serde(rename = "_source", default)]
    pub source: Option<String>,
    #[serde(rename = "BatterySoc", default)]
    pub battery_soc: Option<f64>,
    #[serde(rename = "PowerLimit", default)]
    pub power_limit: Option<f64>,
    #[serde(rename = "PeakShaving", default)]
    pub peak_shaving: Option<f64>,
    #[serde(rename = "ChargeCurrent", default)]
    pub charge_current: Option<f64>,
    #[serde(rename = "DischargeCurrent", default)]
    pub discharge_current: Option<f64>,
}
