//! Brand adapters translating host sensor states into Qilowatt snapshots.

mod deye_solarassistant;
mod growatt;
mod huawei;
mod reader;
mod sofar;
mod solarman;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config_entry::ConfigEntry;
use crate::host::{DeviceEntities, EntityRegistry, StateStore};
use crate::snapshot::{EnergySnapshot, MetricsSnapshot};
use crate::Error;

pub use deye_solarassistant::DeyeSolarAssistantInverter;
pub use growatt::GrowattInverter;
pub use huawei::HuaweiInverter;
pub use reader::{derive_load_current, round2, Resolution, StateReader};
pub use sofar::SofarInverter;
pub use solarman::SolarmanInverter;

pub trait Inverter: Send {
    fn get_energy_data(&mut self) -> EnergySnapshot;
    fn get_metrics_data(&mut self) -> MetricsSnapshot;
}

/// Deployment-supplied values that win over brand defaults.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overrides {
    /// Entity id of an alternate battery state-of-charge sensor.
    pub battery_soc_sensor: Option<String>,
    /// Fixed grid export limit in watts.
    pub export_limit: Option<f64>,
}

impl Overrides {
    fn battery_soc(&self, reader: &StateReader, field: &str) -> i64 {
        match &self.battery_soc_sensor {
            Some(entity_id) => reader.get_entity_int(entity_id, 0),
            None => reader.get_state_int(field, 0),
        }
    }

    fn grid_export_limit(&self, reader: &StateReader, field: &str) -> f64 {
        self.export_limit
            .unwrap_or_else(|| reader.get_state_float(field, 0.0))
    }
}

/// Everything an adapter needs, resolved once when the entry is set up.
#[derive(Clone)]
pub struct AdapterContext {
    pub states: Arc<dyn StateStore>,
    pub device: DeviceEntities,
    pub overrides: Overrides,
}

impl AdapterContext {
    pub fn new(states: Arc<dyn StateStore>) -> Self {
        Self {
            states,
            device: DeviceEntities::default(),
            overrides: Overrides::default(),
        }
    }

    pub fn from_entry(
        entry: &ConfigEntry,
        states: Arc<dyn StateStore>,
        registry: &dyn EntityRegistry,
    ) -> Self {
        let device = entry
            .data
            .device_id
            .as_deref()
            .map(|device_id| DeviceEntities::scan(registry, device_id))
            .unwrap_or_default();
        Self {
            states,
            device,
            overrides: entry.data.overrides(),
        }
    }

    pub fn with_device(mut self, device: DeviceEntities) -> Self {
        self.device = device;
        self
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    fn reader(&self, resolution: Resolution) -> StateReader {
        StateReader::new(self.states.clone(), self.device.clone(), resolution)
    }
}

pub type Constructor = fn(AdapterContext) -> Box<dyn Inverter>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InverterModel {
    DeyeSolarAssistant,
    Solarman,
    Sofar,
    Huawei,
    Growatt,
}

impl InverterModel {
    pub const ALL: [InverterModel; 5] = [
        InverterModel::DeyeSolarAssistant,
        InverterModel::Solarman,
        InverterModel::Sofar,
        InverterModel::Huawei,
        InverterModel::Growatt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InverterModel::DeyeSolarAssistant => "Deye-SolarAssistant",
            InverterModel::Solarman => "Solarman",
            InverterModel::Sofar => "Sofar",
            InverterModel::Huawei => "Huawei",
            InverterModel::Growatt => "Growatt",
        }
    }

    /// Exact, case-sensitive match against the supported model names.
    pub fn resolve(name: &str) -> Result<Self, Error> {
        Self::ALL
            .into_iter()
            .find(|model| model.as_str() == name)
            .ok_or_else(|| Error::UnsupportedModel(name.to_string()))
    }

    pub fn constructor(self) -> Constructor {
        match self {
            InverterModel::DeyeSolarAssistant => deye_solarassistant::build,
            InverterModel::Solarman => solarman::build,
            InverterModel::Sofar => sofar::build,
            InverterModel::Huawei => huawei::build,
            InverterModel::Growatt => growatt::build,
        }
    }

    /// Whether field lookups are scoped to a selected device.
    pub fn requires_device(self) -> bool {
        matches!(
            self,
            InverterModel::Solarman | InverterModel::Sofar | InverterModel::Growatt
        )
    }

    /// Whether the setup flow asks for [`Overrides`].
    pub fn supports_overrides(self) -> bool {
        self.requires_device()
    }

    /// Device manufacturer string used to auto-detect the brand.
    pub fn manufacturer(self) -> &'static str {
        match self {
            InverterModel::DeyeSolarAssistant => "SolarAssistant",
            InverterModel::Solarman => "Solarman",
            InverterModel::Sofar => "Sofar",
            InverterModel::Huawei => "Huawei",
            InverterModel::Growatt => "Growatt",
        }
    }

    pub fn from_manufacturer(manufacturer: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|model| manufacturer.eq_ignore_ascii_case(model.manufacturer()))
    }
}

impl FromStr for InverterModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::resolve(s)
    }
}

impl fmt::Display for InverterModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn build_inverter(name: &str, ctx: AdapterContext) -> Result<Box<dyn Inverter>, Error> {
    let constructor = InverterModel::resolve(name)?.constructor();
    Ok(constructor(ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryStates;
    use crate::snapshot::AlarmCodes;

    fn ctx() -> AdapterContext {
        AdapterContext::new(Arc::new(MemoryStates::new()))
    }

    #[test]
    fn every_supported_name_builds_an_adapter() {
        for model in InverterModel::ALL {
            assert_eq!(InverterModel::resolve(model.as_str()).unwrap(), model);
            assert!(build_inverter(model.as_str(), ctx()).is_ok());
        }
    }

    #[test]
    fn unsupported_names_fail_closed() {
        for name in ["Growatt-X", "sofar", " Sofar", "", "Deye-Synsynk"] {
            let err = build_inverter(name, ctx()).err().expect("must fail");
            assert!(matches!(err, Error::UnsupportedModel(ref n) if n == name));
            assert_eq!(err.to_string(), format!("Unsupported inverter model: {name}"));
        }
    }

    /// Every entity id an adapter reads, paired with whether lookups go
    /// through the selected device.
    fn read_entities(model: InverterModel) -> (Vec<String>, bool) {
        fn prefixed(prefix: &str, fields: &[&str]) -> Vec<String> {
            fields.iter().map(|field| format!("{prefix}{field}")).collect()
        }
        match model {
            InverterModel::DeyeSolarAssistant => {
                let mut ids = prefixed(
                    "sensor.deye_sunsynk_sol_ark_3_phase_",
                    &[
                        "grid_power_1", "grid_power_2", "grid_power_3", "grid_energy_in",
                        "grid_voltage_1", "grid_voltage_2", "grid_voltage_3", "grid_frequency",
                        "pv_power_1", "pv_power_2", "pv_voltage_1", "pv_voltage_2",
                        "pv_current_1", "pv_current_2", "load_power_1", "load_power_2",
                        "load_power_3", "battery_state_of_charge", "battery_power",
                        "battery_current", "battery_voltage", "battery_temperature",
                        "temperature",
                    ],
                );
                ids.push("number.deye_sunsynk_sol_ark_3_phase_max_sell_power".to_string());
                (ids, false)
            }
            InverterModel::Solarman => (
                prefixed(
                    "sensor.inv_",
                    &[
                        "grid_l1_power", "grid_l2_power", "grid_l3_power", "grid_energy_in",
                        "grid_l1_voltage", "grid_l2_voltage", "grid_l3_voltage",
                        "grid_frequency", "pv1_power", "pv2_power", "pv1_voltage",
                        "pv2_voltage", "pv1_current", "pv2_current", "load_l1_power",
                        "load_l2_power", "load_l3_power", "battery", "battery_power",
                        "battery_current", "battery_voltage", "pv_max_power",
                        "battery_temperature", "inverter_temperature",
                    ],
                ),
                true,
            ),
            InverterModel::Sofar => (
                prefixed(
                    "sensor.inv_sofar_",
                    &[
                        "voltage_l1", "voltage_l2", "voltage_l3", "active_power_pcc_l1",
                        "active_power_pcc_l2", "active_power_pcc_l3", "import_energy_today",
                        "current_pcc_l1", "current_pcc_l2", "current_pcc_l3",
                        "grid_frequency", "active_power_load_sys", "pv_power_1", "pv_power_2",
                        "pv_voltage_1", "pv_voltage_2", "pv_current_1", "pv_current_2",
                        "battery_capacity_total", "battery_power_total", "battery_current_1",
                        "battery_voltage_1", "feedin_max_power", "battery_temperature_1",
                        "inverter_temperature_1",
                    ],
                ),
                true,
            ),
            InverterModel::Huawei => {
                let mut ids = prefixed(
                    "sensor.",
                    &[
                        "power_meter_phase_a_active_power", "power_meter_phase_b_active_power",
                        "power_meter_phase_c_active_power", "power_meter_consumption",
                        "power_meter_phase_a_current", "power_meter_phase_b_current",
                        "power_meter_phase_c_current", "power_meter_phase_a_voltage",
                        "power_meter_phase_b_voltage", "power_meter_phase_c_voltage",
                        "power_meter_frequency", "inverter_pv_1_voltage",
                        "inverter_pv_2_voltage", "inverter_pv_1_current",
                        "inverter_pv_2_current", "inverter_active_power",
                        "power_meter_active_power", "batteries_state_of_capacity",
                        "batteries_charge_discharge_power", "batteries_bus_current",
                        "batteries_bus_voltage", "battery_1_bms_temperature",
                        "inverter_internal_temperature",
                    ],
                );
                ids.push("number.inverter_power_derating".to_string());
                (ids, false)
            }
            InverterModel::Growatt => (
                prefixed(
                    "sensor.inv_",
                    &[
                        "grid_power_l1", "grid_power_l2", "grid_power_l3",
                        "energy_from_grid_today", "energy_from_grid_total", "grid_current_l1",
                        "grid_current_l2", "grid_current_l3", "grid_voltage_l1",
                        "grid_voltage_l2", "grid_voltage_l3", "grid_frequency",
                        "load_power_l1", "load_power_l2", "load_power_l3", "pv1_power",
                        "pv2_power", "pv1_voltage", "pv2_voltage", "pv1_current",
                        "pv2_current", "fault_code", "battery_soc", "battery_charge_power",
                        "battery_discharge_power", "battery_current", "battery_voltage",
                        "status_code", "export_limit", "battery_temperature",
                        "inverter_temperature",
                    ],
                ),
                true,
            ),
        }
    }

    fn unavailable_metrics(model: InverterModel) -> MetricsSnapshot {
        let (load_power, alarm_codes, inverter_status) = match model {
            InverterModel::DeyeSolarAssistant | InverterModel::Solarman => {
                (vec![0.0; 3], AlarmCodes::none(), 2)
            }
            InverterModel::Sofar => (vec![0.0; 3], AlarmCodes::Numeric(vec![0]), 0),
            InverterModel::Huawei => (vec![0.0], AlarmCodes::none(), 2),
            InverterModel::Growatt => (vec![0.0; 3], AlarmCodes::none(), 0),
        };
        MetricsSnapshot {
            load_power,
            alarm_codes,
            load_current: vec![0.0; 3],
            inverter_status,
            ..MetricsSnapshot::default()
        }
    }

    #[test]
    fn unavailable_sensors_default_every_field() {
        for model in InverterModel::ALL {
            let (entity_ids, on_device) = read_entities(model);
            let states = MemoryStates::new();
            for entity_id in &entity_ids {
                states.set(entity_id.as_str(), "unavailable");
            }
            let mut ctx = AdapterContext::new(Arc::new(states));
            if on_device {
                ctx = ctx.with_device(entity_ids.iter().map(|id| (id.clone(), None)).collect());
            }
            let mut inverter = model.constructor()(ctx);

            assert_eq!(inverter.get_energy_data(), EnergySnapshot::default(), "{model}");
            assert_eq!(inverter.get_metrics_data(), unavailable_metrics(model), "{model}");
        }
    }

    #[test]
    fn manufacturer_discovery_is_case_insensitive() {
        assert_eq!(
            InverterModel::from_manufacturer("SOFAR"),
            Some(InverterModel::Sofar)
        );
        assert_eq!(InverterModel::from_manufacturer("Victron"), None);
    }
}
