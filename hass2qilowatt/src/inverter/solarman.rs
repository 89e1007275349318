use super::{AdapterContext, Inverter, Overrides, Resolution, StateReader};
use crate::snapshot::{AlarmCodes, EnergySnapshot, MetricsSnapshot};

/// Inverters integrated through Solarman. Entity ids carry a user-chosen
/// prefix, so fields are found by suffix on the selected device.
pub struct SolarmanInverter {
    reader: StateReader,
    overrides: Overrides,
}

pub(super) fn build(ctx: AdapterContext) -> Box<dyn Inverter> {
    Box::new(SolarmanInverter::new(ctx))
}

impl SolarmanInverter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self {
            reader: ctx.reader(Resolution::Device),
            overrides: ctx.overrides,
        }
    }

    fn float(&self, field: &str) -> f64 {
        self.reader.get_state_float(field, 0.0)
    }
}

impl Inverter for SolarmanInverter {
    fn get_energy_data(&mut self) -> EnergySnapshot {
        EnergySnapshot {
            power: [
                self.float("grid_l1_power"),
                self.float("grid_l2_power"),
                self.float("grid_l3_power"),
            ],
            today: self.float("grid_energy_in"),
            total: 0.0,
            current: [0.0; 3],
            voltage: [
                self.float("grid_l1_voltage"),
                self.float("grid_l2_voltage"),
                self.float("grid_l3_voltage"),
            ],
            frequency: self.float("grid_frequency"),
        }
    }

    fn get_metrics_data(&mut self) -> MetricsSnapshot {
        MetricsSnapshot {
            pv_power: [self.float("pv1_power"), self.float("pv2_power")],
            pv_voltage: [self.float("pv1_voltage"), self.float("pv2_voltage")],
            pv_current: [self.float("pv1_current"), self.float("pv2_current")],
            load_power: vec![
                self.float("load_l1_power"),
                self.float("load_l2_power"),
                self.float("load_l3_power"),
            ],
            alarm_codes: AlarmCodes::none(),
            battery_soc: self.overrides.battery_soc(&self.reader, "_battery"),
            load_current: vec![0.0; 3],
            battery_power: [self.float("battery_power")],
            battery_current: [self.float("battery_current")],
            battery_voltage: [self.float("battery_voltage")],
            inverter_status: 2,
            grid_export_limit: self
                .overrides
                .grid_export_limit(&self.reader, "pv_max_power"),
            battery_temperature: [self.float("battery_temperature")],
            inverter_temperature: self.float("inverter_temperature"),
        }
    }
}
