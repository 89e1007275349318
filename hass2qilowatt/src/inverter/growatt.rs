use super::{derive_load_current, AdapterContext, Inverter, Overrides, Resolution, StateReader};
use crate::snapshot::{AlarmCodes, EnergySnapshot, MetricsSnapshot};

/// Growatt hybrid inverters via the Growatt modbus integration.
///
/// Unlike the other brands this one reports a real status code and a textual
/// fault description, which is forwarded as the alarm.
pub struct GrowattInverter {
    reader: StateReader,
    overrides: Overrides,
}

pub(super) fn build(ctx: AdapterContext) -> Box<dyn Inverter> {
    Box::new(GrowattInverter::new(ctx))
}

impl GrowattInverter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self {
            reader: ctx.reader(Resolution::DeviceThenGlobal),
            overrides: ctx.overrides,
        }
    }

    fn float(&self, field: &str) -> f64 {
        self.reader.get_state_float(field, 0.0)
    }

    fn phases(&self, field: &str) -> [f64; 3] {
        std::array::from_fn(|i| self.float(&format!("{field}_l{}", i + 1)))
    }

    fn alarm_codes(&self) -> AlarmCodes {
        let fault = self.reader.get_state_text("fault_code", "");
        if fault.is_empty() {
            AlarmCodes::none()
        } else {
            AlarmCodes::Text(vec![fault])
        }
    }
}

impl Inverter for GrowattInverter {
    fn get_energy_data(&mut self) -> EnergySnapshot {
        let power = self.phases("grid_power").map(|watts| watts * -1.0);
        EnergySnapshot {
            power,
            today: self.float("energy_from_grid_today"),
            total: self.float("energy_from_grid_total"),
            current: self.phases("grid_current"),
            voltage: self.phases("grid_voltage"),
            frequency: self.float("grid_frequency"),
        }
    }

    fn get_metrics_data(&mut self) -> MetricsSnapshot {
        let load_power = self.phases("load_power").to_vec();
        let load_current = derive_load_current(&load_power, &self.phases("grid_voltage"));

        MetricsSnapshot {
            pv_power: [self.float("pv1_power"), self.float("pv2_power")],
            pv_voltage: [self.float("pv1_voltage"), self.float("pv2_voltage")],
            pv_current: [self.float("pv1_current"), self.float("pv2_current")],
            load_power,
            alarm_codes: self.alarm_codes(),
            battery_soc: self.overrides.battery_soc(&self.reader, "battery_soc"),
            load_current,
            battery_power: [
                self.float("battery_charge_power") - self.float("battery_discharge_power"),
            ],
            battery_current: [self.float("battery_current")],
            battery_voltage: [self.float("battery_voltage")],
            inverter_status: self.reader.get_state_int("status_code", 0),
            grid_export_limit: self
                .overrides
                .grid_export_limit(&self.reader, "export_limit"),
            battery_temperature: [self.float("battery_temperature")],
            inverter_temperature: self.float("inverter_temperature"),
        }
    }
}
