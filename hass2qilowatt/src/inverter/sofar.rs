use super::{derive_load_current, AdapterContext, Inverter, Overrides, Resolution, StateReader};
use crate::snapshot::{AlarmCodes, EnergySnapshot, MetricsSnapshot};

/// Sofar inverters (sofar modbus integration). Power sensors report kW.
pub struct SofarInverter {
    reader: StateReader,
    overrides: Overrides,
}

pub(super) fn build(ctx: AdapterContext) -> Box<dyn Inverter> {
    Box::new(SofarInverter::new(ctx))
}

impl SofarInverter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self {
            reader: ctx.reader(Resolution::DeviceThenGlobal),
            overrides: ctx.overrides,
        }
    }

    fn float(&self, field: &str) -> f64 {
        self.reader.get_state_float(field, 0.0)
    }

    fn kilowatts(&self, field: &str) -> f64 {
        self.float(field) * 1000.0
    }

    fn grid_voltage(&self) -> [f64; 3] {
        [
            self.float("sofar_voltage_l1"),
            self.float("sofar_voltage_l2"),
            self.float("sofar_voltage_l3"),
        ]
    }
}

impl Inverter for SofarInverter {
    fn get_energy_data(&mut self) -> EnergySnapshot {
        // positive means import on the Qilowatt side, the PCC sensor is the opposite
        EnergySnapshot {
            power: [
                self.kilowatts("sofar_active_power_pcc_l1") * -1.0,
                self.kilowatts("sofar_active_power_pcc_l2") * -1.0,
                self.kilowatts("sofar_active_power_pcc_l3") * -1.0,
            ],
            today: self.float("sofar_import_energy_today"),
            total: 0.0,
            current: [
                self.float("sofar_current_pcc_l1"),
                self.float("sofar_current_pcc_l2"),
                self.float("sofar_current_pcc_l3"),
            ],
            voltage: self.grid_voltage(),
            frequency: self.float("sofar_grid_frequency"),
        }
    }

    fn get_metrics_data(&mut self) -> MetricsSnapshot {
        // only a system-wide load sensor exists, split evenly over the phases
        let per_phase = (self.kilowatts("sofar_active_power_load_sys") / 3.0).round();
        let load_power = vec![per_phase; 3];
        let load_current = derive_load_current(&load_power, &self.grid_voltage());

        MetricsSnapshot {
            pv_power: [
                self.kilowatts("sofar_pv_power_1"),
                self.kilowatts("sofar_pv_power_2"),
            ],
            pv_voltage: [
                self.float("sofar_pv_voltage_1"),
                self.float("sofar_pv_voltage_2"),
            ],
            pv_current: [
                self.float("sofar_pv_current_1"),
                self.float("sofar_pv_current_2"),
            ],
            load_power,
            alarm_codes: AlarmCodes::Numeric(vec![0]),
            battery_soc: self
                .overrides
                .battery_soc(&self.reader, "sofar_battery_capacity_total"),
            load_current,
            battery_power: [self.kilowatts("sofar_battery_power_total")],
            battery_current: [self.float("sofar_battery_current_1")],
            battery_voltage: [self.float("sofar_battery_voltage_1")],
            inverter_status: 0,
            grid_export_limit: self
                .overrides
                .grid_export_limit(&self.reader, "sofar_feedin_max_power"),
            battery_temperature: [self.float("sofar_battery_temperature_1")],
            inverter_temperature: self.float("sofar_inverter_temperature_1"),
        }
    }
}
