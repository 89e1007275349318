use super::{AdapterContext, Inverter, Overrides, Resolution, StateReader};
use crate::snapshot::{AlarmCodes, EnergySnapshot, MetricsSnapshot};

/// The derating limit is a number entity, everything else lives under `sensor.`.
const NUMBER_ENTITIES: &[&str] = &["inverter_power_derating"];

/// Huawei SUN2000 inverters via the huawei_solar integration.
pub struct HuaweiInverter {
    reader: StateReader,
    overrides: Overrides,
}

pub(super) fn build(ctx: AdapterContext) -> Box<dyn Inverter> {
    Box::new(HuaweiInverter::new(ctx))
}

impl HuaweiInverter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self {
            reader: ctx.reader(Resolution::Global {
                numbers: NUMBER_ENTITIES,
            }),
            overrides: ctx.overrides,
        }
    }

    fn float(&self, field: &str) -> f64 {
        self.reader.get_state_float(field, 0.0)
    }
}

impl Inverter for HuaweiInverter {
    fn get_energy_data(&mut self) -> EnergySnapshot {
        EnergySnapshot {
            power: [
                self.float("power_meter_phase_a_active_power") * -1.0,
                self.float("power_meter_phase_b_active_power") * -1.0,
                self.float("power_meter_phase_c_active_power") * -1.0,
            ],
            today: 0.0,
            total: self.float("power_meter_consumption") * -1.0,
            current: [
                self.float("power_meter_phase_a_current"),
                self.float("power_meter_phase_b_current"),
                self.float("power_meter_phase_c_current"),
            ],
            voltage: [
                self.float("power_meter_phase_a_voltage"),
                self.float("power_meter_phase_b_voltage"),
                self.float("power_meter_phase_c_voltage"),
            ],
            frequency: self.float("power_meter_frequency"),
        }
    }

    fn get_metrics_data(&mut self) -> MetricsSnapshot {
        let pv_voltage = [
            self.float("inverter_pv_1_voltage"),
            self.float("inverter_pv_2_voltage"),
        ];
        let pv_current = [
            self.float("inverter_pv_1_current"),
            self.float("inverter_pv_2_current"),
        ];
        // inverter output minus what the meter sees going to the grid
        let load_power =
            self.float("inverter_active_power") - self.float("power_meter_active_power");

        MetricsSnapshot {
            pv_power: [
                pv_voltage[0] * pv_current[0],
                pv_voltage[1] * pv_current[1],
            ],
            pv_voltage,
            pv_current,
            load_power: vec![load_power],
            alarm_codes: AlarmCodes::none(),
            battery_soc: self
                .overrides
                .battery_soc(&self.reader, "batteries_state_of_capacity"),
            load_current: vec![0.0; 3],
            battery_power: [self.float("batteries_charge_discharge_power")],
            battery_current: [self.float("batteries_bus_current")],
            battery_voltage: [self.float("batteries_bus_voltage")],
            inverter_status: 2,
            grid_export_limit: self
                .overrides
                .grid_export_limit(&self.reader, "inverter_power_derating"),
            battery_temperature: [self.float("battery_1_bms_temperature")],
            inverter_temperature: self.float("inverter_internal_temperature"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryStates;
    use std::sync::Arc;

    fn inverter(states: &[(&str, &str)]) -> HuaweiInverter {
        let states: MemoryStates = states.iter().copied().collect();
        HuaweiInverter::new(AdapterContext::new(Arc::new(states)))
    }

    #[test]
    fn pv_power_is_voltage_times_current() {
        let metrics = inverter(&[
            ("sensor.inverter_pv_1_voltage", "400"),
            ("sensor.inverter_pv_1_current", "2.5"),
            ("sensor.inverter_pv_2_voltage", "380"),
        ])
        .get_metrics_data();
        assert_eq!(metrics.pv_power, [1000.0, 0.0]);
        assert_eq!(metrics.pv_voltage, [400.0, 380.0]);
    }

    #[test]
    fn load_is_inverter_output_minus_grid() {
        let metrics = inverter(&[
            ("sensor.inverter_active_power", "4000"),
            ("sensor.power_meter_active_power", "1500"),
        ])
        .get_metrics_data();
        assert_eq!(metrics.load_power, vec![2500.0]);
    }

    #[test]
    fn meter_readings_are_sign_flipped() {
        let energy = inverter(&[
            ("sensor.power_meter_phase_a_active_power", "250"),
            ("sensor.power_meter_consumption", "1234.5"),
        ])
        .get_energy_data();
        assert_eq!(energy.power, [-250.0, 0.0, 0.0]);
        assert_eq!(energy.total, -1234.5);
    }

    #[test]
    fn derating_reads_the_number_entity() {
        let metrics = inverter(&[("number.inverter_power_derating", "5000")]).get_metrics_data();
        assert_eq!(metrics.grid_export_limit, 5000.0);
    }
}
