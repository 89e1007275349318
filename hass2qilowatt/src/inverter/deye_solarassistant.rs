use super::{AdapterContext, Inverter, Overrides, Resolution, StateReader};
use crate::snapshot::{AlarmCodes, EnergySnapshot, MetricsSnapshot};

const PREFIX: &str = "deye_sunsynk_sol_ark_3_phase";

/// Deye inverters exposed through SolarAssistant, which uses fixed entity ids.
pub struct DeyeSolarAssistantInverter {
    reader: StateReader,
    overrides: Overrides,
}

pub(super) fn build(ctx: AdapterContext) -> Box<dyn Inverter> {
    Box::new(DeyeSolarAssistantInverter::new(ctx))
}

fn sensor(field: &str) -> String {
    format!("sensor.{PREFIX}_{field}")
}

impl DeyeSolarAssistantInverter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self {
            reader: ctx.reader(Resolution::Direct),
            overrides: ctx.overrides,
        }
    }

    fn float(&self, field: &str) -> f64 {
        self.reader.get_state_float(&sensor(field), 0.0)
    }

    fn phases<const N: usize>(&self, field: &str) -> [f64; N] {
        std::array::from_fn(|i| self.float(&format!("{field}_{}", i + 1)))
    }
}

impl Inverter for DeyeSolarAssistantInverter {
    fn get_energy_data(&mut self) -> EnergySnapshot {
        EnergySnapshot {
            power: self.phases("grid_power"),
            today: self.float("grid_energy_in"),
            total: 0.0,
            current: [0.0; 3],
            voltage: self.phases("grid_voltage"),
            frequency: self.float("grid_frequency"),
        }
    }

    fn get_metrics_data(&mut self) -> MetricsSnapshot {
        MetricsSnapshot {
            pv_power: self.phases("pv_power"),
            pv_voltage: self.phases("pv_voltage"),
            pv_current: self.phases("pv_current"),
            load_power: self.phases::<3>("load_power").to_vec(),
            alarm_codes: AlarmCodes::none(),
            battery_soc: self
                .overrides
                .battery_soc(&self.reader, &sensor("battery_state_of_charge")),
            load_current: vec![0.0; 3],
            battery_power: [self.float("battery_power")],
            battery_current: [self.float("battery_current")],
            battery_voltage: [self.float("battery_voltage")],
            inverter_status: 2,
            grid_export_limit: self
                .overrides
                .grid_export_limit(&self.reader, &format!("number.{PREFIX}_max_sell_power")),
            battery_temperature: [self.float("battery_temperature")],
            inverter_temperature: self.float("temperature"),
        }
    }
}
