use std::sync::Arc;

use log::warn;

use crate::host::{DeviceEntities, State, StateStore};

/// How a field name is turned into a state-store lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// The name already is a full entity id.
    Direct,
    /// Suffix match within the device's entities only.
    Device,
    /// Suffix match within the device, then a global lookup.
    DeviceThenGlobal,
    /// `sensor.<name>` then `number.<name>`; names in `numbers` try the
    /// number namespace first.
    Global { numbers: &'static [&'static str] },
}

/// Reads and coerces inverter values from the host state store.
///
/// Never fails: anything missing or unparsable yields the caller's default.
pub struct StateReader {
    states: Arc<dyn StateStore>,
    device: DeviceEntities,
    resolution: Resolution,
}

impl StateReader {
    pub fn new(states: Arc<dyn StateStore>, device: DeviceEntities, resolution: Resolution) -> Self {
        Self {
            states,
            device,
            resolution,
        }
    }

    pub fn find_entity_state(&self, name: &str) -> Option<State> {
        match self.resolution {
            Resolution::Direct => self.states.get(name),
            Resolution::Device => self.find_on_device(name),
            Resolution::DeviceThenGlobal => {
                if let Some(entity_id) = self.device.find_by_suffix(name) {
                    return self.states.get(entity_id);
                }
                self.find_global(name, &[])
            }
            Resolution::Global { numbers } => self.find_global(name, numbers),
        }
    }

    fn find_on_device(&self, name: &str) -> Option<State> {
        self.device
            .find_by_suffix(name)
            .and_then(|entity_id| self.states.get(entity_id))
    }

    fn find_global(&self, name: &str, numbers: &[&str]) -> Option<State> {
        let object_id = name.strip_prefix("sensor.").unwrap_or(name);
        if object_id.contains('.') {
            return self.states.get(object_id);
        }
        let domains = if numbers.contains(&object_id) {
            ["number", "sensor"]
        } else {
            ["sensor", "number"]
        };
        domains
            .iter()
            .find_map(|domain| self.states.get(&format!("{domain}.{object_id}")))
    }

    /// Available textual state, or `None` (logged) when missing or a sentinel.
    fn available(&self, name: &str) -> Option<String> {
        match self.find_entity_state(name) {
            Some(state) if state.is_available() => Some(state.state),
            _ => {
                warn!("State of {name} is unavailable or unknown");
                None
            }
        }
    }

    pub fn get_state_float(&self, name: &str, default: f64) -> f64 {
        let Some(value) = self.available(name) else {
            return default;
        };
        match value.trim().parse::<f64>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Could not convert state of {name} to float: {value:?}");
                default
            }
        }
    }

    pub fn get_state_int(&self, name: &str, default: i64) -> i64 {
        let Some(value) = self.available(name) else {
            return default;
        };
        match value.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => value.trunc() as i64,
            _ => {
                warn!("Could not convert state of {name} to int: {value:?}");
                default
            }
        }
    }

    pub fn get_state_text(&self, name: &str, default: &str) -> String {
        self.available(name)
            .unwrap_or_else(|| default.to_string())
    }

    /// Reads a full entity id regardless of this reader's resolution.
    pub fn get_entity_int(&self, entity_id: &str, default: i64) -> i64 {
        StateReader::new(self.states.clone(), DeviceEntities::default(), Resolution::Direct)
            .get_state_int(entity_id, default)
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Per-phase current from power and voltage, rounded to two decimals.
/// A zero voltage yields zero rather than a division error.
pub fn derive_load_current(load_power: &[f64], voltage: &[f64]) -> Vec<f64> {
    load_power
        .iter()
        .zip(voltage)
        .map(|(&power, &volts)| {
            if volts.abs() < f64::EPSILON {
                warn!("Voltage is zero for load power {power}, skipping division.");
                0.0
            } else {
                round2(power / volts)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryStates;

    fn reader(states: MemoryStates, device: &[&str], resolution: Resolution) -> StateReader {
        let device = device
            .iter()
            .map(|entity_id| (entity_id.to_string(), None))
            .collect();
        StateReader::new(Arc::new(states), device, resolution)
    }

    #[test]
    fn load_current_guards_zero_voltage() {
        let current = derive_load_current(&[3000.0, 3000.0, 3000.0], &[230.0, 230.0, 0.0]);
        assert_eq!(current, vec![13.04, 13.04, 0.0]);
    }

    #[test]
    fn device_suffix_lookup() {
        let states: MemoryStates = [("sensor.x_battery_power_total", "1.5")].into_iter().collect();
        let reader = reader(states, &["sensor.x_battery_power_total"], Resolution::Device);
        assert_eq!(
            reader.find_entity_state("battery_power_total").unwrap().state,
            "1.5"
        );
        assert_eq!(reader.get_state_float("battery_power_total", 0.0), 1.5);
    }

    #[test]
    fn device_lookup_does_not_fall_back() {
        let states: MemoryStates = [("sensor.battery_power_total", "1.5")].into_iter().collect();
        let reader = reader(states, &[], Resolution::Device);
        assert!(reader.find_entity_state("battery_power_total").is_none());
    }

    #[test]
    fn global_fallback_tries_sensor_then_number() {
        let states: MemoryStates = [("number.feedin_max_power", "5000")].into_iter().collect();
        let reader = reader(states, &["sensor.x_other"], Resolution::DeviceThenGlobal);
        assert_eq!(reader.get_state_float("feedin_max_power", 0.0), 5000.0);

        let states: MemoryStates = [
            ("sensor.feedin_max_power", "1"),
            ("number.feedin_max_power", "2"),
        ]
        .into_iter()
        .collect();
        let reader = self::reader(states, &[], Resolution::DeviceThenGlobal);
        assert_eq!(reader.get_state_float("feedin_max_power", 0.0), 1.0);
    }

    #[test]
    fn global_fallback_accepts_full_entity_ids() {
        let states: MemoryStates = [("number.limit", "7")].into_iter().collect();
        let reader = reader(states, &[], Resolution::DeviceThenGlobal);
        assert_eq!(reader.get_state_int("number.limit", 0), 7);
    }

    #[test]
    fn global_number_names_prefer_number_namespace() {
        let states: MemoryStates = [
            ("sensor.inverter_power_derating", "1"),
            ("number.inverter_power_derating", "2"),
        ]
        .into_iter()
        .collect();
        let reader = reader(
            states,
            &[],
            Resolution::Global {
                numbers: &["inverter_power_derating"],
            },
        );
        assert_eq!(reader.get_state_float("inverter_power_derating", 0.0), 2.0);
        assert_eq!(
            reader.get_state_float("sensor.inverter_power_derating", 0.0),
            2.0
        );
    }

    #[test]
    fn sentinels_and_garbage_yield_default() {
        let states: MemoryStates = [
            ("sensor.a", "unknown"),
            ("sensor.b", "unavailable"),
            ("sensor.c", ""),
            ("sensor.d", "n/a"),
        ]
        .into_iter()
        .collect();
        let reader = reader(states, &[], Resolution::Direct);
        for entity in ["sensor.a", "sensor.b", "sensor.c", "sensor.d", "sensor.missing"] {
            assert_eq!(reader.get_state_float(entity, 1.25), 1.25);
            assert_eq!(reader.get_state_int(entity, 7), 7);
        }
        assert_eq!(reader.get_state_text("sensor.a", "none"), "none");
        assert_eq!(reader.get_state_text("sensor.d", "none"), "n/a");
    }

    #[test]
    fn int_truncates_float_states() {
        let states: MemoryStates = [("sensor.soc", "57.9")].into_iter().collect();
        let reader = reader(states, &[], Resolution::Direct);
        assert_eq!(reader.get_state_int("sensor.soc", 0), 57);
    }
}
