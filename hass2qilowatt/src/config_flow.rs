//! Guided setup of a config entry.
//!
//! The user step collects credentials, the inverter id and the brand (or a
//! device to detect the brand from). Brands that are bound to a device get a
//! second step for the optional overrides. Validation problems come back as
//! a form with per-field error keys instead of an `Err`.

use std::collections::BTreeMap;

use log::debug;
use serde_derive::Deserialize;

use crate::config_entry::{
    ConfigEntry, EntryData, EntryOptions, CONF_BATTERY_SOC_SENSOR, CONF_DEVICE_ID,
    CONF_EXPORT_LIMIT, CONF_INVERTER_ID, CONF_INVERTER_MODEL, CONF_MQTT_PASSWORD,
    CONF_MQTT_USERNAME, CONF_UPDATE_INTERVAL, MIN_UPDATE_INTERVAL,
};
use crate::host::EntityRegistry;
use crate::inverter::InverterModel;

pub const STEP_USER: &str = "user";
pub const STEP_DEVICE: &str = "device";
pub const STEP_INIT: &str = "init";

pub const ERROR_REQUIRED: &str = "required";
pub const ERROR_UNSUPPORTED_MODEL: &str = "unsupported_model";
pub const ERROR_UNKNOWN_DEVICE: &str = "unknown_device";
pub const ERROR_DEVICE_REQUIRED: &str = "device_required";
pub const ERROR_INVALID_ENTITY_ID: &str = "invalid_entity_id";
pub const ERROR_INVALID_EXPORT_LIMIT: &str = "invalid_export_limit";
pub const ERROR_INTERVAL_TOO_SHORT: &str = "interval_too_short";

pub type FormErrors = BTreeMap<&'static str, &'static str>;

#[derive(Clone, Debug, PartialEq)]
pub enum FlowResult<T> {
    ShowForm {
        step_id: &'static str,
        errors: FormErrors,
    },
    CreateEntry(T),
}

impl<T> FlowResult<T> {
    fn form(step_id: &'static str) -> Self {
        FlowResult::ShowForm {
            step_id,
            errors: FormErrors::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UserInput {
    #[serde(default)]
    pub mqtt_username: String,
    #[serde(default)]
    pub mqtt_password: String,
    #[serde(default)]
    pub inverter_id: String,
    pub inverter_model: Option<String>,
    pub device_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DeviceInput {
    pub battery_soc_sensor: Option<String>,
    pub export_limit: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct OptionsInput {
    pub update_interval: Option<u64>,
}

/// A configured device whose manufacturer maps to a supported brand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub device_id: String,
    pub name: String,
    pub model: InverterModel,
}

pub fn discover_devices(registry: &dyn EntityRegistry) -> Vec<DiscoveredDevice> {
    registry
        .devices()
        .into_iter()
        .filter_map(|device| {
            let model = InverterModel::from_manufacturer(device.manufacturer.as_deref()?)?;
            Some(DiscoveredDevice {
                device_id: device.id,
                name: device.name,
                model,
            })
        })
        .collect()
}

pub struct SetupFlow {
    known_devices: Vec<String>,
    discovered: Vec<DiscoveredDevice>,
    pending: Option<EntryData>,
}

impl SetupFlow {
    pub fn new(registry: &dyn EntityRegistry) -> Self {
        Self {
            known_devices: registry.devices().into_iter().map(|d| d.id).collect(),
            discovered: discover_devices(registry),
            pending: None,
        }
    }

    pub fn discovered(&self) -> &[DiscoveredDevice] {
        &self.discovered
    }

    pub fn step_user(&mut self, input: Option<UserInput>) -> FlowResult<ConfigEntry> {
        let Some(input) = input else {
            return FlowResult::form(STEP_USER);
        };

        let mut errors = FormErrors::new();
        for (key, value) in [
            (CONF_MQTT_USERNAME, &input.mqtt_username),
            (CONF_MQTT_PASSWORD, &input.mqtt_password),
            (CONF_INVERTER_ID, &input.inverter_id),
        ] {
            if value.trim().is_empty() {
                errors.insert(key, ERROR_REQUIRED);
            }
        }

        let device_id = input.device_id.filter(|id| !id.trim().is_empty());
        if let Some(device_id) = &device_id {
            if !self.known_devices.contains(device_id) {
                errors.insert(CONF_DEVICE_ID, ERROR_UNKNOWN_DEVICE);
            }
        }

        let model = match input.inverter_model.as_deref().filter(|m| !m.is_empty()) {
            Some(name) => match InverterModel::resolve(name) {
                Ok(model) => Some(model),
                Err(e) => {
                    debug!("{e}");
                    errors.insert(CONF_INVERTER_MODEL, ERROR_UNSUPPORTED_MODEL);
                    None
                }
            },
            None => {
                let detected = device_id.as_deref().and_then(|id| self.detect_model(id));
                if detected.is_none() {
                    errors.insert(CONF_INVERTER_MODEL, ERROR_REQUIRED);
                }
                detected
            }
        };

        if let Some(model) = model {
            if model.requires_device() && device_id.is_none() {
                errors.insert(CONF_DEVICE_ID, ERROR_DEVICE_REQUIRED);
            }
        }

        let model = match model {
            Some(model) if errors.is_empty() => model,
            _ => {
                debug!("setup form rejected: {errors:?}");
                return FlowResult::ShowForm {
                    step_id: STEP_USER,
                    errors,
                };
            }
        };

        let data = EntryData {
            mqtt_username: input.mqtt_username,
            mqtt_password: input.mqtt_password,
            inverter_id: input.inverter_id.trim().to_string(),
            inverter_model: model,
            device_id,
            battery_soc_sensor: None,
            export_limit: None,
        };

        if model.supports_overrides() {
            self.pending = Some(data);
            return FlowResult::form(STEP_DEVICE);
        }
        FlowResult::CreateEntry(ConfigEntry::new(data))
    }

    pub fn step_device(&mut self, input: Option<DeviceInput>) -> FlowResult<ConfigEntry> {
        if self.pending.is_none() {
            return FlowResult::form(STEP_USER);
        }
        let Some(input) = input else {
            return FlowResult::form(STEP_DEVICE);
        };

        let mut errors = FormErrors::new();
        let battery_soc_sensor = input
            .battery_soc_sensor
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if let Some(entity_id) = &battery_soc_sensor {
            if !is_entity_id(entity_id) {
                errors.insert(CONF_BATTERY_SOC_SENSOR, ERROR_INVALID_ENTITY_ID);
            }
        }
        if let Some(limit) = input.export_limit {
            if !limit.is_finite() || limit < 0.0 {
                errors.insert(CONF_EXPORT_LIMIT, ERROR_INVALID_EXPORT_LIMIT);
            }
        }
        if !errors.is_empty() {
            return FlowResult::ShowForm {
                step_id: STEP_DEVICE,
                errors,
            };
        }

        let Some(mut data) = self.pending.take() else {
            return FlowResult::form(STEP_USER);
        };
        data.battery_soc_sensor = battery_soc_sensor;
        data.export_limit = input.export_limit;
        FlowResult::CreateEntry(ConfigEntry::new(data))
    }

    fn detect_model(&self, device_id: &str) -> Option<InverterModel> {
        self.discovered
            .iter()
            .find(|device| device.device_id == device_id)
            .map(|device| device.model)
    }
}

fn is_entity_id(value: &str) -> bool {
    match value.split_once('.') {
        Some((domain, object_id)) => {
            !domain.is_empty()
                && !object_id.is_empty()
                && value
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.')
                && !object_id.contains('.')
        }
        None => false,
    }
}

/// Adjusts the options of an existing entry.
pub struct OptionsFlow {
    current: EntryOptions,
}

impl OptionsFlow {
    pub fn new(current: EntryOptions) -> Self {
        Self { current }
    }

    pub fn step_init(&mut self, input: Option<OptionsInput>) -> FlowResult<EntryOptions> {
        let Some(input) = input else {
            return FlowResult::form(STEP_INIT);
        };
        let update_interval = input
            .update_interval
            .unwrap_or(self.current.update_interval);
        if update_interval < MIN_UPDATE_INTERVAL {
            let mut errors = FormErrors::new();
            errors.insert(CONF_UPDATE_INTERVAL, ERROR_INTERVAL_TOO_SHORT);
            return FlowResult::ShowForm {
                step_id: STEP_INIT,
                errors,
            };
        }
        self.current.update_interval = update_interval;
        FlowResult::CreateEntry(self.current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{DeviceEntry, MemoryRegistry};

    fn registry() -> MemoryRegistry {
        let mut registry = MemoryRegistry::new();
        registry.add_device(DeviceEntry {
            id: "dev-sofar".into(),
            name: "Sofar HYD".into(),
            manufacturer: Some("SOFAR".into()),
            model: None,
        });
        registry.add_device(DeviceEntry {
            id: "dev-meter".into(),
            name: "Meter".into(),
            manufacturer: Some("Shelly".into()),
            model: None,
        });
        registry
    }

    fn user(model: Option<&str>, device: Option<&str>) -> UserInput {
        UserInput {
            mqtt_username: "user".into(),
            mqtt_password: "secret".into(),
            inverter_id: "QW123".into(),
            inverter_model: model.map(str::to_string),
            device_id: device.map(str::to_string),
        }
    }

    fn errors(result: FlowResult<ConfigEntry>) -> FormErrors {
        match result {
            FlowResult::ShowForm { errors, .. } => errors,
            FlowResult::CreateEntry(entry) => panic!("unexpected entry {entry:?}"),
        }
    }

    #[test]
    fn discovers_devices_by_manufacturer() {
        let flow = SetupFlow::new(&registry());
        assert_eq!(
            flow.discovered(),
            &[DiscoveredDevice {
                device_id: "dev-sofar".into(),
                name: "Sofar HYD".into(),
                model: InverterModel::Sofar,
            }]
        );
    }

    #[test]
    fn first_call_shows_user_form() {
        let mut flow = SetupFlow::new(&registry());
        assert_eq!(flow.step_user(None), FlowResult::form(STEP_USER));
    }

    #[test]
    fn missing_fields_are_reported_inline() {
        let mut flow = SetupFlow::new(&registry());
        let errors = errors(flow.step_user(Some(UserInput::default())));
        assert_eq!(errors.get(CONF_MQTT_USERNAME), Some(&ERROR_REQUIRED));
        assert_eq!(errors.get(CONF_MQTT_PASSWORD), Some(&ERROR_REQUIRED));
        assert_eq!(errors.get(CONF_INVERTER_ID), Some(&ERROR_REQUIRED));
        assert_eq!(errors.get(CONF_INVERTER_MODEL), Some(&ERROR_REQUIRED));
    }

    #[test]
    fn unsupported_model_is_rejected() {
        let mut flow = SetupFlow::new(&registry());
        let errors = errors(flow.step_user(Some(user(Some("Fronius"), None))));
        assert_eq!(errors.get(CONF_INVERTER_MODEL), Some(&ERROR_UNSUPPORTED_MODEL));
    }

    #[test]
    fn device_bound_brand_needs_a_device() {
        let mut flow = SetupFlow::new(&registry());
        let errors = errors(flow.step_user(Some(user(Some("Solarman"), None))));
        assert_eq!(errors.get(CONF_DEVICE_ID), Some(&ERROR_DEVICE_REQUIRED));

        let errors = self::errors(flow.step_user(Some(user(Some("Solarman"), Some("nope")))));
        assert_eq!(errors.get(CONF_DEVICE_ID), Some(&ERROR_UNKNOWN_DEVICE));
    }

    #[test]
    fn fixed_id_brand_creates_entry_directly() {
        let mut flow = SetupFlow::new(&registry());
        match flow.step_user(Some(user(Some("Deye-SolarAssistant"), None))) {
            FlowResult::CreateEntry(entry) => {
                assert_eq!(entry.data.inverter_model, InverterModel::DeyeSolarAssistant);
                assert_eq!(entry.title, "Inverter QW123");
                assert_eq!(entry.entry_id, "qilowatt_QW123");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn detected_brand_goes_through_override_step() {
        let mut flow = SetupFlow::new(&registry());
        assert_eq!(
            flow.step_user(Some(user(None, Some("dev-sofar")))),
            FlowResult::form(STEP_DEVICE)
        );

        let errors = errors(flow.step_device(Some(DeviceInput {
            battery_soc_sensor: Some("Battery SOC".into()),
            export_limit: Some(-1.0),
        })));
        assert_eq!(errors.get(CONF_BATTERY_SOC_SENSOR), Some(&ERROR_INVALID_ENTITY_ID));
        assert_eq!(errors.get(CONF_EXPORT_LIMIT), Some(&ERROR_INVALID_EXPORT_LIMIT));

        match flow.step_device(Some(DeviceInput {
            battery_soc_sensor: Some("sensor.bms_soc".into()),
            export_limit: Some(5000.0),
        })) {
            FlowResult::CreateEntry(entry) => {
                assert_eq!(entry.data.inverter_model, InverterModel::Sofar);
                assert_eq!(entry.data.device_id.as_deref(), Some("dev-sofar"));
                assert_eq!(entry.data.battery_soc_sensor.as_deref(), Some("sensor.bms_soc"));
                assert_eq!(entry.data.export_limit, Some(5000.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn device_step_without_user_step_restarts() {
        let mut flow = SetupFlow::new(&registry());
        assert_eq!(
            flow.step_device(Some(DeviceInput::default())),
            FlowResult::form(STEP_USER)
        );
    }

    #[test]
    fn options_enforce_minimum_interval() {
        let mut flow = OptionsFlow::new(EntryOptions::default());
        match flow.step_init(Some(OptionsInput {
            update_interval: Some(2),
        })) {
            FlowResult::ShowForm { errors, .. } => {
                assert_eq!(errors.get(CONF_UPDATE_INTERVAL), Some(&ERROR_INTERVAL_TOO_SHORT))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            flow.step_init(Some(OptionsInput {
                update_interval: Some(30),
            })),
            FlowResult::CreateEntry(EntryOptions {
                update_interval: 30
            })
        );
    }
}
