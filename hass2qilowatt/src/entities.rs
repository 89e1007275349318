//! Host-visible entities mirroring connection status and WORKMODE commands.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use log::debug;

use crate::config_entry::ConfigEntry;
use crate::dispatcher::{
    connection_status_signal, workmode_signal, Dispatcher, Signal, Subscription,
};
use crate::snapshot::WorkModeCommand;
use crate::telemetry::Liveness;
use crate::DOMAIN;

pub const MANUFACTURER: &str = "Qilowatt";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
}

impl DeviceInfo {
    pub fn for_entry(entry: &ConfigEntry) -> Self {
        Self {
            identifiers: vec![(DOMAIN.to_string(), entry.entry_id.clone())],
            name: entry.title.clone(),
            manufacturer: MANUFACTURER.to_string(),
            model: entry.data.inverter_model.to_string(),
        }
    }
}

/// Lowercase object id with every character outside `[a-z0-9]` mapped to `_`.
fn object_id(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Binary sensor showing whether the Qilowatt connection is up.
pub struct ConnectionSensor {
    entity_id: String,
    unique_id: String,
    signal: String,
    device_info: DeviceInfo,
    is_on: Rc<Cell<bool>>,
    subscription: Option<Subscription>,
}

impl ConnectionSensor {
    pub const DEVICE_CLASS: &'static str = "connectivity";

    pub fn new(entry: &ConfigEntry) -> Self {
        Self {
            entity_id: format!(
                "binary_sensor.qw_connected_{}",
                object_id(entry.inverter_id())
            ),
            unique_id: format!("{}_qw_connected", entry.inverter_id()),
            signal: connection_status_signal(entry.inverter_id()),
            device_info: DeviceInfo::for_entry(entry),
            is_on: Rc::new(Cell::new(false)),
            subscription: None,
        }
    }

    /// Subscribes to status updates, seeding the state from `liveness`.
    pub fn attach(&mut self, dispatcher: &Dispatcher, liveness: Option<&Liveness>) {
        let is_on = self.is_on.clone();
        debug!("Binary sensor subscribing to signal: {}", self.signal);
        self.subscription = Some(dispatcher.connect(&self.signal, move |signal| {
            if let Signal::ConnectionStatus(connected) = signal {
                debug!("Connection status update: {connected}");
                is_on.set(*connected);
            }
        }));
        self.is_on.set(liveness.is_some_and(Liveness::is_up));
    }

    pub fn detach(&mut self) {
        self.subscription = None;
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn is_on(&self) -> bool {
        self.is_on.get()
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkModeField {
    Mode,
    Source,
    BatterySoc,
    PowerLimit,
    PeakShaving,
    ChargeCurrent,
    DischargeCurrent,
}

impl WorkModeField {
    pub const ALL: [WorkModeField; 7] = [
        WorkModeField::Mode,
        WorkModeField::Source,
        WorkModeField::BatterySoc,
        WorkModeField::PowerLimit,
        WorkModeField::PeakShaving,
        WorkModeField::ChargeCurrent,
        WorkModeField::DischargeCurrent,
    ];

    /// Field name as it appears in the command payload.
    pub fn name(self) -> &'static str {
        match self {
            WorkModeField::Mode => "Mode",
            WorkModeField::Source => "_source",
            WorkModeField::BatterySoc => "BatterySoc",
            WorkModeField::PowerLimit => "PowerLimit",
            WorkModeField::PeakShaving => "PeakShaving",
            WorkModeField::ChargeCurrent => "ChargeCurrent",
            WorkModeField::DischargeCurrent => "DischargeCurrent",
        }
    }

    pub fn unit(self) -> Option<&'static str> {
        match self {
            WorkModeField::Mode | WorkModeField::Source => None,
            WorkModeField::BatterySoc => Some("%"),
            WorkModeField::PowerLimit | WorkModeField::PeakShaving => Some("W"),
            WorkModeField::ChargeCurrent | WorkModeField::DischargeCurrent => Some("A"),
        }
    }

    pub fn project(self, command: &WorkModeCommand) -> Option<FieldValue> {
        let number = |value: Option<f64>| value.map(FieldValue::Number);
        match self {
            WorkModeField::Mode => command.mode.clone().map(FieldValue::Text),
            WorkModeField::Source => command.source.clone().map(FieldValue::Text),
            WorkModeField::BatterySoc => number(command.battery_soc),
            WorkModeField::PowerLimit => number(command.power_limit),
            WorkModeField::PeakShaving => number(command.peak_shaving),
            WorkModeField::ChargeCurrent => number(command.charge_current),
            WorkModeField::DischargeCurrent => number(command.discharge_current),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Number(number) => write!(f, "{number}"),
        }
    }
}

/// Read-only sensor holding one field of the latest WORKMODE command.
pub struct WorkModeSensor {
    field: WorkModeField,
    unique_id: String,
    signal: String,
    device_info: DeviceInfo,
    state: Rc<RefCell<Option<FieldValue>>>,
    subscription: Option<Subscription>,
}

impl WorkModeSensor {
    pub fn new(entry: &ConfigEntry, field: WorkModeField) -> Self {
        Self {
            field,
            unique_id: format!("{}_{}", entry.inverter_id(), field.name()),
            signal: workmode_signal(entry.inverter_id()),
            device_info: DeviceInfo::for_entry(entry),
            state: Rc::new(RefCell::new(None)),
            subscription: None,
        }
    }

    pub fn attach(&mut self, dispatcher: &Dispatcher) {
        let field = self.field;
        let state = self.state.clone();
        self.subscription = Some(dispatcher.connect(&self.signal, move |signal| {
            if let Signal::WorkMode(command) = signal {
                debug!("WorkModeSensor '{}' handling update.", field.name());
                *state.borrow_mut() = field.project(command);
            }
        }));
    }

    pub fn detach(&mut self) {
        self.subscription = None;
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn field(&self) -> WorkModeField {
        self.field
    }

    pub fn name(&self) -> &'static str {
        self.field.name()
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn unit(&self) -> Option<&'static str> {
        self.field.unit()
    }

    pub fn state(&self) -> Option<FieldValue> {
        self.state.borrow().clone()
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }
}

pub fn workmode_sensors(entry: &ConfigEntry) -> Vec<WorkModeSensor> {
    WorkModeField::ALL
        .into_iter()
        .map(|field| WorkModeSensor::new(entry, field))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_entry::EntryData;
    use crate::inverter::InverterModel;

    fn entry() -> ConfigEntry {
        ConfigEntry::new(EntryData {
            mqtt_username: "u".into(),
            mqtt_password: "p".into(),
            inverter_id: "QW1".into(),
            inverter_model: InverterModel::Huawei,
            device_id: None,
            battery_soc_sensor: None,
            export_limit: None,
        })
    }

    #[test]
    fn connection_sensor_follows_status_signal() {
        let dispatcher = Dispatcher::new();
        let liveness = Liveness::new();
        liveness.set(true);

        let mut sensor = ConnectionSensor::new(&entry());
        sensor.attach(&dispatcher, Some(&liveness));
        assert!(sensor.is_on());
        assert_eq!(sensor.unique_id(), "QW1_qw_connected");
        assert_eq!(sensor.entity_id(), "binary_sensor.qw_connected_qw1");

        dispatcher.send(
            &connection_status_signal("QW1"),
            &Signal::ConnectionStatus(false),
        );
        assert!(!sensor.is_on());

        sensor.detach();
        dispatcher.send(
            &connection_status_signal("QW1"),
            &Signal::ConnectionStatus(true),
        );
        assert!(!sensor.is_on());
        assert_eq!(dispatcher.listener_count(&connection_status_signal("QW1")), 0);
    }

    #[test]
    fn connection_sensor_ids_are_unique_per_inverter() {
        let mut other = entry();
        other.data.inverter_id = "QW-2.b".into();
        let first = ConnectionSensor::new(&entry());
        let second = ConnectionSensor::new(&other);
        assert_eq!(second.entity_id(), "binary_sensor.qw_connected_qw_2_b");
        assert_ne!(first.entity_id(), second.entity_id());
    }

    #[test]
    fn workmode_sensors_project_their_field() {
        let dispatcher = Dispatcher::new();
        let mut sensors = workmode_sensors(&entry());
        sensors.iter_mut().for_each(|s| s.attach(&dispatcher));
        assert!(sensors.iter().all(|s| s.state().is_none()));

        let command = WorkModeCommand {
            mode: Some("sell".into()),
            source: Some("fusebox".into()),
            battery_soc: Some(20.0),
            power_limit: Some(4500.0),
            peak_shaving: None,
            charge_current: Some(12.5),
            discharge_current: Some(0.0),
        };
        dispatcher.send(&workmode_signal("QW1"), &Signal::WorkMode(command));

        let state = |field: WorkModeField| {
            sensors
                .iter()
                .find(|s| s.field() == field)
                .and_then(WorkModeSensor::state)
        };
        assert_eq!(state(WorkModeField::Mode), Some(FieldValue::Text("sell".into())));
        assert_eq!(state(WorkModeField::Source), Some(FieldValue::Text("fusebox".into())));
        assert_eq!(state(WorkModeField::BatterySoc), Some(FieldValue::Number(20.0)));
        assert_eq!(state(WorkModeField::PowerLimit), Some(FieldValue::Number(4500.0)));
        assert_eq!(state(WorkModeField::PeakShaving), None);
        assert_eq!(state(WorkModeField::ChargeCurrent), Some(FieldValue::Number(12.5)));
        assert_eq!(state(WorkModeField::DischargeCurrent), Some(FieldValue::Number(0.0)));
    }

    #[test]
    fn sensor_metadata() {
        let sensors = workmode_sensors(&entry());
        assert_eq!(sensors.len(), 7);
        assert_eq!(sensors[1].unique_id(), "QW1__source");
        assert_eq!(sensors[2].unit(), Some("%"));
        assert_eq!(sensors[0].device_info().manufacturer, "Qilowatt");
        assert_eq!(sensors[0].device_info().model, "Huawei");
        assert_eq!(FieldValue::Number(20.0).to_string(), "20");
    }
}
