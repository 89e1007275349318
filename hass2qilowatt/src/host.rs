//! Host-side collaborators: the state store and the entity/device registry.
//!
//! Adapters only ever read from these. The in-memory implementations back the
//! daemon (fed by MQTT statestream) and the tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

/// State values the host uses to signal that no reading is available.
pub const UNAVAILABLE_STATES: [&str; 3] = ["unknown", "unavailable", ""];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct State {
    pub entity_id: String,
    pub state: String,
}

impl State {
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        !UNAVAILABLE_STATES.contains(&self.state.as_str())
    }
}

pub trait StateStore: Send + Sync {
    fn get(&self, entity_id: &str) -> Option<State>;
}

/// Thread-safe map of entity id to textual state.
#[derive(Debug, Default)]
pub struct MemoryStates {
    states: RwLock<HashMap<String, String>>,
}

impl MemoryStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, entity_id: impl Into<String>, state: impl Into<String>) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_id.into(), state.into());
    }

    pub fn remove(&self, entity_id: &str) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(entity_id);
    }

    pub fn len(&self) -> usize {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> FromIterator<(K, V)> for MemoryStates
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let states = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            states: RwLock::new(states),
        }
    }
}

impl StateStore for MemoryStates {
    fn get(&self, entity_id: &str) -> Option<State> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_id)
            .map(|state| State::new(entity_id, state.clone()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryEntry {
    pub entity_id: String,
    pub device_id: Option<String>,
    pub name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceEntry {
    pub id: String,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
}

pub trait EntityRegistry {
    fn entities(&self) -> Vec<RegistryEntry>;
    fn devices(&self) -> Vec<DeviceEntry>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryRegistry {
    entities: Vec<RegistryEntry>,
    devices: Vec<DeviceEntry>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&mut self, device: DeviceEntry) {
        self.devices.push(device);
    }

    pub fn add_entity(&mut self, entity_id: &str, device_id: Option<&str>, name: Option<&str>) {
        self.entities.push(RegistryEntry {
            entity_id: entity_id.to_string(),
            device_id: device_id.map(str::to_string),
            name: name.map(str::to_string),
        });
    }
}

impl EntityRegistry for MemoryRegistry {
    fn entities(&self) -> Vec<RegistryEntry> {
        self.entities.clone()
    }

    fn devices(&self) -> Vec<DeviceEntry> {
        self.devices.clone()
    }
}

/// Entity ids (and display names) belonging to one physical device.
///
/// Computed once from a full registry scan so that per-poll lookups never
/// touch the registry again.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceEntities {
    entities: BTreeMap<String, Option<String>>,
}

impl DeviceEntities {
    pub fn scan(registry: &dyn EntityRegistry, device_id: &str) -> Self {
        registry
            .entities()
            .into_iter()
            .filter(|entry| entry.device_id.as_deref() == Some(device_id))
            .map(|entry| (entry.entity_id, entry.name))
            .collect()
    }

    /// First entity (in id order) whose id ends with `suffix`.
    pub fn find_by_suffix(&self, suffix: &str) -> Option<&str> {
        self.entities
            .keys()
            .find(|entity_id| entity_id.ends_with(suffix))
            .map(String::as_str)
    }

    pub fn name(&self, entity_id: &str) -> Option<&str> {
        self.entities.get(entity_id).and_then(|name| name.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl FromIterator<(String, Option<String>)> for DeviceEntities {
    fn from_iter<I: IntoIterator<Item = (String, Option<String>)>>(iter: I) -> Self {
        Self {
            entities: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MemoryRegistry {
        let mut registry = MemoryRegistry::new();
        registry.add_entity("sensor.a_battery_power_total", Some("dev-a"), Some("Battery"));
        registry.add_entity("sensor.a_pv_power_1", Some("dev-a"), None);
        registry.add_entity("sensor.b_battery_power_total", Some("dev-b"), None);
        registry.add_entity("sensor.orphan", None, None);
        registry
    }

    #[test]
    fn scan_is_scoped_to_one_device() {
        let entities = DeviceEntities::scan(&registry(), "dev-a");
        assert_eq!(entities.len(), 2);
        assert_eq!(
            entities.find_by_suffix("battery_power_total"),
            Some("sensor.a_battery_power_total")
        );
        assert_eq!(entities.name("sensor.a_battery_power_total"), Some("Battery"));
        assert_eq!(entities.find_by_suffix("orphan"), None);
    }

    #[test]
    fn sentinels_are_unavailable() {
        for sentinel in UNAVAILABLE_STATES {
            assert!(!State::new("sensor.x", sentinel).is_available());
        }
        assert!(State::new("sensor.x", "0").is_available());
    }

    #[test]
    fn memory_states_overwrite_and_remove() {
        let states = MemoryStates::new();
        states.set("sensor.x", "1");
        states.set("sensor.x", "2");
        assert_eq!(states.get("sensor.x").unwrap().state, "2");
        states.remove("sensor.x");
        assert!(states.get("sensor.x").is_none());
        assert!(states.is_empty());
    }
}
