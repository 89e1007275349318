//! Per-entry wiring: adapter, polling client and entities for each config
//! entry, set up and torn down together.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};

use crate::client::PollingClient;
use crate::config_entry::{ConfigEntry, EntryOptions};
use crate::context::HostContext;
use crate::entities::{workmode_sensors, ConnectionSensor, WorkModeSensor};
use crate::host::{EntityRegistry, StateStore};
use crate::inverter::AdapterContext;
use crate::telemetry::TelemetryConnection;
use crate::Result;

/// Everything that lives for as long as one entry stays loaded.
pub struct LoadedEntry<C: TelemetryConnection> {
    pub entry: ConfigEntry,
    pub client: PollingClient<C>,
    pub connection_sensor: ConnectionSensor,
    pub workmode_sensors: Vec<WorkModeSensor>,
}

impl<C: TelemetryConnection> LoadedEntry<C> {
    fn unload(mut self) {
        self.client.stop();
        self.connection_sensor.detach();
        self.workmode_sensors.iter_mut().for_each(WorkModeSensor::detach);
    }
}

pub struct Integration<C: TelemetryConnection> {
    states: Arc<dyn StateStore>,
    registry: Arc<dyn EntityRegistry>,
    entries: BTreeMap<String, LoadedEntry<C>>,
}

impl<C: TelemetryConnection> Integration<C> {
    pub fn new(states: Arc<dyn StateStore>, registry: Arc<dyn EntityRegistry>) -> Self {
        Self {
            states,
            registry,
            entries: BTreeMap::new(),
        }
    }

    /// Builds the adapter, starts the client and attaches the entities.
    /// An entry that is already loaded is unloaded first.
    pub fn setup_entry(&mut self, entry: ConfigEntry, context: &HostContext) -> Result<()> {
        self.unload_entry(&entry.entry_id);

        let adapter_context =
            AdapterContext::from_entry(&entry, self.states.clone(), self.registry.as_ref());
        debug!(
            "Setting up {} ({} entities on the selected device)",
            entry.title,
            adapter_context.device.len()
        );
        let adapter = entry.data.inverter_model.constructor()(adapter_context);

        let mut client = PollingClient::<C>::from_entry(&entry, adapter, context.sender());
        client.start()?;

        let mut connection_sensor = ConnectionSensor::new(&entry);
        connection_sensor.attach(context.dispatcher(), client.liveness().as_ref());
        let mut sensors = workmode_sensors(&entry);
        sensors
            .iter_mut()
            .for_each(|sensor| sensor.attach(context.dispatcher()));

        info!("Qilowatt integration started for {}", entry.title);
        self.entries.insert(
            entry.entry_id.clone(),
            LoadedEntry {
                entry,
                client,
                connection_sensor,
                workmode_sensors: sensors,
            },
        );
        Ok(())
    }

    /// Stops the client and detaches the entities. Returns whether the entry
    /// was loaded.
    pub fn unload_entry(&mut self, entry_id: &str) -> bool {
        match self.entries.remove(entry_id) {
            Some(loaded) => {
                debug!("Unloading {}", loaded.entry.title);
                loaded.unload();
                true
            }
            None => false,
        }
    }

    /// Applies new options by reloading the entry.
    pub fn update_options(
        &mut self,
        entry_id: &str,
        options: EntryOptions,
        context: &HostContext,
    ) -> Result<bool> {
        let Some(loaded) = self.entries.remove(entry_id) else {
            return Ok(false);
        };
        let mut entry = loaded.entry.clone();
        loaded.unload();
        entry.options = options;
        self.setup_entry(entry, context)?;
        Ok(true)
    }

    pub fn entry(&self, entry_id: &str) -> Option<&LoadedEntry<C>> {
        self.entries.get(entry_id)
    }

    pub fn entry_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn unload_all(&mut self) {
        let ids: Vec<String> = self.entries.keys().cloned().collect();
        for entry_id in ids {
            self.unload_entry(&entry_id);
        }
    }
}

impl<C: TelemetryConnection> Drop for Integration<C> {
    fn drop(&mut self) {
        self.unload_all();
    }
}
