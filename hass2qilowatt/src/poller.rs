use std::panic::{self, AssertUnwindSafe};

use anyhow::Context;
use log::{debug, error};

use crate::inverter::Inverter;
use crate::telemetry::TelemetryConnection;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Published,
    /// Skipped, the connection has not been created yet.
    NoConnection,
    /// Skipped, the connection is not live.
    NotConnected,
    Failed,
}

/// One adapter and its telemetry connection; runs single poll cycles.
pub struct Poller<C> {
    inverter_id: String,
    adapter: Box<dyn Inverter>,
    connection: Option<C>,
}

impl<C: TelemetryConnection> Poller<C> {
    pub fn new(inverter_id: impl Into<String>, adapter: Box<dyn Inverter>) -> Self {
        Self {
            inverter_id: inverter_id.into(),
            adapter,
            connection: None,
        }
    }

    pub fn with_connection(mut self, connection: C) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn connection(&self) -> Option<&C> {
        self.connection.as_ref()
    }

    pub fn connection_mut(&mut self) -> Option<&mut C> {
        self.connection.as_mut()
    }

    pub(crate) fn set_connection(&mut self, connection: C) {
        self.connection = Some(connection);
    }

    /// Fetches both snapshots and forwards them, unless the connection is
    /// missing or down, in which case the adapter is not touched at all.
    pub fn update_data(&mut self) -> anyhow::Result<PollOutcome> {
        let Some(connection) = self.connection.as_mut() else {
            debug!("MQTT client not initialized, skipping data update");
            return Ok(PollOutcome::NoConnection);
        };
        if !connection.is_connected() {
            debug!("MQTT client not connected, skipping data update");
            return Ok(PollOutcome::NotConnected);
        }

        let energy = self.adapter.get_energy_data();
        let metrics = self.adapter.get_metrics_data();

        connection
            .set_energy_data(energy)
            .context("forwarding energy data")?;
        connection
            .set_metrics_data(metrics)
            .context("forwarding metrics data")?;
        Ok(PollOutcome::Published)
    }

    /// Runs one cycle; errors and panics are logged, never propagated.
    pub fn poll(&mut self) -> PollOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.update_data())) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!("Error updating data for {}: {e:#}", self.inverter_id);
                PollOutcome::Failed
            }
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("unknown panic");
                error!("Poll cycle for {} panicked: {reason}", self.inverter_id);
                PollOutcome::Failed
            }
        }
    }
}
