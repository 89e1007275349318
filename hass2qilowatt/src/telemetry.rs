use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config_entry::Credentials;
use crate::snapshot::{EnergySnapshot, MetricsSnapshot, WorkModeCommand};

pub type CommandCallback = Box<dyn Fn(WorkModeCommand) + Send + Sync>;

/// Connection liveness, written by the connection's network thread and read
/// by the poll worker and the connectivity sensor.
#[derive(Clone, Debug, Default)]
pub struct Liveness {
    up: Arc<AtomicBool>,
    seen_up: Arc<AtomicBool>,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
        if up {
            self.seen_up.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    /// Whether the connection was established at least once.
    pub fn has_been_up(&self) -> bool {
        self.seen_up.load(Ordering::SeqCst)
    }
}

pub trait TelemetryConnection: Send + 'static {
    // This trait decouples the polling client from the Qilowatt MQTT client.
    // The binary wraps rumqttc in a type implementing it, the tests use fakes.

    fn new(credentials: &Credentials) -> Self
    where
        Self: Sized;

    fn connect(&mut self) -> anyhow::Result<()>;

    fn disconnect(&mut self) -> anyhow::Result<()>;

    fn liveness(&self) -> Liveness;

    fn is_connected(&self) -> bool {
        self.liveness().is_up()
    }

    fn set_energy_data(&mut self, data: EnergySnapshot) -> anyhow::Result<()>;

    fn set_metrics_data(&mut self, data: MetricsSnapshot) -> anyhow::Result<()>;

    /// Registers the handler for inbound WORKMODE commands. It is invoked on
    /// whatever thread the implementation receives messages on.
    fn set_command_callback(&mut self, callback: CommandCallback);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liveness_remembers_first_connection() {
        let liveness = Liveness::new();
        let observer = liveness.clone();
        assert!(!observer.is_up());
        assert!(!observer.has_been_up());

        liveness.set(true);
        liveness.set(false);
        assert!(!observer.is_up());
        assert!(observer.has_been_up());
    }
}
