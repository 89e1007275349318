//! Polling client: owns the telemetry connection of one config entry, feeds it
//! from the inverter adapter on a fixed interval and relays inbound commands
//! into the host context.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config_entry::{ConfigEntry, Credentials};
use crate::context::{EventSender, HostEvent};
use crate::inverter::Inverter;
use crate::poller::Poller;
use crate::shutdown::{cancellation, CancelHandle, CancellationToken};
use crate::telemetry::{CommandCallback, Liveness, TelemetryConnection};
use crate::{Error, Result};

pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    Uninitialized,
    Connecting,
    Connected,
    Disconnected,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSettings {
    /// Grace period before the first poll, letting the connection settle.
    pub initial_delay: Duration,
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            interval: Duration::from_secs(crate::config_entry::DEFAULT_UPDATE_INTERVAL),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

struct Worker<C> {
    cancel: CancelHandle,
    handle: JoinHandle<Poller<C>>,
}

pub struct PollingClient<C: TelemetryConnection> {
    credentials: Credentials,
    settings: PollSettings,
    events: EventSender,
    liveness: Option<Liveness>,
    poller: Option<Poller<C>>,
    worker: Option<Worker<C>>,
    phase: Phase,
}

impl<C: TelemetryConnection> PollingClient<C> {
    pub fn new(
        credentials: Credentials,
        adapter: Box<dyn Inverter>,
        events: EventSender,
        settings: PollSettings,
    ) -> Self {
        let poller = Poller::new(credentials.inverter_id.clone(), adapter);
        Self {
            credentials,
            settings,
            events,
            liveness: None,
            poller: Some(poller),
            worker: None,
            phase: Phase::Idle,
        }
    }

    pub fn from_entry(entry: &ConfigEntry, adapter: Box<dyn Inverter>, events: EventSender) -> Self {
        let settings = PollSettings {
            interval: entry.options.poll_interval(),
            ..PollSettings::default()
        };
        Self::new(entry.credentials(), adapter, events, settings)
    }

    pub fn inverter_id(&self) -> &str {
        &self.credentials.inverter_id
    }

    pub fn state(&self) -> ClientState {
        match (self.phase, &self.liveness) {
            (Phase::Stopped, _) => ClientState::Stopped,
            (Phase::Idle, None) => ClientState::Uninitialized,
            (_, None) => ClientState::Connecting,
            (_, Some(liveness)) if liveness.is_up() => ClientState::Connected,
            (_, Some(liveness)) if liveness.has_been_up() => ClientState::Disconnected,
            (_, Some(_)) => ClientState::Connecting,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.liveness.as_ref().is_some_and(Liveness::is_up)
    }

    /// Shared liveness flag, available once the connection exists.
    pub fn liveness(&self) -> Option<Liveness> {
        self.liveness.clone()
    }

    /// Creates the connection on first use, connects it and launches the
    /// poll worker. Calling it again while running is a no-op.
    pub fn start(&mut self) -> Result<()> {
        match self.phase {
            Phase::Stopped => return Err(Error::Stopped(self.credentials.inverter_id.clone())),
            Phase::Running => {
                debug!("Qilowatt client for {} already running", self.inverter_id());
                return Ok(());
            }
            Phase::Idle => {}
        }
        debug!("Starting Qilowatt MQTT client for {}", self.inverter_id());

        let mut poller = self
            .poller
            .take()
            .ok_or_else(|| Error::Stopped(self.credentials.inverter_id.clone()))?;
        if poller.connection().is_none() {
            let connection = self.initialize_client();
            poller.set_connection(connection);
        }

        let connected = match poller.connection_mut() {
            Some(connection) => connection.connect(),
            None => Ok(()),
        };
        if let Err(source) = connected {
            self.poller = Some(poller);
            return Err(Error::Connect {
                inverter_id: self.credentials.inverter_id.clone(),
                source,
            });
        }

        let (cancel, token) = cancellation();
        let job = PollJob {
            inverter_id: self.credentials.inverter_id.clone(),
            settings: self.settings,
            events: self.events.clone(),
            liveness: self.liveness.clone().unwrap_or_default(),
            token,
        };
        let spawned = thread::Builder::new()
            .name(format!("qilowatt-poll-{}", self.inverter_id()))
            .spawn(move || job.run(poller));
        match spawned {
            Ok(handle) => {
                self.worker = Some(Worker { cancel, handle });
                self.phase = Phase::Running;
                info!("Qilowatt client for {} started", self.inverter_id());
                Ok(())
            }
            // the closure and the poller inside it are gone with the failed spawn
            Err(e) => {
                self.phase = Phase::Stopped;
                Err(Error::Spawn(e))
            }
        }
    }

    fn initialize_client(&mut self) -> C {
        debug!("Initializing Qilowatt MQTT client");
        let mut connection = C::new(&self.credentials);
        connection.set_command_callback(command_relay(
            self.credentials.inverter_id.clone(),
            self.events.clone(),
        ));
        self.liveness = Some(connection.liveness());
        connection
    }

    /// Stops the worker and closes the connection. Safe to call repeatedly,
    /// also on a client that never started.
    pub fn stop(&mut self) {
        if self.phase == Phase::Stopped {
            debug!("Qilowatt client for {} already stopped", self.inverter_id());
            return;
        }
        debug!("Stopping Qilowatt MQTT client for {}", self.inverter_id());

        if let Some(mut worker) = self.worker.take() {
            worker.cancel.cancel();
            match worker.handle.join() {
                Ok(poller) => self.poller = Some(poller),
                Err(_) => error!("poll worker for {} panicked", self.inverter_id()),
            }
        }

        let had_connection = match self.poller.as_mut().and_then(Poller::connection_mut) {
            Some(connection) => {
                if let Err(e) = connection.disconnect() {
                    warn!("Failed to disconnect {}: {e:#}", self.credentials.inverter_id);
                }
                true
            }
            None => false,
        };
        if had_connection {
            self.events.marshal(HostEvent::ConnectionStatus {
                inverter_id: self.credentials.inverter_id.clone(),
                connected: false,
            });
        }
        // the adapter goes with the client
        self.poller = None;
        self.phase = Phase::Stopped;
    }
}

impl<C: TelemetryConnection> Drop for PollingClient<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Callback handed to the connection: copies each command into the host queue.
fn command_relay(inverter_id: String, events: EventSender) -> CommandCallback {
    Box::new(move |command| {
        debug!("Received WORKMODE command: {command:?}");
        events.marshal(HostEvent::WorkMode {
            inverter_id: inverter_id.clone(),
            command,
        });
    })
}

struct PollJob {
    inverter_id: String,
    settings: PollSettings,
    events: EventSender,
    liveness: Liveness,
    token: CancellationToken,
}

impl PollJob {
    fn run<C: TelemetryConnection>(self, mut poller: Poller<C>) -> Poller<C> {
        if self.token.sleep(self.settings.initial_delay) {
            return poller;
        }
        let mut reported = None;
        loop {
            let connected = self.liveness.is_up();
            if reported != Some(connected) {
                let status = if connected { "up" } else { "down" };
                info!("Qilowatt connection for {} is {status}", self.inverter_id);
                self.events.marshal(HostEvent::ConnectionStatus {
                    inverter_id: self.inverter_id.clone(),
                    connected,
                });
                reported = Some(connected);
            }

            let outcome = poller.poll();
            debug!("poll cycle for {}: {outcome:?}", self.inverter_id);

            if self.token.sleep(self.settings.interval) {
                return poller;
            }
        }
    }
}
