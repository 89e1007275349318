//! The host's single-threaded event context.
//!
//! Other threads never touch the [`Dispatcher`]; they hand events to an
//! [`EventSender`], which queues them on a bounded channel without blocking.
//! The owner of the [`HostContext`] drains that queue on its own schedule.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

use log::{debug, warn};

use crate::dispatcher::{connection_status_signal, workmode_signal, Dispatcher, Signal};
use crate::snapshot::WorkModeCommand;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Clone, Debug, PartialEq)]
pub enum HostEvent {
    ConnectionStatus { inverter_id: String, connected: bool },
    WorkMode {
        inverter_id: String,
        command: WorkModeCommand,
    },
}

impl HostEvent {
    fn into_signal(self) -> (String, Signal) {
        match self {
            HostEvent::ConnectionStatus {
                inverter_id,
                connected,
            } => (
                connection_status_signal(&inverter_id),
                Signal::ConnectionStatus(connected),
            ),
            HostEvent::WorkMode {
                inverter_id,
                command,
            } => (workmode_signal(&inverter_id), Signal::WorkMode(command)),
        }
    }
}

/// Cloneable, `Send` handle for marshaling events into the host context.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: SyncSender<HostEvent>,
}

impl EventSender {
    /// Queues `event` without blocking. Returns whether it was accepted.
    pub fn marshal(&self, event: HostEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("host event queue full, dropping {event:?}");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("host context is gone, dropping event");
                false
            }
        }
    }
}

pub struct HostContext {
    dispatcher: Dispatcher,
    sender: SyncSender<HostEvent>,
    receiver: Receiver<HostEvent>,
}

impl HostContext {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        Self {
            dispatcher: Dispatcher::new(),
            sender,
            receiver,
        }
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            sender: self.sender.clone(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Dispatches everything already queued, in arrival order.
    pub fn drain(&self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.receiver.try_recv() {
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    /// Waits up to `timeout` for an event, then drains the queue.
    pub fn run_for(&self, timeout: Duration) -> usize {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => {
                self.dispatch(event);
                1 + self.drain()
            }
            // the context holds a sender itself, so the queue never disconnects
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    fn dispatch(&self, event: HostEvent) {
        let (signal, payload) = event.into_signal();
        let delivered = self.dispatcher.send(&signal, &payload);
        debug!("dispatched {signal} to {delivered} listener(s)");
    }
}

impl Default for HostContext {
    fn default() -> Self {
        Self::new()
    }
}
