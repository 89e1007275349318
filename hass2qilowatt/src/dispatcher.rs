//! Named-signal dispatcher for the single-threaded host context.
//!
//! Listeners are held behind `Rc`, so a `Dispatcher` never leaves the thread
//! that created it. Anything arriving from other threads goes through
//! [`crate::context::HostContext`] first.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use log::debug;

use crate::snapshot::WorkModeCommand;
use crate::DOMAIN;

#[derive(Clone, Debug, PartialEq)]
pub enum Signal {
    ConnectionStatus(bool),
    WorkMode(WorkModeCommand),
}

pub fn workmode_signal(inverter_id: &str) -> String {
    format!("{DOMAIN}_workmode_update_{inverter_id}")
}

pub fn connection_status_signal(inverter_id: &str) -> String {
    format!("{DOMAIN}_connection_status_{inverter_id}")
}

type Listener = Rc<RefCell<dyn FnMut(&Signal)>>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<String, Vec<(u64, Listener)>>,
}

#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Rc<RefCell<Registry>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for `signal`. Dropping the returned handle
    /// unsubscribes it.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn connect<F>(&self, signal: &str, listener: F) -> Subscription
    where
        F: FnMut(&Signal) + 'static,
    {
        let mut registry = self.inner.borrow_mut();
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .listeners
            .entry(signal.to_string())
            .or_default()
            .push((id, Rc::new(RefCell::new(listener))));
        debug!("subscribed to signal {signal}");

        Subscription {
            registry: Rc::downgrade(&self.inner),
            signal: signal.to_string(),
            id,
        }
    }

    /// Delivers `payload` to every listener of `signal` and returns how many
    /// were invoked.
    pub fn send(&self, signal: &str, payload: &Signal) -> usize {
        // listeners may (un)subscribe while being called
        let listeners: Vec<Listener> = match self.inner.borrow().listeners.get(signal) {
            Some(listeners) => listeners.iter().map(|(_, l)| l.clone()).collect(),
            None => return 0,
        };
        for listener in &listeners {
            (&mut *listener.borrow_mut())(payload);
        }
        listeners.len()
    }

    pub fn listener_count(&self, signal: &str) -> usize {
        self.inner
            .borrow()
            .listeners
            .get(signal)
            .map_or(0, Vec::len)
    }
}

pub struct Subscription {
    registry: Weak<RefCell<Registry>>,
    signal: String,
    id: u64,
}

impl Subscription {
    pub fn signal(&self) -> &str {
        &self.signal
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.borrow_mut();
        if let Some(listeners) = registry.listeners.get_mut(&self.signal) {
            listeners.retain(|(id, _)| *id != self.id);
            if listeners.is_empty() {
                registry.listeners.remove(&self.signal);
            }
        }
        debug!("unsubscribed from signal {}", self.signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn delivers_only_to_matching_signal() {
        let dispatcher = Dispatcher::new();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let _sub = dispatcher.connect("a", move |_| counter.set(counter.get() + 1));

        assert_eq!(dispatcher.send("a", &Signal::ConnectionStatus(true)), 1);
        assert_eq!(dispatcher.send("b", &Signal::ConnectionStatus(true)), 0);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let dispatcher = Dispatcher::new();
        let sub = dispatcher.connect("a", |_| {});
        assert_eq!(dispatcher.listener_count("a"), 1);
        drop(sub);
        assert_eq!(dispatcher.listener_count("a"), 0);
        assert_eq!(dispatcher.send("a", &Signal::ConnectionStatus(false)), 0);
    }

    #[test]
    fn listener_may_subscribe_during_dispatch() {
        let dispatcher = Dispatcher::new();
        let late = Rc::new(RefCell::new(Vec::new()));
        let inner = dispatcher.clone();
        let store = late.clone();
        let _sub = dispatcher.connect("a", move |_| {
            store.borrow_mut().push(inner.connect("a", |_| {}));
        });

        dispatcher.send("a", &Signal::ConnectionStatus(true));
        assert_eq!(dispatcher.listener_count("a"), 2);
    }

    #[test]
    fn signal_names_are_scoped_by_inverter() {
        assert_eq!(workmode_signal("inv1"), "qilowatt_workmode_update_inv1");
        assert_eq!(
            connection_status_signal("inv1"),
            "qilowatt_connection_status_inv1"
        );
    }
}
