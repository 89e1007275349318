// externally visible interfaces
pub mod client;
pub mod config_entry;
pub mod config_flow;
pub mod context;
pub mod dispatcher;
pub mod entities;
pub mod host;
pub mod integration;
pub mod inverter;
pub mod mqtt_config;
pub mod poller;
pub mod snapshot;
pub mod telemetry;

// internal interfaces
mod error;
mod shutdown;

pub use error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Integration domain, used to namespace signals and device identifiers.
pub const DOMAIN: &str = "qilowatt";
