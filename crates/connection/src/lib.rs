//! Device connection lifecycle coordinator.
//!
//! Opens a USB-class transport to an attached device, authenticates it,
//! polls the fresh session until the device answers, and reacts to
//! hotplug events. At most one connection session exists at a time.

pub mod auto_connect;
pub mod backend;
pub mod config;
pub mod error;
pub mod manager;
pub mod poller;
pub mod session;
pub mod types;
mod watching;

#[cfg(test)]
pub(crate) mod test_support;

pub use auto_connect::{AutoConnectGate, AutoConnectOutcome, AutoConnector};
pub use backend::{AuthClient, ByteStream, Credential, DeviceBackend, DeviceSession};
pub use config::{ConnectionConfig, ReadinessConfig};
pub use error::{ConnectionError, DeviceError};
pub use manager::ConnectionManager;
pub use poller::{PollerHandle, ReadinessPoller};
pub use session::{ConnectionSession, SessionHandle};
pub use types::{ConnectOutcome, ConnectionEvent};
