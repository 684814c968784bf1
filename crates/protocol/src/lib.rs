//! Shared data model for the devlink connection lifecycle.
//!
//! Types in this crate are plain values: device identities as reported by
//! the host USB stack, the published connection state, and the policy
//! constants the lifecycle coordinator defaults to.

pub mod constants;
pub mod types;

pub use constants::{
    DEFAULT_PROBE_ATTEMPTS, DEFAULT_PROBE_INTERVAL, DEFAULT_REVERSE_PORT, DEFAULT_VENDOR_ID,
    VENDOR_SPECIFIC_CLASS,
};
pub use types::{
    ConnectionSnapshot, ConnectionState, DeviceIdentity, MetricReading, ProductInfo, UsbDevice,
    UsbInterface, WatcherEvent,
};
