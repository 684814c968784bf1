//! Device and connection-state value types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one physical USB device across attach/detach events.
///
/// Built from the vendor/product pair and the bus path the device sits on,
/// so re-plugging the same device into the same port yields an equal
/// identity. Immutable once obtained.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    vendor_id: u16,
    product_id: u16,
    bus: u8,
    port_path: Vec<u8>,
}

impl DeviceIdentity {
    pub fn new(vendor_id: u16, product_id: u16, bus: u8, port_path: Vec<u8>) -> Self {
        Self {
            vendor_id,
            product_id,
            bus,
            port_path,
        }
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    pub fn bus(&self) -> u8 {
        self.bus
    }

    pub fn port_path(&self) -> &[u8] {
        &self.port_path
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x}@{}",
            self.vendor_id, self.product_id, self.bus
        )?;
        for (i, port) in self.port_path.iter().enumerate() {
            let sep = if i == 0 { '-' } else { '.' };
            write!(f, "{sep}{port}")?;
        }
        Ok(())
    }
}

/// One interface descriptor of a USB device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbInterface {
    pub number: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

/// A device as reported by the host USB stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbDevice {
    pub identity: DeviceIdentity,
    pub interfaces: Vec<UsbInterface>,
    #[serde(default)]
    pub product_name: Option<String>,
}

impl UsbDevice {
    pub fn vendor_id(&self) -> u16 {
        self.identity.vendor_id()
    }

    /// Returns true if any interface carries the given class byte.
    pub fn has_interface_class(&self, class: u8) -> bool {
        self.interfaces.iter().any(|i| i.class == class)
    }
}

/// Product metadata fetched from a ready device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInfo {
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    #[serde(default)]
    pub firmware_version: Option<String>,
}

/// Latest liveness metric published for observability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricReading {
    Value(f64),
    /// The probe failed or the device reported nothing.
    Unknown,
}

impl MetricReading {
    /// Converts a probe result into a publishable reading.
    pub fn from_probe(metric: Option<f64>) -> Self {
        metric.map_or(Self::Unknown, Self::Value)
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(*v),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for MetricReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Lifecycle state of the connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Idle,
    /// Opening the transport and running the handshake.
    Connecting,
    /// Authenticated, waiting for the device to answer probes.
    Probing,
    Ready,
    Failed,
    Disconnected,
}

impl ConnectionState {
    /// Whether a new connection attempt may start from this state.
    pub fn accepts_connect(self) -> bool {
        matches!(self, Self::Idle | Self::Failed | Self::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Probing => "probing",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Normalized hotplug notification.
///
/// [`identity`](Self::identity) is `Some` while a candidate device is
/// present and `None` once one went away. A removal still names the device
/// that left, so consumers can tell whether it was the one they hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    /// A candidate device is now present.
    Attached(DeviceIdentity),
    /// A vendor device was removed.
    Removed(DeviceIdentity),
}

impl WatcherEvent {
    /// The present candidate, or `None` for a removal.
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        match self {
            Self::Attached(identity) => Some(identity),
            Self::Removed(_) => None,
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, Self::Removed(_))
    }
}

/// Value snapshot of the published connection state.
///
/// Written only by the connection manager; readers get copies.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub metric: Option<MetricReading>,
    pub claimed: bool,
    pub checked: bool,
    pub transport_ready: bool,
}
