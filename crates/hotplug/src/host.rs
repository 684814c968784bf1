//! The host USB stack as seen by the lifecycle coordinator.

use async_trait::async_trait;
use tokio::sync::mpsc;

use devlink_protocol::{DeviceIdentity, UsbDevice};

use crate::HostError;
use crate::filter::DeviceFilter;

/// Raw attach/detach notification from the host USB stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Attached(UsbDevice),
    Detached(DeviceIdentity),
}

/// Device enumeration and hotplug notifications from the host.
///
/// Device claiming and byte-level I/O live behind the connection crate's
/// backend trait, not here.
#[async_trait]
pub trait UsbHost: Send + Sync {
    /// Asks the user to pick a device matching `filter`.
    ///
    /// Returns `Ok(None)` when the user declines the selection.
    async fn request_device(&self, filter: &DeviceFilter) -> Result<Option<UsbDevice>, HostError>;

    /// Devices this process was already granted access to.
    async fn authorized_devices(&self) -> Result<Vec<UsbDevice>, HostError>;

    /// Opens a hotplug subscription. Dropping the receiver disposes it.
    fn subscribe_hotplug(&self) -> Result<mpsc::Receiver<HotplugEvent>, HostError>;
}
