use serde::{Deserialize, Serialize};

use devlink_protocol::{DEFAULT_VENDOR_ID, UsbDevice, VENDOR_SPECIFIC_CLASS};

/// Vendor and interface-class filter for candidate devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFilter {
    pub vendor_id: u16,
    pub interface_class: u8,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            interface_class: VENDOR_SPECIFIC_CLASS,
        }
    }
}

impl DeviceFilter {
    /// Device comes from the expected vendor.
    pub fn matches_vendor(&self, device: &UsbDevice) -> bool {
        device.vendor_id() == self.vendor_id
    }

    /// Device is from the expected vendor and exposes the protocol interface.
    pub fn is_protocol_capable(&self, device: &UsbDevice) -> bool {
        self.matches_vendor(device) && device.has_interface_class(self.interface_class)
    }
}
