use std::time::Duration;

/// USB vendor id of supported devices.
pub const DEFAULT_VENDOR_ID: u16 = 0x2ca3;

/// Interface class byte of the vendor-specific protocol interface.
///
/// A device that does not expose an interface of this class is attached
/// but not yet protocol-capable and has to go through preparation first.
pub const VENDOR_SPECIFIC_CLASS: u8 = 0xFF;

/// Cadence of readiness probes on a freshly authenticated session.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(3);

/// Probe attempts after which a session is declared ready even without a
/// positive metric. Some devices never report one.
pub const DEFAULT_PROBE_ATTEMPTS: u32 = 3;

/// Logical port the device uses to reach the locally hosted service.
pub const DEFAULT_REVERSE_PORT: u16 = 8000;
