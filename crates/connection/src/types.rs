//! Public types for the connection manager.

use devlink_protocol::{ConnectionState, DeviceIdentity, MetricReading, ProductInfo};

use crate::session::SessionHandle;

/// Notifications published to the application store.
///
/// One-way: the manager writes, the store reads.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Lifecycle state changed.
    StateChanged(ConnectionState),
    /// A connection attempt started.
    Connecting,
    /// The session passed readiness and is serving requests.
    Connected,
    /// Opening or authenticating the device failed.
    ConnectionFailed { reason: String },
    /// Device-scoped state must be dropped; no device is selected.
    ContextReset,
    /// The one-time startup check ran.
    Checked(bool),
    /// The device is exclusively held by this process.
    Claimed(bool),
    ProductInfo(ProductInfo),
    /// Latest liveness metric, republished every probe cycle.
    Metric(MetricReading),
    /// The device transport is usable by feature modules.
    TransportReady(bool),
    /// Drop the cached package list.
    ResetPackages,
    /// Drop cached health-check results.
    ResetHealthChecks,
    /// Run the required-binaries verification.
    VerifyBinaries,
    /// The attached device is not protocol-capable yet; route the user to
    /// the preparation flow.
    NeedsPreparation,
    /// Capability on the ready session for feature modules.
    SessionReady(SessionHandle),
    /// A candidate device was attached.
    DeviceAttached(DeviceIdentity),
    /// The session's device was removed and the session torn down.
    DeviceDetached,
}

/// Result of a [`connect`](crate::ConnectionManager::connect) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Session established and readiness polling started.
    Probing { session_id: u64 },
    /// Another attempt or session is active; nothing was done.
    AlreadyActive,
    /// No device given; device-scoped state was reset.
    NoDevice,
    /// A teardown ran while the handshake was in flight; the new session
    /// was discarded.
    Superseded,
}
