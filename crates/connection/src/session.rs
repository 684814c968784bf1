//! The single live connection session and the read-only handle handed to
//! downstream feature modules.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use devlink_protocol::{DeviceIdentity, ProductInfo};

use crate::backend::DeviceSession;
use crate::error::DeviceError;

/// Authenticated transport plus probe bookkeeping.
///
/// Owned by the connection manager. Only one exists at a time; the poller
/// and the ready handle hold clones of the same `Arc`.
pub struct ConnectionSession {
    id: u64,
    identity: DeviceIdentity,
    device: Arc<dyn DeviceSession>,
    probes: AtomicU32,
    ready: AtomicBool,
    live: AtomicBool,
}

impl ConnectionSession {
    pub(crate) fn new(id: u64, identity: DeviceIdentity, device: Arc<dyn DeviceSession>) -> Self {
        Self {
            id,
            identity,
            device,
            probes: AtomicU32::new(0),
            ready: AtomicBool::new(false),
            live: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub(crate) fn device(&self) -> &Arc<dyn DeviceSession> {
        &self.device
    }

    /// Counts a probe attempt, returning the 1-based attempt number.
    pub(crate) fn record_probe(&self) -> u32 {
        self.probes.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn probe_count(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    /// Flips the readiness flag. Returns `false` if it was already set.
    pub(crate) fn mark_ready(&self) -> bool {
        self.ready
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub(crate) fn invalidate(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("probes", &self.probe_count())
            .field("ready", &self.is_ready())
            .field("live", &self.is_live())
            .finish()
    }
}

/// Read-only capability on a ready session.
///
/// Lets feature modules query the device without touching the transport.
/// Calls fail with [`DeviceError::Closed`] once the session is torn down.
#[derive(Clone)]
pub struct SessionHandle {
    session: Arc<ConnectionSession>,
}

impl SessionHandle {
    pub(crate) fn new(session: Arc<ConnectionSession>) -> Self {
        Self { session }
    }

    pub fn session_id(&self) -> u64 {
        self.session.id()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        self.session.identity()
    }

    pub fn is_live(&self) -> bool {
        self.session.is_live()
    }

    pub async fn metric(&self) -> Result<Option<f64>, DeviceError> {
        self.ensure_live()?;
        self.session.device().metric().await
    }

    pub async fn product_info(&self) -> Result<ProductInfo, DeviceError> {
        self.ensure_live()?;
        self.session.device().product_info().await
    }

    fn ensure_live(&self) -> Result<(), DeviceError> {
        if self.is_live() {
            Ok(())
        } else {
            Err(DeviceError::Closed)
        }
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id())
            .field("identity", self.identity())
            .finish()
    }
}
