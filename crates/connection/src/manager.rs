//! Connection manager owning the session lifecycle.
//!
//! Opens and authenticates a device, starts readiness polling on the fresh
//! session, publishes state to the application store, and tears everything
//! down on detach, explicit disconnect or shutdown.
//!
//! Async continuations (poller ticks, watcher callbacks, an in-flight
//! handshake) carry the session or attempt they belong to and check it is
//! still current before acting.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use devlink_protocol::{
    ConnectionSnapshot, ConnectionState, DeviceIdentity, MetricReading, UsbDevice,
};

use crate::backend::{AuthClient, Credential, DeviceBackend, DeviceSession};
use crate::config::ConnectionConfig;
use crate::error::{ConnectionError, DeviceError};
use crate::poller::{PollerHandle, ReadinessPoller};
use crate::session::{ConnectionSession, SessionHandle};
use crate::types::{ConnectOutcome, ConnectionEvent};
use crate::watching::Watching;

const EVENT_CAPACITY: usize = 256;

/// Manager-owned lifecycle state. Never held across an `.await`.
#[derive(Default)]
pub(crate) struct Lifecycle {
    pub(crate) state: ConnectionState,
    pub(crate) session: Option<Arc<ConnectionSession>>,
    pub(crate) poller: Option<PollerHandle>,
    /// Device of the handshake in flight, if any.
    pub(crate) attempt: Option<DeviceIdentity>,
    /// Bumped on every attempt and every teardown so a stale handshake
    /// continuation can tell it lost the race.
    pub(crate) epoch: u64,
    pub(crate) next_session_id: u64,
    pub(crate) checked: bool,
}

/// Coordinates connect, readiness and teardown for a single device.
///
/// Cheap to clone; clones share the same lifecycle.
#[derive(Clone)]
pub struct ConnectionManager {
    pub(crate) config: ConnectionConfig,
    pub(crate) backend: Arc<dyn DeviceBackend>,
    pub(crate) auth: Arc<dyn AuthClient>,
    pub(crate) credential: Credential,
    pub(crate) lifecycle: Arc<Mutex<Lifecycle>>,
    pub(crate) watching: Arc<Mutex<Option<Watching>>>,
    pub(crate) snapshot_tx: Arc<watch::Sender<ConnectionSnapshot>>,
    pub(crate) events_tx: mpsc::Sender<ConnectionEvent>,
    pub(crate) events_rx: Arc<Mutex<Option<mpsc::Receiver<ConnectionEvent>>>>,
}

impl ConnectionManager {
    pub fn new(
        backend: Arc<dyn DeviceBackend>,
        auth: Arc<dyn AuthClient>,
        credential: Credential,
        config: ConnectionConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (snapshot_tx, _) = watch::channel(ConnectionSnapshot::default());

        Self {
            config,
            backend,
            auth,
            credential,
            lifecycle: Arc::new(Mutex::new(Lifecycle::default())),
            watching: Arc::new(Mutex::new(None)),
            snapshot_tx: Arc::new(snapshot_tx),
            events_tx,
            events_rx: Arc::new(Mutex::new(Some(events_rx))),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        lock(&self.events_rx).take()
    }

    /// Subscribes to the published state snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle().state
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Identity of the device behind the live session, if any.
    pub fn current_identity(&self) -> Option<DeviceIdentity> {
        self.lifecycle()
            .session
            .as_ref()
            .map(|s| s.identity().clone())
    }

    /// Handle on the live session once it has passed readiness.
    pub fn session_handle(&self) -> Option<SessionHandle> {
        self.lifecycle()
            .session
            .as_ref()
            .filter(|s| s.is_ready())
            .map(|s| SessionHandle::new(s.clone()))
    }

    /// Connects to `device`.
    ///
    /// `None` resets device-scoped state and returns
    /// [`ConnectOutcome::NoDevice`]. If an attempt or session is already
    /// active the call does nothing and returns
    /// [`ConnectOutcome::AlreadyActive`].
    pub async fn connect(
        &self,
        device: Option<UsbDevice>,
    ) -> Result<ConnectOutcome, ConnectionError> {
        let Some(device) = device else {
            self.reset_context();
            return Ok(ConnectOutcome::NoDevice);
        };

        let Some(epoch) = self.begin_attempt(&device.identity) else {
            debug!(device = %device.identity, "connect ignored, attempt already active");
            return Ok(ConnectOutcome::AlreadyActive);
        };

        let identity = device.identity.clone();
        info!(device = %identity, "connecting to device");
        self.emit(ConnectionEvent::Connecting);
        self.emit_state(ConnectionState::Connecting);

        let device_session = match self.open_and_authenticate(&device).await {
            Ok(s) => s,
            Err(e) => {
                warn!(device = %identity, error = %e, "connection failed");
                if self.fail_attempt(epoch) {
                    self.emit(ConnectionEvent::ConnectionFailed {
                        reason: e.to_string(),
                    });
                    self.emit_state(ConnectionState::Failed);
                }
                return Err(ConnectionError::HandshakeFailed(e));
            }
        };

        let installed = {
            let mut lc = self.lifecycle();
            if lc.epoch != epoch || lc.session.is_some() {
                Err(owns_claim(&lc, &identity))
            } else {
                lc.attempt = None;
                lc.next_session_id += 1;
                let session = Arc::new(ConnectionSession::new(
                    lc.next_session_id,
                    identity.clone(),
                    device_session,
                ));
                lc.session = Some(session.clone());
                lc.state = ConnectionState::Probing;
                Ok(session)
            }
        };
        let session = match installed {
            Ok(session) => session,
            Err(claimed_elsewhere) => {
                debug!(device = %identity, "handshake finished after teardown, discarding session");
                if !claimed_elsewhere && let Err(e) = self.backend.close(&identity).await {
                    warn!(device = %identity, error = %e, "failed to release discarded device");
                }
                return Ok(ConnectOutcome::Superseded);
            }
        };

        self.emit(ConnectionEvent::Claimed(true));
        self.snapshot_tx.send_modify(|s| s.claimed = true);
        self.emit_state(ConnectionState::Probing);

        let poller = ReadinessPoller::spawn(self.clone(), session.clone());
        {
            let mut lc = self.lifecycle();
            if is_current(&lc, session.id()) {
                lc.poller = Some(poller);
            } else {
                poller.cancel();
            }
        }

        info!(device = %identity, session = session.id(), "device authenticated, probing readiness");
        Ok(ConnectOutcome::Probing {
            session_id: session.id(),
        })
    }

    /// Finishes bringing up a session once the poller saw it answer.
    ///
    /// Ignored when `session` is no longer current or was already marked
    /// ready.
    pub(crate) async fn on_readiness_achieved(
        &self,
        session: &Arc<ConnectionSession>,
        metric: MetricReading,
    ) {
        if !self.is_current(session.id()) {
            debug!(session = session.id(), "readiness for stale session ignored");
            return;
        }
        if !session.mark_ready() {
            debug!(session = session.id(), "session already ready");
            return;
        }

        info!(
            device = %session.identity(),
            session = session.id(),
            %metric,
            attempts = session.probe_count(),
            "device ready"
        );

        let device = session.device();
        if let Err(e) = device
            .establish_reverse_channel(self.config.reverse_port)
            .await
        {
            warn!(port = self.config.reverse_port, error = %e, "reverse channel setup failed");
        }

        let product = match device.product_info().await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(error = %e, "failed to fetch product info");
                None
            }
        };

        {
            let mut lc = self.lifecycle();
            if !is_current(&lc, session.id()) {
                debug!(session = session.id(), "session torn down while finishing readiness");
                return;
            }
            lc.state = ConnectionState::Ready;
        }

        if let Some(info) = product {
            self.emit(ConnectionEvent::ProductInfo(info));
        }
        self.emit(ConnectionEvent::ResetPackages);
        self.emit(ConnectionEvent::ResetHealthChecks);
        self.emit(ConnectionEvent::Connected);
        self.emit_state(ConnectionState::Ready);
        self.emit(ConnectionEvent::TransportReady(true));
        self.snapshot_tx.send_modify(|s| s.transport_ready = true);
        self.emit(ConnectionEvent::VerifyBinaries);
        self.emit(ConnectionEvent::SessionReady(SessionHandle::new(
            session.clone(),
        )));
    }

    /// Publishes the metric of one probe cycle.
    pub(crate) fn publish_metric(&self, metric: MetricReading) {
        self.snapshot_tx.send_modify(|s| s.metric = Some(metric));
        self.emit(ConnectionEvent::Metric(metric));
    }

    /// User-initiated disconnect. Also releases the hotplug watcher, so the
    /// device is not silently reconnected on the next attach.
    pub async fn disconnect(&self) {
        self.stop_watching();
        self.teardown(None).await;
    }

    /// Tears down the session after the device went away. The watcher stays
    /// subscribed to catch the next attach.
    pub async fn handle_detach(&self) {
        self.teardown(None).await;
    }

    /// Tears down the session or attempt only if it is on `identity`.
    ///
    /// Returns whether anything was torn down. Removal of any other device
    /// leaves the session alone.
    pub async fn handle_removal(&self, identity: &DeviceIdentity) -> bool {
        self.teardown(Some(identity)).await
    }

    /// Process teardown. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.stop_watching();
        self.teardown(None).await;
        info!("connection manager shut down");
    }

    /// Cancels the poller, closes the transport and returns to `Idle`.
    ///
    /// With `only` set, nothing happens unless the session or the attempt
    /// in flight is on that device. Close failures are logged and
    /// swallowed.
    async fn teardown(&self, only: Option<&DeviceIdentity>) -> bool {
        let (was, session, poller) = {
            let mut lc = self.lifecycle();
            if let Some(identity) = only
                && !owns_claim(&lc, identity)
            {
                return false;
            }
            lc.epoch += 1;
            lc.attempt = None;
            let was = lc.state;
            lc.state = ConnectionState::Idle;
            (was, lc.session.take(), lc.poller.take())
        };

        if let Some(poller) = poller {
            poller.cancel();
        }

        if let Some(session) = &session {
            session.invalidate();
            if let Err(e) = self.backend.close(session.identity()).await {
                let err = ConnectionError::TeardownFailed(e);
                warn!(device = %session.identity(), error = %err, "failed to close transport");
            }
            debug!(device = %session.identity(), session = session.id(), "session closed");
        }

        if was == ConnectionState::Idle && session.is_none() {
            return false;
        }

        if session.is_some() {
            self.emit(ConnectionEvent::Claimed(false));
            self.emit(ConnectionEvent::TransportReady(false));
        }
        self.emit(ConnectionEvent::StateChanged(ConnectionState::Disconnected));
        self.snapshot_tx.send_modify(|s| {
            s.claimed = false;
            s.transport_ready = false;
            s.metric = None;
        });
        self.emit_state(ConnectionState::Idle);
        true
    }

    /// Drops device-scoped state when no device is selected.
    pub(crate) fn reset_context(&self) {
        debug!("no device selected, resetting device context");
        self.emit(ConnectionEvent::ContextReset);
        self.emit(ConnectionEvent::ResetPackages);
        self.emit(ConnectionEvent::ResetHealthChecks);
    }

    /// Routes the user to the device preparation flow.
    pub(crate) fn redirect_to_preparation(&self) {
        info!("no protocol-capable device, redirecting to preparation");
        self.emit(ConnectionEvent::NeedsPreparation);
    }

    pub(crate) fn is_current(&self, session_id: u64) -> bool {
        is_current(&self.lifecycle(), session_id)
    }

    /// Claims the attempt slot. `None` if the state does not accept a
    /// connect.
    fn begin_attempt(&self, identity: &DeviceIdentity) -> Option<u64> {
        let mut lc = self.lifecycle();
        if !lc.state.accepts_connect() || lc.session.is_some() {
            return None;
        }
        lc.epoch += 1;
        lc.attempt = Some(identity.clone());
        lc.state = ConnectionState::Connecting;
        Some(lc.epoch)
    }

    /// Moves a failed attempt to `Failed` unless it was superseded.
    fn fail_attempt(&self, epoch: u64) -> bool {
        let mut lc = self.lifecycle();
        if lc.epoch != epoch {
            return false;
        }
        lc.attempt = None;
        lc.state = ConnectionState::Failed;
        true
    }

    async fn open_and_authenticate(
        &self,
        device: &UsbDevice,
    ) -> Result<Arc<dyn DeviceSession>, DeviceError> {
        let stream = self.backend.open(device).await?;
        self.auth.authenticate(stream, &self.credential).await
    }

    pub(crate) fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        lock(&self.lifecycle)
    }

    fn emit_state(&self, state: ConnectionState) {
        self.snapshot_tx.send_modify(|s| s.state = state);
        self.emit(ConnectionEvent::StateChanged(state));
    }

    pub(crate) fn emit(&self, event: ConnectionEvent) {
        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(?event, "event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event receiver dropped");
            }
        }
    }
}

/// Whether the live session or the attempt in flight is on `identity`.
fn owns_claim(lc: &Lifecycle, identity: &DeviceIdentity) -> bool {
    lc.session.as_ref().is_some_and(|s| s.identity() == identity)
        || lc.attempt.as_ref() == Some(identity)
}

fn is_current(lc: &Lifecycle, session_id: u64) -> bool {
    lc.session.as_ref().is_some_and(|s| s.id() == session_id)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
