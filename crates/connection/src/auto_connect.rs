//! Auto-connect policy and device selection.
//!
//! Decides whether to silently reconnect to an already-authorized device.
//! Only the elected leader instance claims a shared device, and only after
//! the one-time startup check has run.

use tracing::{debug, info};

use devlink_hotplug::{DeviceFilter, UsbHost};
use devlink_protocol::UsbDevice;

use crate::error::ConnectionError;
use crate::manager::ConnectionManager;
use crate::types::{ConnectOutcome, ConnectionEvent};

/// Governance inputs for one auto-connect decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoConnectGate {
    /// A connection attempt or session is already active.
    pub connecting: bool,
    /// The one-time startup check has run.
    pub checked: bool,
    /// This instance is the elected leader.
    pub leader: bool,
}

impl AutoConnectGate {
    pub fn allows(&self) -> bool {
        !self.connecting && self.checked && self.leader
    }
}

/// What an auto-connect pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoConnectOutcome {
    /// The gate was closed.
    Skipped,
    Connected(ConnectOutcome),
    /// No protocol-capable device; preparation flow requested.
    Redirected,
}

/// Stateless auto-connect policy.
#[derive(Debug, Clone, Copy)]
pub struct AutoConnector {
    filter: DeviceFilter,
}

impl AutoConnector {
    pub fn new(filter: DeviceFilter) -> Self {
        Self { filter }
    }

    /// First device from the expected vendor exposing the protocol
    /// interface.
    pub fn select(&self, devices: &[UsbDevice]) -> Option<UsbDevice> {
        devices
            .iter()
            .find(|d| self.filter.is_protocol_capable(d))
            .cloned()
    }

    /// Connects to the first protocol-capable device, or sends the user to
    /// the preparation flow when there is none. No transport is opened in
    /// the second case.
    pub async fn connect_or_redirect(
        &self,
        manager: &ConnectionManager,
        devices: &[UsbDevice],
    ) -> Result<AutoConnectOutcome, ConnectionError> {
        match self.select(devices) {
            Some(device) => {
                let outcome = manager.connect(Some(device)).await?;
                Ok(AutoConnectOutcome::Connected(outcome))
            }
            None => {
                manager.redirect_to_preparation();
                Ok(AutoConnectOutcome::Redirected)
            }
        }
    }

    /// Runs one auto-connect pass over the host's authorized devices.
    pub async fn auto_connect(
        &self,
        manager: &ConnectionManager,
        host: &dyn UsbHost,
        gate: AutoConnectGate,
    ) -> Result<AutoConnectOutcome, ConnectionError> {
        if !gate.allows() {
            debug!(?gate, "auto-connect skipped");
            return Ok(AutoConnectOutcome::Skipped);
        }

        let devices = host.authorized_devices().await?;
        self.connect_or_redirect(manager, &devices).await
    }
}

impl ConnectionManager {
    /// Builds the gate from the manager's own state and the leader flag.
    pub fn auto_connect_gate(&self, leader: bool) -> AutoConnectGate {
        let lc = self.lifecycle();
        AutoConnectGate {
            connecting: !lc.state.accepts_connect() || lc.session.is_some(),
            checked: lc.checked,
            leader,
        }
    }

    /// Asks the user to pick a device and connects to it.
    ///
    /// A device without the protocol interface leads to the preparation
    /// flow. So does a declined selection, which is also reported as
    /// [`ConnectionError::DeviceUnavailable`].
    pub async fn request_device(
        &self,
        host: &dyn UsbHost,
    ) -> Result<AutoConnectOutcome, ConnectionError> {
        let connector = AutoConnector::new(self.config.filter);
        match host.request_device(&self.config.filter).await? {
            Some(device) => connector.connect_or_redirect(self, &[device]).await,
            None => {
                debug!("device selection declined");
                self.redirect_to_preparation();
                Err(ConnectionError::DeviceUnavailable)
            }
        }
    }

    /// One-time startup check.
    ///
    /// On the leader, silently connects to an already-authorized
    /// protocol-capable device if there is one, then marks the check done.
    /// Later calls, and calls on non-leaders, do nothing.
    pub async fn initial_check(
        &self,
        host: &dyn UsbHost,
        leader: bool,
    ) -> Result<AutoConnectOutcome, ConnectionError> {
        if self.lifecycle().checked || !leader {
            return Ok(AutoConnectOutcome::Skipped);
        }

        let connector = AutoConnector::new(self.config.filter);
        let devices = host.authorized_devices().await;
        self.mark_checked();

        let outcome = match connector.select(&devices?) {
            Some(device) => {
                info!(device = %device.identity, "found authorized device at startup");
                AutoConnectOutcome::Connected(self.connect(Some(device)).await?)
            }
            None => AutoConnectOutcome::Skipped,
        };
        Ok(outcome)
    }

    fn mark_checked(&self) {
        {
            let mut lc = self.lifecycle();
            if lc.checked {
                return;
            }
            lc.checked = true;
        }
        self.snapshot_tx.send_modify(|s| s.checked = true);
        self.emit(ConnectionEvent::Checked(true));
    }
}
