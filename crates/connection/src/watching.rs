//! Reaction to hotplug events.
//!
//! The manager owns at most one watcher subscription. Attach events go
//! through the auto-connect gate; removal of the session's device tears the
//! session down, removal of any other device is ignored.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use devlink_hotplug::{HotplugWatcher, UsbHost};
use devlink_protocol::WatcherEvent;

use crate::auto_connect::{AutoConnectOutcome, AutoConnector};
use crate::error::ConnectionError;
use crate::manager::{ConnectionManager, lock};
use crate::types::ConnectionEvent;

/// The active subscription and the token stopping its dispatcher.
pub(crate) struct Watching {
    watcher: HotplugWatcher,
    cancel: CancellationToken,
}

impl Watching {
    fn dispose(mut self) {
        self.cancel.cancel();
        self.watcher.dispose();
    }
}

impl ConnectionManager {
    /// Subscribes to hotplug events, replacing any previous subscription.
    ///
    /// `leader` is read on every attach to build the auto-connect gate.
    pub fn start_watching(
        &self,
        host: Arc<dyn UsbHost>,
        leader: watch::Receiver<bool>,
    ) -> Result<(), ConnectionError> {
        self.stop_watching();

        let (watcher, events) = HotplugWatcher::start(host.as_ref(), self.config.filter)?;
        let cancel = CancellationToken::new();
        let previous = lock(&self.watching).replace(Watching {
            watcher,
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            previous.dispose();
        }

        tokio::spawn(dispatch(self.clone(), host, leader, events, cancel));
        info!("watching for device hotplug");
        Ok(())
    }

    /// Disposes the hotplug subscription, if any. Idempotent.
    pub fn stop_watching(&self) {
        let current = lock(&self.watching).take();
        if let Some(current) = current {
            current.dispose();
            debug!("stopped watching for device hotplug");
        }
    }

    pub fn is_watching(&self) -> bool {
        lock(&self.watching)
            .as_ref()
            .is_some_and(|w| w.watcher.is_active())
    }
}

async fn dispatch(
    manager: ConnectionManager,
    host: Arc<dyn UsbHost>,
    leader: watch::Receiver<bool>,
    mut events: mpsc::Receiver<WatcherEvent>,
    cancel: CancellationToken,
) {
    let connector = AutoConnector::new(manager.config.filter);

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            WatcherEvent::Attached(identity) => {
                info!(device = %identity, "device attached");
                manager.emit(ConnectionEvent::DeviceAttached(identity));

                let gate = manager.auto_connect_gate(*leader.borrow());
                let manager = manager.clone();
                let host = host.clone();
                // Off the dispatch loop so a detach can interleave with the
                // handshake.
                tokio::spawn(async move {
                    match connector.auto_connect(&manager, host.as_ref(), gate).await {
                        Ok(AutoConnectOutcome::Skipped) => {}
                        Ok(outcome) => debug!(?outcome, "auto-connect after attach"),
                        Err(e) => warn!(error = %e, "auto-connect after attach failed"),
                    }
                });
            }
            WatcherEvent::Removed(identity) => {
                if manager.handle_removal(&identity).await {
                    info!(device = %identity, "device detached, session closed");
                    manager.emit(ConnectionEvent::DeviceDetached);
                } else {
                    debug!(device = %identity, "removal of device without a session");
                }
            }
        }
    }

    debug!("hotplug dispatcher stopped");
}
