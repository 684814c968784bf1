//! Hotplug watcher: normalizes host attach/detach events.

use std::collections::HashSet;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use devlink_protocol::{DeviceIdentity, WatcherEvent};

use crate::HostError;
use crate::filter::DeviceFilter;
use crate::host::{HotplugEvent, UsbHost};

/// Tracks which candidate devices are currently present.
#[derive(Debug)]
pub(crate) struct PresenceTracker {
    filter: DeviceFilter,
    present: HashSet<DeviceIdentity>,
}

impl PresenceTracker {
    pub(crate) fn new(filter: DeviceFilter) -> Self {
        Self {
            filter,
            present: HashSet::new(),
        }
    }

    /// Folds a raw event into the tracker, returning the normalized event
    /// to emit, if any.
    ///
    /// Events for devices from another vendor are dropped, as is a repeated
    /// attach of a device already present. Every vendor device detach is
    /// reported with its identity, including devices claimed before the
    /// subscription existed; deciding whether it matters is up to the
    /// consumer.
    pub(crate) fn apply(&mut self, event: HotplugEvent) -> Option<WatcherEvent> {
        match event {
            HotplugEvent::Attached(device) => {
                if !self.filter.matches_vendor(&device) {
                    trace!(device = %device.identity, "ignoring attach of foreign device");
                    return None;
                }
                if !self.present.insert(device.identity.clone()) {
                    trace!(device = %device.identity, "device already present");
                    return None;
                }
                Some(WatcherEvent::Attached(device.identity))
            }
            HotplugEvent::Detached(identity) => {
                self.present.remove(&identity);
                if identity.vendor_id() != self.filter.vendor_id {
                    trace!(device = %identity, "ignoring detach of foreign device");
                    return None;
                }
                Some(WatcherEvent::Removed(identity))
            }
        }
    }
}

/// Single hotplug subscription.
///
/// Forwards normalized [`WatcherEvent`]s until disposed. Dropping the
/// watcher disposes it.
pub struct HotplugWatcher {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HotplugWatcher {
    /// Subscribes to the host's hotplug notifications.
    pub fn start(
        host: &dyn UsbHost,
        filter: DeviceFilter,
    ) -> Result<(Self, mpsc::Receiver<WatcherEvent>), HostError> {
        let raw = host.subscribe_hotplug()?;
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(watch_loop(
            raw,
            tx,
            PresenceTracker::new(filter),
            cancel.clone(),
        ));

        debug!(vendor_id = format_args!("{:#06x}", filter.vendor_id), "hotplug watcher started");
        Ok((
            Self {
                cancel,
                handle: Some(handle),
            },
            rx,
        ))
    }

    /// Stops forwarding and releases the host subscription. Idempotent.
    pub fn dispose(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("hotplug watcher disposed");
        }
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for HotplugWatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn watch_loop(
    mut raw: mpsc::Receiver<HotplugEvent>,
    tx: mpsc::Sender<WatcherEvent>,
    mut tracker: PresenceTracker,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = raw.recv() => {
                let Some(event) = event else {
                    debug!("hotplug source closed");
                    break;
                };
                if let Some(normalized) = tracker.apply(event)
                    && tx.send(normalized).await.is_err()
                {
                    break;
                }
            }
        }
    }
}
