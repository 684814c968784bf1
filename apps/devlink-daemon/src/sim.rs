//! Simulated USB host and device.
//!
//! Stands in for a real host stack so the daemon can exercise the whole
//! lifecycle without hardware: one authorized device that takes a few
//! probes to warm up and can be unplugged and replugged on a timer.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use devlink_connection::{AuthClient, ByteStream, Credential, DeviceBackend, DeviceError, DeviceSession};
use devlink_hotplug::{DeviceFilter, HostError, HotplugEvent, UsbHost};
use devlink_protocol::{DeviceIdentity, ProductInfo, UsbDevice, UsbInterface};

const PRODUCT_ID: u16 = 0x001f;

/// The single simulated device.
pub fn device(vendor_id: u16, interface_class: u8) -> UsbDevice {
    UsbDevice {
        identity: DeviceIdentity::new(vendor_id, PRODUCT_ID, 1, vec![2]),
        interfaces: vec![UsbInterface {
            number: 0,
            class: interface_class,
            subclass: 0x42,
            protocol: 0x01,
        }],
        product_name: Some("devlink simulated device".into()),
    }
}

pub struct SimHost {
    device: UsbDevice,
    subscriber: Mutex<Option<mpsc::Sender<HotplugEvent>>>,
}

impl SimHost {
    pub fn new(device: UsbDevice) -> Arc<Self> {
        Arc::new(Self {
            device,
            subscriber: Mutex::new(None),
        })
    }

    /// Unplugs and replugs the device every `every` until cancelled.
    pub fn spawn_replug(self: &Arc<Self>, every: Duration, cancel: CancellationToken) {
        let host = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await; // Skip immediate first tick.
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                info!(device = %host.device.identity, "simulating unplug");
                host.publish(HotplugEvent::Detached(host.device.identity.clone())).await;
                tokio::time::sleep(Duration::from_secs(1)).await;
                info!(device = %host.device.identity, "simulating replug");
                host.publish(HotplugEvent::Attached(host.device.clone())).await;
            }
        });
    }

    async fn publish(&self, event: HotplugEvent) {
        let tx = self
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(tx) = tx
            && tx.send(event).await.is_err()
        {
            debug!("hotplug subscriber gone");
        }
    }
}

#[async_trait]
impl UsbHost for SimHost {
    async fn request_device(&self, filter: &DeviceFilter) -> Result<Option<UsbDevice>, HostError> {
        Ok(filter
            .matches_vendor(&self.device)
            .then(|| self.device.clone()))
    }

    async fn authorized_devices(&self) -> Result<Vec<UsbDevice>, HostError> {
        Ok(vec![self.device.clone()])
    }

    fn subscribe_hotplug(&self) -> Result<mpsc::Receiver<HotplugEvent>, HostError> {
        let (tx, rx) = mpsc::channel(16);
        *self.subscriber.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        Ok(rx)
    }
}

/// Backend handing out in-memory transports.
pub struct SimBackend;

#[async_trait]
impl DeviceBackend for SimBackend {
    async fn open(&self, device: &UsbDevice) -> Result<Box<dyn ByteStream>, DeviceError> {
        debug!(device = %device.identity, "opening simulated transport");
        let (stream, _peer) = tokio::io::duplex(1024);
        Ok(Box::new(stream))
    }

    async fn close(&self, identity: &DeviceIdentity) -> Result<(), DeviceError> {
        debug!(device = %identity, "closing simulated transport");
        Ok(())
    }
}

/// Accepts the one key the simulated device was paired with and returns a
/// fresh warming-up device.
pub struct SimAuth {
    pub warmup_probes: u32,
    pub paired_key: Vec<u8>,
}

#[async_trait]
impl AuthClient for SimAuth {
    async fn authenticate(
        &self,
        _stream: Box<dyn ByteStream>,
        credential: &Credential,
    ) -> Result<Arc<dyn DeviceSession>, DeviceError> {
        if credential.key() != self.paired_key.as_slice() {
            return Err(DeviceError::Rejected(format!(
                "host {} is not paired",
                credential.name()
            )));
        }
        debug!(host = credential.name(), "simulated handshake accepted");
        Ok(Arc::new(SimDevice {
            warmup_probes: self.warmup_probes,
            probes: AtomicU32::new(0),
        }))
    }
}

struct SimDevice {
    warmup_probes: u32,
    probes: AtomicU32,
}

#[async_trait]
impl DeviceSession for SimDevice {
    async fn metric(&self) -> Result<Option<f64>, DeviceError> {
        let n = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.warmup_probes {
            return Ok(None);
        }
        // Battery-like reading, slowly draining.
        Ok(Some(100.0 - f64::from(n - self.warmup_probes).min(99.0)))
    }

    async fn establish_reverse_channel(&self, port: u16) -> Result<(), DeviceError> {
        debug!(port, "simulated reverse channel up");
        Ok(())
    }

    async fn product_info(&self) -> Result<ProductInfo, DeviceError> {
        Ok(ProductInfo {
            manufacturer: "devlink".into(),
            model: "Simulated Device".into(),
            serial: "SIM-0001".into(),
            firmware_version: Some(env!("CARGO_PKG_VERSION").into()),
        })
    }
}
