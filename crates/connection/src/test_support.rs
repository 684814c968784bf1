//! In-crate test doubles for the backend, auth client and host.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use devlink_hotplug::{DeviceFilter, HostError, HotplugEvent, UsbHost};
use devlink_protocol::{DeviceIdentity, ProductInfo, UsbDevice, UsbInterface};

use crate::backend::{AuthClient, ByteStream, Credential, DeviceBackend, DeviceSession};
use crate::config::ConnectionConfig;
use crate::error::DeviceError;
use crate::manager::ConnectionManager;
use crate::types::ConnectionEvent;

pub(crate) type ProbeScript = Vec<Result<Option<f64>, DeviceError>>;

pub(crate) fn identity(port: u8) -> DeviceIdentity {
    DeviceIdentity::new(0x2ca3, 0x001f, 1, vec![port])
}

/// A vendor device; `capable` devices expose the vendor-specific class.
pub(crate) fn usb_device(port: u8, capable: bool) -> UsbDevice {
    UsbDevice {
        identity: identity(port),
        interfaces: vec![UsbInterface {
            number: 0,
            class: if capable { 0xFF } else { 0x08 },
            subclass: 0,
            protocol: 0,
        }],
        product_name: Some("Test Headset".into()),
    }
}

pub(crate) fn drain(rx: &mut mpsc::Receiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Lets spawned tasks run until they block.
pub(crate) async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Open/closed gate used to hold an async call mid-flight.
struct Gate(watch::Sender<bool>);

impl Gate {
    fn new() -> Self {
        Self(watch::channel(true).0)
    }

    fn hold(&self) {
        self.0.send_replace(false);
    }

    fn release(&self) {
        self.0.send_replace(true);
    }

    async fn pass(&self) {
        let mut rx = self.0.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

pub(crate) struct MockBackend {
    opens: AtomicUsize,
    closes: AtomicUsize,
    fail_open: AtomicBool,
    fail_close: AtomicBool,
    gate: Gate,
}

impl MockBackend {
    fn new() -> Self {
        Self {
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            fail_open: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            gate: Gate::new(),
        }
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_next_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    pub(crate) fn hold_opens(&self) {
        self.gate.hold();
    }

    pub(crate) fn release_opens(&self) {
        self.gate.release();
    }
}

#[async_trait]
impl DeviceBackend for MockBackend {
    async fn open(&self, _device: &UsbDevice) -> Result<Box<dyn ByteStream>, DeviceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.gate.pass().await;
        if self.fail_open.swap(false, Ordering::SeqCst) {
            return Err(DeviceError::Rejected("interface busy".into()));
        }
        let (stream, _peer) = tokio::io::duplex(64);
        Ok(Box::new(stream))
    }

    async fn close(&self, _identity: &DeviceIdentity) -> Result<(), DeviceError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(DeviceError::Closed);
        }
        Ok(())
    }
}

/// Authenticated session answering probes from a script. An exhausted
/// script reports no metric.
pub(crate) struct MockDevice {
    script: Mutex<VecDeque<Result<Option<f64>, DeviceError>>>,
    probes: AtomicUsize,
    gate: Gate,
    reverse_ports: Mutex<Vec<u16>>,
    fail_product_info: AtomicBool,
}

impl MockDevice {
    pub(crate) fn new(script: ProbeScript) -> Self {
        Self {
            script: Mutex::new(script.into()),
            probes: AtomicUsize::new(0),
            gate: Gate::new(),
            reverse_ports: Mutex::new(Vec::new()),
            fail_product_info: AtomicBool::new(false),
        }
    }

    /// Probes started so far, including ones still in flight.
    pub(crate) fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub(crate) fn hold_probes(&self) {
        self.gate.hold();
    }

    pub(crate) fn release_probes(&self) {
        self.gate.release();
    }

    pub(crate) fn reverse_ports(&self) -> Vec<u16> {
        self.reverse_ports.lock().unwrap().clone()
    }

    pub(crate) fn fail_product_info(&self) {
        self.fail_product_info.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceSession for MockDevice {
    async fn metric(&self) -> Result<Option<f64>, DeviceError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.gate.pass().await;
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or(Ok(None))
    }

    async fn establish_reverse_channel(&self, port: u16) -> Result<(), DeviceError> {
        self.reverse_ports.lock().unwrap().push(port);
        Ok(())
    }

    async fn product_info(&self) -> Result<ProductInfo, DeviceError> {
        if self.fail_product_info.load(Ordering::SeqCst) {
            return Err(DeviceError::Timeout);
        }
        Ok(ProductInfo {
            manufacturer: "Acme".into(),
            model: "Test Headset".into(),
            serial: "SN0001".into(),
            firmware_version: Some("1.2.0".into()),
        })
    }
}

/// Hands out the same [`MockDevice`] for every successful handshake.
pub(crate) struct MockAuth {
    device: Arc<MockDevice>,
    fail: AtomicBool,
}

impl MockAuth {
    pub(crate) fn device(&self) -> &Arc<MockDevice> {
        &self.device
    }

    pub(crate) fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthClient for MockAuth {
    async fn authenticate(
        &self,
        _stream: Box<dyn ByteStream>,
        _credential: &Credential,
    ) -> Result<Arc<dyn DeviceSession>, DeviceError> {
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(DeviceError::Rejected("key not accepted".into()));
        }
        Ok(self.device.clone())
    }
}

/// Host with a fixed authorized-device list and scriptable hotplug.
pub(crate) struct MockHost {
    authorized: Mutex<Vec<UsbDevice>>,
    requested: Mutex<Option<UsbDevice>>,
    listings: AtomicUsize,
    fail_subscribe: AtomicBool,
    subscribers: Mutex<Vec<mpsc::Sender<HotplugEvent>>>,
}

impl MockHost {
    pub(crate) fn new(authorized: Vec<UsbDevice>) -> Arc<Self> {
        Arc::new(Self {
            authorized: Mutex::new(authorized),
            requested: Mutex::new(None),
            listings: AtomicUsize::new(0),
            fail_subscribe: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn set_authorized(&self, devices: Vec<UsbDevice>) {
        *self.authorized.lock().unwrap() = devices;
    }

    /// Device returned from the next selection prompt; `None` declines.
    pub(crate) fn set_requested(&self, device: Option<UsbDevice>) {
        *self.requested.lock().unwrap() = device;
    }

    pub(crate) fn fail_subscribe(&self) {
        self.fail_subscribe.store(true, Ordering::SeqCst);
    }

    /// Calls to `authorized_devices`.
    pub(crate) fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    pub(crate) fn subscriptions(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Subscriptions whose receiver is still alive.
    pub(crate) fn live_subscriptions(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    pub(crate) async fn attach(&self, device: UsbDevice) {
        self.publish(HotplugEvent::Attached(device)).await;
    }

    pub(crate) async fn detach(&self, identity: DeviceIdentity) {
        self.publish(HotplugEvent::Detached(identity)).await;
    }

    async fn publish(&self, event: HotplugEvent) {
        let latest = self.subscribers.lock().unwrap().last().cloned();
        if let Some(tx) = latest {
            let _ = tx.send(event).await;
        }
    }
}

#[async_trait]
impl UsbHost for MockHost {
    async fn request_device(&self, _filter: &DeviceFilter) -> Result<Option<UsbDevice>, HostError> {
        Ok(self.requested.lock().unwrap().take())
    }

    async fn authorized_devices(&self) -> Result<Vec<UsbDevice>, HostError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        Ok(self.authorized.lock().unwrap().clone())
    }

    fn subscribe_hotplug(&self) -> Result<mpsc::Receiver<HotplugEvent>, HostError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(HostError::Unavailable("no hotplug support".into()));
        }
        let (tx, rx) = mpsc::channel(16);
        self.subscribers.lock().unwrap().push(tx);
        Ok(rx)
    }
}

/// A manager wired to fresh mocks, with its event receiver taken.
pub(crate) struct Harness {
    pub(crate) manager: ConnectionManager,
    pub(crate) backend: Arc<MockBackend>,
    pub(crate) auth: Arc<MockAuth>,
    pub(crate) events: mpsc::Receiver<ConnectionEvent>,
}

impl Harness {
    pub(crate) fn new(script: ProbeScript) -> Self {
        Self::with_config(script, |_| {})
    }

    pub(crate) fn with_config(script: ProbeScript, tweak: impl FnOnce(&mut ConnectionConfig)) -> Self {
        let mut config = ConnectionConfig::default();
        tweak(&mut config);

        let backend = Arc::new(MockBackend::new());
        let auth = Arc::new(MockAuth {
            device: Arc::new(MockDevice::new(script)),
            fail: AtomicBool::new(false),
        });
        let manager = ConnectionManager::new(
            backend.clone(),
            auth.clone(),
            Credential::new("test-host", vec![0u8; 32]),
            config,
        );
        let events = manager.take_events().unwrap();

        Self {
            manager,
            backend,
            auth,
            events,
        }
    }
}
