//! External collaborators: the raw device backend and the auth client.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use devlink_protocol::{DeviceIdentity, ProductInfo, UsbDevice};

use crate::error::DeviceError;

/// Bidirectional byte stream opened on a device.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

/// Claims devices and opens raw transports on them.
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    /// Claims the device and opens its transport.
    async fn open(&self, device: &UsbDevice) -> Result<Box<dyn ByteStream>, DeviceError>;

    /// Closes the transport and releases the claim on the device.
    async fn close(&self, identity: &DeviceIdentity) -> Result<(), DeviceError>;
}

/// Runs the authentication handshake over a raw transport.
#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn authenticate(
        &self,
        stream: Box<dyn ByteStream>,
        credential: &Credential,
    ) -> Result<Arc<dyn DeviceSession>, DeviceError>;
}

/// An authenticated session with a device.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// Queries the liveness metric. `None` when the device reports nothing.
    async fn metric(&self) -> Result<Option<f64>, DeviceError>;

    /// Opens a path letting the device reach a local service on `port`.
    async fn establish_reverse_channel(&self, port: u16) -> Result<(), DeviceError>;

    async fn product_info(&self) -> Result<ProductInfo, DeviceError>;
}

/// Key material presented during the handshake.
#[derive(Clone)]
pub struct Credential {
    name: String,
    key: Arc<[u8]>,
}

impl Credential {
    pub fn new(name: impl Into<String>, key: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("key", &format_args!("<{} bytes>", self.key.len()))
            .finish()
    }
}
