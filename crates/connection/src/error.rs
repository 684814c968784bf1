use devlink_hotplug::HostError;

/// Failures reported by the device backend or the authenticated session.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("device rejected request: {0}")]
    Rejected(String),

    #[error("transport closed")]
    Closed,

    #[error("device timed out")]
    Timeout,
}

/// Errors surfaced by the connection lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// No matching device, or the user declined the selection.
    #[error("no protocol-capable device available")]
    DeviceUnavailable,

    /// Opening the transport or authenticating failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(#[source] DeviceError),

    /// A single liveness probe failed.
    #[error("readiness probe failed: {0}")]
    ProbeFailed(#[source] DeviceError),

    /// Closing the transport during cleanup failed.
    #[error("teardown failed: {0}")]
    TeardownFailed(#[source] DeviceError),

    #[error("USB host error: {0}")]
    Host(#[from] HostError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            ConnectionError::DeviceUnavailable.to_string(),
            "no protocol-capable device available"
        );

        let err = ConnectionError::HandshakeFailed(DeviceError::Rejected("bad key".into()));
        assert_eq!(err.to_string(), "handshake failed: device rejected request: bad key");

        let err = ConnectionError::TeardownFailed(DeviceError::Closed);
        assert!(err.to_string().contains("transport closed"));

        let err: ConnectionError = HostError::Closed.into();
        assert!(matches!(err, ConnectionError::Host(HostError::Closed)));
    }
}
