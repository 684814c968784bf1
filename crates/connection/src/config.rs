use std::time::Duration;

use devlink_hotplug::DeviceFilter;
use devlink_protocol::{DEFAULT_PROBE_ATTEMPTS, DEFAULT_PROBE_INTERVAL, DEFAULT_REVERSE_PORT};

/// Readiness polling policy.
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Delay between liveness probes.
    pub probe_interval: Duration,
    /// Attempt at which the session counts as ready regardless of metric.
    pub max_attempts: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            probe_interval: DEFAULT_PROBE_INTERVAL,
            max_attempts: DEFAULT_PROBE_ATTEMPTS,
        }
    }
}

/// Connection manager configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub readiness: ReadinessConfig,
    /// Which devices are candidates for auto-connect.
    pub filter: DeviceFilter,
    /// Local port exposed to the device once it is ready.
    pub reverse_port: u16,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            readiness: ReadinessConfig::default(),
            filter: DeviceFilter::default(),
            reverse_port: DEFAULT_REVERSE_PORT,
        }
    }
}
