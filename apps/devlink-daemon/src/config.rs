//! Daemon configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/devlink/daemon.toml`
//! - Windows: `%APPDATA%/devlink/daemon.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use devlink_connection::{ConnectionConfig, ReadinessConfig};
use devlink_hotplug::DeviceFilter;
use devlink_protocol::{
    DEFAULT_PROBE_ATTEMPTS, DEFAULT_PROBE_INTERVAL, DEFAULT_REVERSE_PORT, DEFAULT_VENDOR_ID,
    VENDOR_SPECIFIC_CLASS,
};

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name presented to devices during the handshake.
    #[serde(default = "default_host_name")]
    pub host_name: String,

    /// Seconds between readiness probes.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Probe attempt at which a silent device counts as ready.
    #[serde(default = "default_max_attempts")]
    pub max_probe_attempts: u32,

    /// USB vendor id of candidate devices.
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u16,

    /// Interface class marking a protocol-capable device.
    #[serde(default = "default_interface_class")]
    pub interface_class: u8,

    /// Local port exposed to the device once it is ready.
    #[serde(default = "default_reverse_port")]
    pub reverse_port: u16,

    /// Whether this instance may auto-connect.
    #[serde(default = "default_true")]
    pub leader: bool,

    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Settings for the built-in simulated device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Probes answered without a metric before the device warms up.
    #[serde(default = "default_warmup_probes")]
    pub warmup_probes: u32,

    /// Seconds between simulated unplug/replug cycles (0 = never).
    #[serde(default)]
    pub replug_secs: u64,
}

fn default_host_name() -> String {
    "devlink-daemon".into()
}

fn default_probe_interval() -> u64 {
    DEFAULT_PROBE_INTERVAL.as_secs()
}

fn default_max_attempts() -> u32 {
    DEFAULT_PROBE_ATTEMPTS
}

fn default_vendor_id() -> u16 {
    DEFAULT_VENDOR_ID
}

fn default_interface_class() -> u8 {
    VENDOR_SPECIFIC_CLASS
}

fn default_reverse_port() -> u16 {
    DEFAULT_REVERSE_PORT
}

fn default_true() -> bool {
    true
}

fn default_warmup_probes() -> u32 {
    1
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            warmup_probes: default_warmup_probes(),
            replug_secs: 0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host_name: default_host_name(),
            probe_interval_secs: default_probe_interval(),
            max_probe_attempts: default_max_attempts(),
            vendor_id: default_vendor_id(),
            interface_class: default_interface_class(),
            reverse_port: default_reverse_port(),
            leader: default_true(),
            simulator: SimulatorConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Policy handed to the connection manager.
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            readiness: ReadinessConfig {
                probe_interval: Duration::from_secs(self.probe_interval_secs.max(1)),
                max_attempts: self.max_probe_attempts.max(1),
            },
            filter: DeviceFilter {
                vendor_id: self.vendor_id,
                interface_class: self.interface_class,
            },
            reverse_port: self.reverse_port,
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("devlink")
            .join("daemon.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("devlink").join("daemon.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/devlink/daemon.toml"))
    }
}
