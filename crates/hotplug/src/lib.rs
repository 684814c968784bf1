//! Host USB stack integration for devlink.
//!
//! Defines the [`UsbHost`] collaborator the lifecycle coordinator consumes,
//! the vendor/interface [`DeviceFilter`], and the [`HotplugWatcher`] that
//! turns raw attach/detach notifications into [`WatcherEvent`]s.
//!
//! [`WatcherEvent`]: devlink_protocol::WatcherEvent

pub mod filter;
pub mod host;
pub mod watcher;

pub use filter::DeviceFilter;
pub use host::{HotplugEvent, UsbHost};
pub use watcher::HotplugWatcher;

/// Errors reported by the host USB stack.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("USB host unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("hotplug subscription closed")]
    Closed,
}
