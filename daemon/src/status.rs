use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

use crate::config::ConfigHandle;
use crate::ports::{format_id, PortDescriptor};
use crate::tracker::ConnectedDevice;

/// Current connection state as shown to the user.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    /// The tracked device is not present, or no device is selected.
    Disconnected,
    /// The tracked device is present and idle.
    Connected,
    /// A slot read is in progress.
    Reading,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
}

/// The tracked device, as written to the status file.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct DeviceStatus {
    pub port: String,
    pub serial: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u16>,
}

/// One entry of the device picker.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PortEntry {
    pub path: String,
    pub label: String,
    pub known_device: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Notification {
    pub message: String,
    pub level: Level,
    /// RFC 3339 timestamp.
    pub at: String,
}

/// Runtime status written by the daemon to `status.toml`.
/// Front ends read this file to render an icon, title and device menu.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: DaemonState,
    /// One-line summary suitable for a tray tooltip.
    pub title: String,
    /// Last value copied to the clipboard, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_copied: Option<String>,
    /// RFC 3339 timestamp of the last copy, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_copied_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceStatus>,
    /// Most recent user-facing notification. Only kept while notifications are on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
    #[serde(default)]
    pub ports: Vec<PortEntry>,
}

impl DaemonStatus {
    /// Constructs the initial disconnected status on daemon startup.
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: DaemonState::Disconnected,
            title: "Starting...".to_string(),
            last_copied: None,
            last_copied_at: None,
            device: None,
            notification: None,
            ports: Vec::new(),
        }
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// Errors are logged rather than returned: a status write failure should
/// never stop the monitor.
pub fn write_status(path: &Path, status: &DaemonStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            error!("Failed to create directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                error!("Failed to write status file: {e}");
            }
        }
        Err(e) => error!("Failed to serialize status: {e}"),
    }
}

/// Observable connection status. Calls must return promptly.
pub trait StatusSink {
    fn set_connected(&mut self, device: &ConnectedDevice);
    fn set_reading(&mut self, device: &ConnectedDevice);
    fn set_disconnected(&mut self);
    fn copied(&mut self, value: &str);
    /// The enumerated port list changed; a device menu should be rebuilt.
    fn ports_changed(&mut self, ports: &[PortDescriptor]);
}

/// Best-effort user notifications.
pub trait Notifier {
    fn notify(&mut self, message: &str, level: Level);
}

/// Tooltip for a connected device, e.g. `/dev/ttyACM0 [VID:6868 PID:8686]`.
pub fn connected_title(device: &ConnectedDevice, notifications: bool) -> String {
    let silent = if notifications { "" } else { " (Silent)" };
    format!(
        "{} [VID:{} PID:{}]{silent}",
        device.port,
        format_id(device.vendor_id, "?"),
        format_id(device.product_id, "?")
    )
}

/// Id summary used in notifications, e.g. `(VID: 6868, PID: 8686)`.
pub fn id_info(device: &ConnectedDevice) -> String {
    format!(
        "(VID: {}, PID: {})",
        format_id(device.vendor_id, "?"),
        format_id(device.product_id, "?")
    )
}

/// Status and notification sink backed by the status file.
pub struct StatusFile {
    path: PathBuf,
    config: ConfigHandle,
    status: DaemonStatus,
    device: Option<ConnectedDevice>,
}

impl StatusFile {
    /// Writes the initial status immediately.
    pub fn new(path: PathBuf, config: ConfigHandle) -> Self {
        let sink = Self {
            path,
            config,
            status: DaemonStatus::new(),
            device: None,
        };
        sink.flush();
        sink
    }

    #[cfg(test)]
    pub fn status(&self) -> &DaemonStatus {
        &self.status
    }

    fn flush(&self) {
        write_status(&self.path, &self.status);
    }

    fn waiting_title(&self) -> String {
        match self.config.target_serial() {
            Some(serial) => format!("Waiting for device S/N {serial}"),
            None => "No device selected".to_string(),
        }
    }

    /// Recomputes the title after a settings change. A read in progress
    /// keeps its title; the monitor resets it when the read ends.
    pub fn refresh_title(&mut self) {
        let title = match (&self.status.state, &self.device) {
            (DaemonState::Connected, Some(device)) => {
                connected_title(device, self.config.notifications_enabled())
            }
            (DaemonState::Disconnected, _) => self.waiting_title(),
            _ => return,
        };
        if title != self.status.title {
            self.status.title = title;
            self.flush();
        }
    }
}

impl StatusSink for StatusFile {
    fn set_connected(&mut self, device: &ConnectedDevice) {
        self.status.state = DaemonState::Connected;
        self.status.title = connected_title(device, self.config.notifications_enabled());
        self.device = Some(device.clone());
        self.status.device = Some(DeviceStatus {
            port: device.port.clone(),
            serial: device.serial_number.clone(),
            vid: device.vendor_id,
            pid: device.product_id,
        });
        self.flush();
    }

    fn set_reading(&mut self, device: &ConnectedDevice) {
        self.status.state = DaemonState::Reading;
        self.status.title = format!("Reading... {}", id_info(device));
        self.flush();
    }

    fn set_disconnected(&mut self) {
        self.status.state = DaemonState::Disconnected;
        self.status.title = self.waiting_title();
        self.status.device = None;
        self.device = None;
        self.flush();
    }

    fn copied(&mut self, value: &str) {
        self.status.last_copied = Some(value.to_string());
        self.status.last_copied_at = Some(chrono::Local::now().to_rfc3339());
        self.flush();
    }

    fn ports_changed(&mut self, ports: &[PortDescriptor]) {
        self.status.ports = ports
            .iter()
            .map(|p| PortEntry {
                path: p.path.clone(),
                label: p.menu_label(),
                known_device: p.is_known_device(),
                serial: p.serial_number.clone(),
            })
            .collect();
        self.flush();
    }
}

impl Notifier for StatusFile {
    fn notify(&mut self, message: &str, level: Level) {
        match level {
            Level::Info => info!("{message}"),
            Level::Warning => warn!("{message}"),
            Level::Error => error!("{message}"),
        }
        if self.config.notifications_enabled() {
            self.status.notification = Some(Notification {
                message: message.to_string(),
                level,
                at: chrono::Local::now().to_rfc3339(),
            });
            self.flush();
        }
    }
}

/// One [`StatusFile`] shared between the monitor and the owner task, so
/// settings changes and their notifications land in the same file.
#[derive(Clone)]
pub struct SharedStatus {
    inner: Arc<Mutex<StatusFile>>,
}

impl SharedStatus {
    pub fn new(file: StatusFile) -> Self {
        Self {
            inner: Arc::new(Mutex::new(file)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatusFile> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn refresh_title(&self) {
        self.lock().refresh_title();
    }
}

impl StatusSink for SharedStatus {
    fn set_connected(&mut self, device: &ConnectedDevice) {
        self.lock().set_connected(device);
    }

    fn set_reading(&mut self, device: &ConnectedDevice) {
        self.lock().set_reading(device);
    }

    fn set_disconnected(&mut self) {
        self.lock().set_disconnected();
    }

    fn copied(&mut self, value: &str) {
        self.lock().copied(value);
    }

    fn ports_changed(&mut self, ports: &[PortDescriptor]) {
        self.lock().ports_changed(ports);
    }
}

impl Notifier for SharedStatus {
    fn notify(&mut self, message: &str, level: Level) {
        self.lock().notify(message, level);
    }
}
