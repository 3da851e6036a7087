use crate::config::{Config, SenseMode, Slot};

/// Commands consumed by the owner task in `main`, which is the only writer of
/// the shared configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum DaemonEvent {
    /// Read the current slot value now, if the tracked device is connected.
    CopyNow,
    /// Track the device with this USB serial number, or nothing when `None`.
    SelectDevice(Option<String>),
    SetSlot(Slot),
    SetSense(SenseMode),
    ToggleNotifications,
    /// Persist the live settings as the new defaults.
    SaveAsDefault,
    /// Print the currently enumerated serial ports.
    ListPorts,
    /// Print the live settings.
    ShowStatus,
    /// The config file changed on disk and was successfully re-parsed.
    ConfigReloaded(Config),
    /// Ctrl+C or an exit command; stop the monitor and exit.
    Shutdown,
}
