/// Read-and-copy: fetch the slot value from the device and put it on the
/// clipboard.
use tracing::info;

use crate::clipboard::ClipboardPort;
use crate::config::{SenseMode, Slot};
use crate::device::{DeviceClient, OpenDevice};
use crate::guardian::ClipboardGuardian;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The value was read and written to the clipboard.
    Success(String),
    /// The device answered, but the slot holds no value.
    EmptySlot,
    Failure(String),
}

#[cfg(test)]
impl ReadOutcome {
    /// The value now on the clipboard, if this read wrote one.
    pub fn written(&self) -> Option<&str> {
        match self {
            ReadOutcome::Success(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// Strips NULs and surrounding whitespace/control characters, then keeps the
/// text before the first space.
pub fn normalize(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|&c| c != '\0').collect();
    cleaned
        .trim_matches(|c: char| c.is_whitespace() || c.is_control())
        .split(' ')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Opens the device on `port`, reads `slot`/`sense`, and copies the result.
///
/// The device is closed on every path. Only a successful clipboard write is
/// recorded with the guardian.
pub fn read_and_copy(
    device: &mut dyn DeviceClient,
    clipboard: &mut dyn ClipboardPort,
    guardian: &mut ClipboardGuardian,
    port: &str,
    slot: Slot,
    sense: SenseMode,
) -> ReadOutcome {
    let raw = {
        let mut open = match OpenDevice::open(device, port) {
            Ok(d) => d,
            Err(e) => return ReadOutcome::Failure(e.to_string()),
        };
        info!("Reading {slot}, {sense} from {port}");
        match open.read_named_value(slot, sense) {
            Ok(raw) => raw,
            Err(e) => return ReadOutcome::Failure(e.to_string()),
        }
    };

    let value = normalize(&raw);
    if value.is_empty() {
        return ReadOutcome::EmptySlot;
    }
    if let Err(e) = clipboard.set(&value) {
        return ReadOutcome::Failure(e.to_string());
    }
    guardian.on_write(&value);
    ReadOutcome::Success(value)
}
