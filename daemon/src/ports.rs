/// Serial port enumeration.
///
/// A [`PortDescriptor`] is produced fresh on every poll; nothing about a port
/// is remembered between polls except what the monitor derives from it.
use serialport::{available_ports, SerialPortType};
use tracing::debug;

/// USB identifiers of the Chameleon RFID emulator.
pub const CHAMELEON_VID: u16 = 0x6868;
pub const CHAMELEON_PID: u16 = 0x8686;

const MAX_DESCRIPTION_CHARS: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    pub path: String,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub serial_number: Option<String>,
    pub description: String,
}

impl PortDescriptor {
    /// True for ports whose USB ids match the Chameleon.
    pub fn is_known_device(&self) -> bool {
        self.vendor_id == Some(CHAMELEON_VID) && self.product_id == Some(CHAMELEON_PID)
    }

    /// Label for a device picker entry.
    pub fn menu_label(&self) -> String {
        let vid = format_id(self.vendor_id, "N/A");
        let pid = format_id(self.product_id, "N/A");
        if self.is_known_device() {
            format!("★ {} [CHAMELEON] (VID:{vid} PID:{pid})", self.path)
        } else {
            let desc: String = self.description.chars().take(MAX_DESCRIPTION_CHARS).collect();
            format!("{} ({desc}) VID:{vid} PID:{pid}", self.path)
        }
    }
}

/// Formats a USB id as four uppercase hex digits, or `missing` when absent.
pub fn format_id(id: Option<u16>, missing: &str) -> String {
    match id {
        Some(v) => format!("{v:04X}"),
        None => missing.to_string(),
    }
}

/// Ordered identity of a port list. Two snapshots with equal signatures
/// render the same device menu.
pub fn signature(ports: &[PortDescriptor]) -> String {
    ports
        .iter()
        .map(|p| {
            format!(
                "{}_{}_{}",
                p.path,
                p.vendor_id.map(|v| v.to_string()).unwrap_or_default(),
                p.product_id.map(|v| v.to_string()).unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Source of port snapshots.
pub trait PortSource {
    /// Absence of ports is an empty list, never an error.
    fn list_ports(&mut self) -> Vec<PortDescriptor>;
}

/// Enumerates ports through the `serialport` crate.
#[derive(Debug, Default)]
pub struct SerialPortSource;

impl PortSource for SerialPortSource {
    fn list_ports(&mut self) -> Vec<PortDescriptor> {
        match available_ports() {
            Ok(ports) => ports
                .into_iter()
                .map(|p| match p.port_type {
                    SerialPortType::UsbPort(usb) => PortDescriptor {
                        path: p.port_name,
                        vendor_id: Some(usb.vid),
                        product_id: Some(usb.pid),
                        serial_number: usb.serial_number,
                        description: usb
                            .product
                            .or(usb.manufacturer)
                            .unwrap_or_else(|| "USB".to_string()),
                    },
                    SerialPortType::PciPort => bare_port(p.port_name, "PCI"),
                    SerialPortType::BluetoothPort => bare_port(p.port_name, "Bluetooth"),
                    SerialPortType::Unknown => bare_port(p.port_name, "Native"),
                })
                .collect(),
            Err(e) => {
                debug!("Port enumeration failed: {e}");
                Vec::new()
            }
        }
    }
}

fn bare_port(path: String, description: &str) -> PortDescriptor {
    PortDescriptor {
        path,
        vendor_id: None,
        product_id: None,
        serial_number: None,
        description: description.to_string(),
    }
}

#[cfg(test)]
pub(crate) fn usb_port(path: &str, serial: Option<&str>) -> PortDescriptor {
    PortDescriptor {
        path: path.to_string(),
        vendor_id: Some(CHAMELEON_VID),
        product_id: Some(CHAMELEON_PID),
        serial_number: serial.map(str::to_string),
        description: "ChameleonUltra".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_device_requires_both_ids() {
        let mut port = usb_port("/dev/ttyACM0", Some("SN"));
        assert!(port.is_known_device());
        port.product_id = Some(0x0001);
        assert!(!port.is_known_device());
        port.product_id = None;
        assert!(!port.is_known_device());
    }

    #[test]
    fn menu_label_marks_known_device() {
        let port = usb_port("/dev/ttyACM0", Some("SN"));
        assert_eq!(port.menu_label(), "★ /dev/ttyACM0 [CHAMELEON] (VID:6868 PID:8686)");
    }

    #[test]
    fn menu_label_truncates_description() {
        let port = PortDescriptor {
            path: "COM3".to_string(),
            vendor_id: None,
            product_id: Some(0x00ab),
            serial_number: None,
            description: "A very long adapter description".to_string(),
        };
        assert_eq!(port.menu_label(), "COM3 (A very long adapt) VID:N/A PID:00AB");
    }

    #[test]
    fn signature_is_order_sensitive() {
        let a = usb_port("/dev/ttyACM0", None);
        let b = bare_port("/dev/ttyS0".to_string(), "Native");
        assert_ne!(signature(&[a.clone(), b.clone()]), signature(&[b, a]));
    }

    #[test]
    fn signature_ignores_serial_and_description() {
        let a = usb_port("/dev/ttyACM0", Some("ONE"));
        let mut b = usb_port("/dev/ttyACM0", Some("TWO"));
        b.description = "other".to_string();
        assert_eq!(signature(&[a]), signature(&[b]));
    }

    #[test]
    fn signature_of_empty_list_is_empty() {
        assert_eq!(signature(&[]), "");
    }

    #[test]
    fn serial_port_source_does_not_panic() {
        // Result depends on the host's hardware; only the call is checked.
        let _ = SerialPortSource.list_ports();
    }
}
