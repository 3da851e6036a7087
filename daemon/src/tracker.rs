/// Turns successive port snapshots into attach/detach edges for the single
/// tracked device.
///
/// Devices are matched by USB serial number, not by path, because the path
/// can change across a replug.
use crate::ports::PortDescriptor;

/// The tracked device as seen on the most recent poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedDevice {
    pub port: String,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub serial_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected(ConnectedDevice),
}

impl ConnectionState {
    pub fn device(&self) -> Option<&ConnectedDevice> {
        match self {
            ConnectionState::Connected(d) => Some(d),
            ConnectionState::Disconnected => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.device().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Attach,
    Detach,
    /// No presence change since the previous poll.
    Steady,
}

/// Computes the next connection state from the previous one, a fresh port
/// list and the current target serial number.
///
/// The first port whose serial number matches wins. Only net changes between
/// two polls are visible: an unplug and replug that both happen between polls
/// produce no edge.
pub fn track(
    previous: &ConnectionState,
    ports: &[PortDescriptor],
    target_serial: Option<&str>,
) -> (ConnectionState, Edge) {
    let found = target_serial.and_then(|target| {
        ports
            .iter()
            .find(|p| p.serial_number.as_deref() == Some(target))
            .map(|p| ConnectedDevice {
                port: p.path.clone(),
                vendor_id: p.vendor_id,
                product_id: p.product_id,
                serial_number: target.to_string(),
            })
    });

    let edge = match (previous.device(), found.as_ref()) {
        (None, Some(_)) => Edge::Attach,
        (Some(old), Some(new)) if old.serial_number != new.serial_number => Edge::Attach,
        (Some(_), None) => Edge::Detach,
        _ => Edge::Steady,
    };

    let state = match found {
        Some(device) => ConnectionState::Connected(device),
        None => ConnectionState::Disconnected,
    };
    (state, edge)
}
