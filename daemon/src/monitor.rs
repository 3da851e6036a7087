use tokio::sync::watch;
use tracing::info;

use crate::clipboard::ClipboardPort;
use crate::config::ConfigHandle;
use crate::device::DeviceClient;
use crate::guardian::ClipboardGuardian;
use crate::ports::{signature, PortSource};
use crate::reader::{self, ReadOutcome};
use crate::status::{id_info, Level, Notifier, StatusSink};
use crate::tracker::{track, ConnectionState, Edge};
use crate::trigger::{should_read, ManualTrigger};

/// Polls the serial port list and reacts to the tracked device appearing or
/// disappearing.
///
/// Owns the connection state, the clipboard and the guardian; nothing else
/// touches them, so none of them need locking.
pub struct Monitor<P, D, C, S> {
    ports: P,
    device: D,
    clipboard: C,
    sink: S,
    config: ConfigHandle,
    trigger: ManualTrigger,
    state: ConnectionState,
    guardian: ClipboardGuardian,
    last_signature: Option<String>,
}

impl<P, D, C, S> Monitor<P, D, C, S>
where
    P: PortSource,
    D: DeviceClient,
    C: ClipboardPort,
    S: StatusSink + Notifier,
{
    pub fn new(
        ports: P,
        device: D,
        clipboard: C,
        sink: S,
        config: ConfigHandle,
        trigger: ManualTrigger,
    ) -> Self {
        Self {
            ports,
            device,
            clipboard,
            sink,
            config,
            trigger,
            state: ConnectionState::Disconnected,
            guardian: ClipboardGuardian::new(),
            last_signature: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// One poll. Returns the outcome of the read, if one ran.
    pub fn tick(&mut self) -> Option<ReadOutcome> {
        let ports = self.ports.list_ports();
        let current_signature = signature(&ports);
        if self.last_signature.as_deref() != Some(current_signature.as_str()) {
            self.sink.ports_changed(&ports);
            self.last_signature = Some(current_signature);
        }

        let target = self.config.target_serial();
        let (next, edge) = track(&self.state, &ports, target.as_deref());
        // Taken every tick so a request made while disconnected is dropped.
        let manual = self.trigger.take();

        match (edge, next.device()) {
            (Edge::Attach, Some(device)) => {
                info!("Device connected: {} (S/N {})", device.port, device.serial_number);
                self.sink.set_connected(device);
                self.guardian.on_attach(&mut self.clipboard);
            }
            (Edge::Detach, _) => {
                info!("Device disconnected");
                self.sink.set_disconnected();
                self.guardian.on_detach(&mut self.clipboard);
            }
            _ => {}
        }
        self.state = next;

        if should_read(edge, self.state.is_connected(), manual) {
            self.read_and_copy()
        } else {
            None
        }
    }

    fn read_and_copy(&mut self) -> Option<ReadOutcome> {
        let device = self.state.device()?.clone();
        self.sink.set_reading(&device);

        let outcome = reader::read_and_copy(
            &mut self.device,
            &mut self.clipboard,
            &mut self.guardian,
            &device.port,
            self.config.slot(),
            self.config.sense(),
        );

        let ids = id_info(&device);
        match &outcome {
            ReadOutcome::Success(value) => {
                self.sink.copied(value);
                self.sink.notify(&format!("Copied: {value}\n{ids}"), Level::Info);
            }
            ReadOutcome::EmptySlot => {
                self.sink.notify(&format!("Slot is empty. {ids}"), Level::Warning);
            }
            ReadOutcome::Failure(reason) => {
                self.sink
                    .notify(&format!("Communication error: {reason} {ids}"), Level::Error);
            }
        }
        self.sink.set_connected(&device);
        Some(outcome)
    }

    /// Polls until `stop` becomes `true` or its sender is dropped.
    ///
    /// The stop signal is checked before each poll; a read in progress always
    /// finishes first. The delay between polls starts after the previous poll
    /// completes. Requires the multi-threaded runtime, since each poll blocks.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!("Starting port monitoring...");
        self.sink.set_disconnected();

        loop {
            if *stop.borrow() {
                break;
            }
            tokio::task::block_in_place(|| {
                self.tick();
            });

            let delay = self.config.poll_interval();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Monitoring stopped");
    }
}
