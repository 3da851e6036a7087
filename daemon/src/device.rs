/// Device client used to fetch a slot's stored value.
///
/// The vendor command protocol lives outside this daemon: the default client
/// checks that the port can be opened and then hands the request to an
/// external helper program configured under `[reader]`.
use std::io::Read;
use std::ops::{Deref, DerefMut};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::config::{ConfigHandle, SenseMode, Slot};

const PROBE_BAUD_RATE: u32 = 115_200;
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);
/// Pause between opening the port and the first request.
const SETTLE_DELAY: Duration = Duration::from_millis(300);
const WAIT_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("cannot open {port}: {reason}")]
    Connection { port: String, reason: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

pub trait DeviceClient {
    fn open(&mut self, port: &str) -> Result<(), DeviceError>;
    fn read_named_value(&mut self, slot: Slot, sense: SenseMode) -> Result<String, DeviceError>;
    /// Idempotent; safe to call whether or not `open` succeeded.
    fn close(&mut self);
}

/// An open device that is closed when dropped, including when opening failed.
pub struct OpenDevice<'a, D: DeviceClient + ?Sized> {
    client: &'a mut D,
}

impl<'a, D: DeviceClient + ?Sized> OpenDevice<'a, D> {
    pub fn open(client: &'a mut D, port: &str) -> Result<Self, DeviceError> {
        let mut device = Self { client };
        device.client.open(port)?;
        Ok(device)
    }
}

impl<D: DeviceClient + ?Sized> Deref for OpenDevice<'_, D> {
    type Target = D;

    fn deref(&self) -> &D {
        &*self.client
    }
}

impl<D: DeviceClient + ?Sized> DerefMut for OpenDevice<'_, D> {
    fn deref_mut(&mut self) -> &mut D {
        &mut *self.client
    }
}

impl<D: DeviceClient + ?Sized> Drop for OpenDevice<'_, D> {
    fn drop(&mut self) {
        self.client.close();
    }
}

/// Runs the configured helper program for each read.
///
/// Helper settings are read from the live configuration on every request, so
/// a reloaded config takes effect on the next read.
pub struct CommandDeviceClient {
    config: ConfigHandle,
    settle_delay: Duration,
    port: Option<String>,
}

impl CommandDeviceClient {
    pub fn new(config: ConfigHandle) -> Self {
        Self {
            config,
            settle_delay: SETTLE_DELAY,
            port: None,
        }
    }
}

impl DeviceClient for CommandDeviceClient {
    fn open(&mut self, port: &str) -> Result<(), DeviceError> {
        // The probe handle is dropped straight away so the helper can open
        // the port itself.
        serialport::new(port, PROBE_BAUD_RATE)
            .timeout(PROBE_TIMEOUT)
            .open()
            .map_err(|e| DeviceError::Connection {
                port: port.to_string(),
                reason: e.to_string(),
            })?;
        std::thread::sleep(self.settle_delay);
        self.port = Some(port.to_string());
        Ok(())
    }

    fn read_named_value(&mut self, slot: Slot, sense: SenseMode) -> Result<String, DeviceError> {
        let port = self
            .port
            .as_deref()
            .ok_or_else(|| DeviceError::Protocol("device is not open".to_string()))?;
        let reader = self.config.reader();
        let args = expand_args(&reader.args, port, slot, sense);
        debug!("Running {} {:?}", reader.program, args);
        run_with_timeout(&reader.program, &args, reader.effective_timeout())
    }

    fn close(&mut self) {
        self.port = None;
    }
}

/// Substitutes `{port}`, `{slot}` (0-based wire index) and `{sense}` in `args`.
pub fn expand_args(args: &[String], port: &str, slot: Slot, sense: SenseMode) -> Vec<String> {
    args.iter()
        .map(|a| {
            a.replace("{port}", port)
                .replace("{slot}", &slot.index().to_string())
                .replace("{sense}", sense.as_arg())
        })
        .collect()
}

fn run_with_timeout(program: &str, args: &[String], timeout: Duration) -> Result<String, DeviceError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| DeviceError::Protocol(format!("failed to start {program}: {e}")))?;

    // Both pipes are drained while the helper runs so a large response
    // cannot fill the pipe buffer and stall it.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                // Readers are left detached: a grandchild may still hold the pipes.
                return Err(DeviceError::Timeout(timeout));
            }
            Ok(None) => std::thread::sleep(WAIT_POLL),
            Err(e) => return Err(DeviceError::Protocol(format!("failed to wait for {program}: {e}"))),
        }
    };

    let stdout = collect(stdout).map_err(|e| DeviceError::Protocol(format!("unreadable response: {e}")))?;
    let stderr = collect(stderr).unwrap_or_default();

    if !status.success() {
        let detail = stderr.trim();
        return Err(DeviceError::Protocol(if detail.is_empty() {
            format!("{program} exited with {status}")
        } else {
            format!("{program} exited with {status}: {detail}")
        }));
    }
    Ok(stdout)
}

type PipeReader = JoinHandle<std::io::Result<String>>;

fn drain<R: Read + Send + 'static>(mut pipe: R) -> PipeReader {
    std::thread::spawn(move || {
        let mut text = String::new();
        pipe.read_to_string(&mut text)?;
        Ok(text)
    })
}

fn collect(reader: Option<PipeReader>) -> std::io::Result<String> {
    match reader {
        Some(handle) => handle
            .join()
            .unwrap_or_else(|_| Err(std::io::Error::other("pipe reader panicked"))),
        None => Ok(String::new()),
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// Scripted device client that counts open/close calls.
    #[derive(Debug)]
    pub struct FakeDevice {
        pub response: Result<String, DeviceError>,
        pub fail_open: bool,
        pub opens: usize,
        pub closes: usize,
        pub reads: usize,
        pub last_request: Option<(String, Slot, SenseMode)>,
        port: Option<String>,
    }

    impl FakeDevice {
        pub fn returning(value: &str) -> Self {
            Self::with_response(Ok(value.to_string()))
        }

        pub fn with_response(response: Result<String, DeviceError>) -> Self {
            Self {
                response,
                fail_open: false,
                opens: 0,
                closes: 0,
                reads: 0,
                last_request: None,
                port: None,
            }
        }
    }

    impl DeviceClient for FakeDevice {
        fn open(&mut self, port: &str) -> Result<(), DeviceError> {
            self.opens += 1;
            if self.fail_open {
                return Err(DeviceError::Connection {
                    port: port.to_string(),
                    reason: "permission denied".to_string(),
                });
            }
            self.port = Some(port.to_string());
            Ok(())
        }

        fn read_named_value(&mut self, slot: Slot, sense: SenseMode) -> Result<String, DeviceError> {
            self.reads += 1;
            let port = self.port.clone().unwrap_or_default();
            self.last_request = Some((port, slot, sense));
            self.response.clone()
        }

        fn close(&mut self) {
            self.closes += 1;
            self.port = None;
        }
    }
}
