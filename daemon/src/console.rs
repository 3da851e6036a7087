/// Line commands read from stdin.
///
/// Each line becomes a [`DaemonEvent`] for the owner task; this listener
/// never touches shared state itself. An empty line exits, as does `quit`.
use std::io::{self, BufRead, BufReader};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::Slot;
use crate::event::DaemonEvent;

pub const HELP: &str = "\
Commands:
  copy              read the selected slot now
  select <serial>   track the device with this USB serial number
  select none       stop tracking
  slot <1-8>        choose the slot to read
  sense <hf|lf>     choose the frequency band
  notify            toggle notifications
  save              save the current settings as default
  ports             list serial ports
  status            show current settings
  quit | exit       stop the daemon (an empty line also exits)";

/// Parses one input line. `Err` carries a message for the user.
pub fn parse_command(line: &str) -> Result<DaemonEvent, String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(DaemonEvent::Shutdown);
    };
    let arg = words.next();
    if words.next().is_some() {
        return Err(format!("too many arguments for '{command}'"));
    }

    match (command.to_lowercase().as_str(), arg) {
        ("copy", None) => Ok(DaemonEvent::CopyNow),
        ("select", Some(serial)) if serial.eq_ignore_ascii_case("none") => {
            Ok(DaemonEvent::SelectDevice(None))
        }
        ("select", Some(serial)) => Ok(DaemonEvent::SelectDevice(Some(serial.to_string()))),
        ("slot", Some(n)) => n
            .parse::<u8>()
            .ok()
            .and_then(Slot::new)
            .map(DaemonEvent::SetSlot)
            .ok_or_else(|| format!("slot must be 1-8, got '{n}'")),
        ("sense", Some(mode)) => mode.parse().map(DaemonEvent::SetSense),
        ("notify", None) => Ok(DaemonEvent::ToggleNotifications),
        ("save", None) => Ok(DaemonEvent::SaveAsDefault),
        ("ports", None) => Ok(DaemonEvent::ListPorts),
        ("status", None) => Ok(DaemonEvent::ShowStatus),
        ("quit" | "exit", None) => Ok(DaemonEvent::Shutdown),
        ("help" | "?", None) => Err(HELP.to_string()),
        (other, _) => Err(format!("unknown command '{other}'\n{HELP}")),
    }
}

/// Starts the stdin listener on its own OS thread.
///
/// A blocked stdin read cannot be cancelled, so it must not run on the
/// runtime's blocking pool: the runtime would wait for the next line before
/// it could shut down.
pub fn spawn_listener(tx: mpsc::Sender<DaemonEvent>) -> io::Result<JoinHandle<()>> {
    spawn_reader(BufReader::new(io::stdin()), tx)
}

fn spawn_reader<R>(input: R, tx: mpsc::Sender<DaemonEvent>) -> io::Result<JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || forward_lines(input, &tx))
}

/// Forwards parsed lines until EOF or until the receiver is gone.
///
/// EOF (e.g. stdin redirected from /dev/null) ends the listener but not the
/// daemon.
fn forward_lines<R: BufRead>(input: R, tx: &mpsc::Sender<DaemonEvent>) {
    for line in input.lines() {
        match line {
            Ok(line) => match parse_command(&line) {
                Ok(event) => {
                    if tx.blocking_send(event).is_err() {
                        return;
                    }
                }
                Err(message) => println!("{message}"),
            },
            Err(e) => {
                warn!("Failed to read stdin: {e}");
                return;
            }
        }
    }
    debug!("stdin closed; console commands disabled");
}
