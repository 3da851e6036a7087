mod clipboard;
mod config;
mod console;
mod device;
mod event;
mod guardian;
mod monitor;
mod paths;
mod ports;
mod reader;
mod status;
mod tracker;
mod trigger;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::clipboard::ArboardClipboard;
use crate::config::{Config, ConfigHandle};
use crate::device::CommandDeviceClient;
use crate::event::DaemonEvent;
use crate::monitor::Monitor;
use crate::ports::{PortSource, SerialPortSource};
use crate::status::{Level, Notifier, SharedStatus, StatusFile};
use crate::trigger::{select_target, ManualTrigger};

/// Copies a slot nickname from a USB RFID tool to the clipboard whenever the
/// tool is plugged in, and puts the previous clipboard back on unplug.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Config file (defaults to the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Status file written for front ends.
    #[arg(long)]
    status: Option<PathBuf>,
    /// Override the poll interval in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,
    /// Print the serial ports and exit.
    #[arg(long)]
    list_ports: bool,
}

impl Args {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(ms) = self.interval_ms {
            config.monitor.poll_interval_ms = ms;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    if args.list_ports {
        print_ports(None);
        return Ok(());
    }

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = args.config.clone().unwrap_or_else(paths::config_file_path);
    let status_path = args.status.clone().unwrap_or_else(paths::status_file_path);
    if let Some(dir) = config_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
    }

    let mut initial_config = config::load_or_default(&config_path).unwrap_or_else(|e| {
        error!("Config error (using defaults): {e:#}");
        Config::default()
    });
    args.apply_overrides(&mut initial_config);
    info!(
        "Configuration loaded. Target S/N: {}",
        initial_config.device.target_serial.as_deref().unwrap_or("none")
    );
    let config = ConfigHandle::new(initial_config);
    let trigger = ManualTrigger::new();

    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(32);
    let (stop_tx, stop_rx) = watch::channel(false);

    // ── Background tasks ──────────────────────────────────────────────────────
    let mut status = SharedStatus::new(StatusFile::new(status_path, config.clone()));
    let monitor = Monitor::new(
        SerialPortSource,
        CommandDeviceClient::new(config.clone()),
        ArboardClipboard::new(),
        status.clone(),
        config.clone(),
        trigger.clone(),
    );
    let monitor_handle = tokio::spawn(monitor.run(stop_rx));

    tokio::spawn(config::watch_config(config_path.clone(), event_tx.clone()));
    // Kept off the runtime: a pending stdin read would otherwise hold up
    // shutdown until the next line arrives.
    if let Err(e) = console::spawn_listener(event_tx.clone()) {
        warn!("Console commands unavailable: {e}");
    }

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }

    println!("tagclip-daemon v{} running", env!("CARGO_PKG_VERSION"));
    println!("Press ENTER to exit, or type 'help' for commands.");

    // ── Event loop ────────────────────────────────────────────────────────────
    // Sole writer of the shared configuration.
    while let Some(evt) = event_rx.recv().await {
        match evt {
            DaemonEvent::CopyNow => {
                info!("Manual copy requested");
                trigger.raise();
            }

            DaemonEvent::SelectDevice(serial) => {
                let message = match &serial {
                    Some(sn) => format!("New device selected: S/N {sn}"),
                    None => "Device selection cleared".to_string(),
                };
                select_target(&config, &trigger, serial);
                status.refresh_title();
                status.notify(&message, Level::Info);
            }

            DaemonEvent::SetSlot(slot) => {
                info!("Slot changed to: {slot}");
                config.set_slot(slot);
            }

            DaemonEvent::SetSense(sense) => {
                info!("Frequency changed to: {sense}");
                config.set_sense(sense);
            }

            DaemonEvent::ToggleNotifications => {
                let on = config.toggle_notifications();
                info!("Notifications: {}", if on { "ON" } else { "OFF" });
                status.refresh_title();
            }

            DaemonEvent::SaveAsDefault => match config::save(&config_path, &config.snapshot()) {
                Ok(()) => status.notify("Settings saved as default", Level::Info),
                Err(e) => status.notify(&format!("Error saving settings: {e:#}"), Level::Error),
            },

            DaemonEvent::ListPorts => print_ports(config.target_serial().as_deref()),

            DaemonEvent::ShowStatus => {
                let c = config.snapshot();
                println!(
                    "Target S/N: {}\n{}, {}\nNotifications: {}",
                    c.device.target_serial.as_deref().unwrap_or("none"),
                    c.device.effective_slot(),
                    c.device.sense,
                    if c.device.notifications { "ON" } else { "OFF" }
                );
            }

            DaemonEvent::ConfigReloaded(mut new_config) => {
                info!("Config reloaded");
                args.apply_overrides(&mut new_config);
                config.apply(new_config);
                status.refresh_title();
            }

            DaemonEvent::Shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    let _ = stop_tx.send(true);
    if let Err(e) = monitor_handle.await {
        warn!("Monitor task ended abnormally: {e}");
    }
    Ok(())
}

/// Prints the device picker, marking the tracked device.
fn print_ports(target: Option<&str>) {
    let ports = SerialPortSource.list_ports();
    if ports.is_empty() {
        println!("No devices found");
        return;
    }
    for p in &ports {
        let selected = target.is_some() && p.serial_number.as_deref() == target;
        let mark = if selected { "(*)" } else { "( )" };
        let serial = p.serial_number.as_deref().unwrap_or("Unknown");
        println!("{mark} {}  S/N: {serial}", p.menu_label());
    }
}
