use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::event::DaemonEvent;

pub const MIN_SLOT: u8 = 1;
pub const MAX_SLOT: u8 = 8;
pub const DEFAULT_SLOT: u8 = 1;
pub const MIN_POLL_INTERVAL_MS: u64 = 100;
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const MIN_READ_TIMEOUT_SECS: u64 = 1;
pub const MAX_READ_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 5;
/// Helper executable that speaks the device's command protocol.
pub const DEFAULT_READER_PROGRAM: &str = "chameleon-nick";

/// A device slot, numbered 1–8 as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot(u8);

impl Slot {
    /// Returns `None` when `number` is outside 1–8.
    pub fn new(number: u8) -> Option<Self> {
        (MIN_SLOT..=MAX_SLOT).contains(&number).then_some(Self(number))
    }

    pub fn clamped(number: u8) -> Self {
        Self(number.clamp(MIN_SLOT, MAX_SLOT))
    }

    /// 1-based number, as written in the config file.
    pub fn number(self) -> u8 {
        self.0
    }

    /// 0-based index used on the wire.
    pub fn index(self) -> u8 {
        self.0 - 1
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self(DEFAULT_SLOT)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot {}", self.0)
    }
}

/// Frequency band the device reads slot data from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenseMode {
    #[default]
    Hf,
    Lf,
}

impl SenseMode {
    /// Lowercase token passed to the device client helper.
    pub fn as_arg(self) -> &'static str {
        match self {
            SenseMode::Hf => "hf",
            SenseMode::Lf => "lf",
        }
    }
}

impl fmt::Display for SenseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenseMode::Hf => f.write_str("HF"),
            SenseMode::Lf => f.write_str("LF"),
        }
    }
}

impl FromStr for SenseMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hf" | "high" => Ok(SenseMode::Hf),
            "lf" | "low" => Ok(SenseMode::Lf),
            other => Err(format!("unknown sense mode '{other}' (expected hf or lf)")),
        }
    }
}

/// Root configuration structure. Deserialized from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
}

/// Which device to track and what to read from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// USB serial number of the tracked device. Unset means nothing is tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_serial: Option<String>,
    /// 1-based slot number. Clamped to [1, 8].
    #[serde(default = "default_slot")]
    pub slot: u8,
    #[serde(default)]
    pub sense: SenseMode,
    #[serde(default = "default_true")]
    pub notifications: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            target_serial: None,
            slot: DEFAULT_SLOT,
            sense: SenseMode::default(),
            notifications: true,
        }
    }
}

impl DeviceConfig {
    pub fn effective_slot(&self) -> Slot {
        Slot::clamped(self.slot)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Delay between port scans in milliseconds. Clamped to [100, 60000].
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl MonitorConfig {
    pub fn effective_poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.poll_interval_ms
                .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS),
        )
    }
}

/// External helper used to fetch a slot value from the device.
///
/// `{port}`, `{slot}` and `{sense}` in `args` are substituted per read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderConfig {
    #[serde(default = "default_reader_program")]
    pub program: String,
    #[serde(default = "default_reader_args")]
    pub args: Vec<String>,
    /// Upper bound for one read in seconds. Clamped to [1, 60].
    #[serde(default = "default_read_timeout")]
    pub timeout_secs: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_READER_PROGRAM.to_string(),
            args: default_reader_args(),
            timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
        }
    }
}

impl ReaderConfig {
    pub fn effective_timeout(&self) -> Duration {
        Duration::from_secs(
            self.timeout_secs
                .clamp(MIN_READ_TIMEOUT_SECS, MAX_READ_TIMEOUT_SECS),
        )
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Writes `config` to `path`, creating the parent directory if needed.
pub fn save(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))
}

/// Thread-safe handle to the live configuration.
///
/// Every getter and setter takes the lock for a single field access, so
/// readers may observe a value change between two calls. The monitor
/// tolerates that; at worst a trigger is deferred by one tick.
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Config>>,
}

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Config) -> T) -> T {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Config) -> T) -> T {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn target_serial(&self) -> Option<String> {
        self.read(|c| c.device.target_serial.clone())
    }

    pub fn set_target_serial(&self, serial: Option<String>) {
        self.write(|c| c.device.target_serial = serial);
    }

    pub fn slot(&self) -> Slot {
        self.read(|c| c.device.effective_slot())
    }

    pub fn set_slot(&self, slot: Slot) {
        self.write(|c| c.device.slot = slot.number());
    }

    pub fn sense(&self) -> SenseMode {
        self.read(|c| c.device.sense)
    }

    pub fn set_sense(&self, sense: SenseMode) {
        self.write(|c| c.device.sense = sense);
    }

    pub fn notifications_enabled(&self) -> bool {
        self.read(|c| c.device.notifications)
    }

    /// Flips the notification toggle and returns the new value.
    pub fn toggle_notifications(&self) -> bool {
        self.write(|c| {
            c.device.notifications = !c.device.notifications;
            c.device.notifications
        })
    }

    pub fn poll_interval(&self) -> Duration {
        self.read(|c| c.monitor.effective_poll_interval())
    }

    pub fn reader(&self) -> ReaderConfig {
        self.read(|c| c.reader.clone())
    }

    /// Replaces the whole configuration, e.g. after the file was reloaded.
    pub fn apply(&self, config: Config) {
        self.write(|c| *c = config);
    }

    pub fn snapshot(&self) -> Config {
        self.read(Config::clone)
    }
}

/// Spawns a file watcher on the parent directory of `path`.  Whenever the config
/// file is created or modified, reloads it and sends a `ConfigReloaded` event.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            error!("Failed to create config watcher: {e}");
            return;
        }
    };

    // Watch the parent directory rather than the file directly so we catch
    // editor-style atomic saves (write-new + rename).
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            error!("Config path {} has no parent directory", path.display());
            return;
        }
    };

    if let Err(e) = std::fs::create_dir_all(&watch_dir) {
        warn!("Failed to create config directory {}: {e}", watch_dir.display());
    }
    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        error!("Failed to watch config directory: {e}");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_config && is_write {
            match load_or_default(&path) {
                Ok(config) => {
                    if tx.send(DaemonEvent::ConfigReloaded(config)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to reload config: {e:#}"),
            }
        }
    }
}

fn default_slot() -> u8 {
    DEFAULT_SLOT
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_reader_program() -> String {
    DEFAULT_READER_PROGRAM.to_string()
}

fn default_reader_args() -> Vec<String> {
    ["--port", "{port}", "--slot", "{slot}", "--sense", "{sense}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_read_timeout() -> u64 {
    DEFAULT_READ_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Slot ──────────────────────────────────────────────────────────────────

    #[test]
    fn slot_new_rejects_out_of_range() {
        assert!(Slot::new(0).is_none());
        assert!(Slot::new(9).is_none());
        assert_eq!(Slot::new(8).map(Slot::number), Some(8));
    }

    #[test]
    fn slot_index_is_zero_based() {
        assert_eq!(Slot::clamped(1).index(), 0);
        assert_eq!(Slot::clamped(8).index(), 7);
    }

    #[test]
    fn effective_slot_clamps_config_value() {
        let mut device = DeviceConfig::default();
        device.slot = 0;
        assert_eq!(device.effective_slot().number(), MIN_SLOT);
        device.slot = 200;
        assert_eq!(device.effective_slot().number(), MAX_SLOT);
    }

    // ── SenseMode ─────────────────────────────────────────────────────────────

    #[test]
    fn sense_mode_parses_case_insensitively() {
        assert_eq!("HF".parse::<SenseMode>(), Ok(SenseMode::Hf));
        assert_eq!(" lf ".parse::<SenseMode>(), Ok(SenseMode::Lf));
        assert!("uhf".parse::<SenseMode>().is_err());
    }

    // ── clamping ──────────────────────────────────────────────────────────────

    #[test]
    fn poll_interval_is_clamped() {
        let fast = MonitorConfig { poll_interval_ms: 1 };
        let slow = MonitorConfig { poll_interval_ms: u64::MAX };
        assert_eq!(fast.effective_poll_interval(), Duration::from_millis(MIN_POLL_INTERVAL_MS));
        assert_eq!(slow.effective_poll_interval(), Duration::from_millis(MAX_POLL_INTERVAL_MS));
    }

    #[test]
    fn read_timeout_is_clamped() {
        let mut reader = ReaderConfig::default();
        reader.timeout_secs = 0;
        assert_eq!(reader.effective_timeout(), Duration::from_secs(MIN_READ_TIMEOUT_SECS));
    }

    // ── load_or_default ───────────────────────────────────────────────────────

    #[test]
    fn load_or_default_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let config = load_or_default(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.device.target_serial.is_none());
        assert!(config.device.notifications);
    }

    #[test]
    fn load_or_default_parses_valid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[device]
target_serial = "ABC123"
slot = 3
sense = "lf"
notifications = false

[monitor]
poll_interval_ms = 500

[reader]
program = "/usr/local/bin/nick"
args = ["{port}", "{slot}"]
timeout_secs = 10
"#,
        )
        .unwrap();

        let config = load_or_default(&path).unwrap();
        assert_eq!(config.device.target_serial.as_deref(), Some("ABC123"));
        assert_eq!(config.device.effective_slot().number(), 3);
        assert_eq!(config.device.sense, SenseMode::Lf);
        assert!(!config.device.notifications);
        assert_eq!(config.monitor.poll_interval_ms, 500);
        assert_eq!(config.reader.program, "/usr/local/bin/nick");
        assert_eq!(config.reader.args, vec!["{port}", "{slot}"]);
        assert_eq!(config.reader.timeout_secs, 10);
    }

    #[test]
    fn load_or_default_partial_toml_uses_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[device]\nslot = 5\n").unwrap();

        let config = load_or_default(&path).unwrap();
        assert_eq!(config.device.slot, 5);
        assert_eq!(config.device.sense, SenseMode::Hf);
        assert!(config.device.notifications);
        assert_eq!(config.monitor, MonitorConfig::default());
        assert_eq!(config.reader, ReaderConfig::default());
    }

    #[test]
    fn load_or_default_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is not valid toml ][[[").unwrap();
        assert!(load_or_default(&path).is_err());
    }

    #[test]
    fn load_or_default_rejects_unknown_sense() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[device]\nsense = \"uhf\"\n").unwrap();
        assert!(load_or_default(&path).is_err());
    }

    // ── save ──────────────────────────────────────────────────────────────────

    #[test]
    fn save_creates_parent_and_reloads_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.device.target_serial = Some("XYZ".to_string());
        config.device.slot = 7;
        config.device.sense = SenseMode::Lf;
        config.device.notifications = false;

        save(&path, &config).unwrap();
        assert_eq!(load_or_default(&path).unwrap(), config);
    }

    #[test]
    fn save_omits_unset_target_serial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        save(&path, &Config::default()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("target_serial"));
        assert!(content.contains("sense = \"hf\""));
    }

    // ── ConfigHandle ──────────────────────────────────────────────────────────

    #[test]
    fn handle_setters_are_visible_through_clones() {
        let handle = ConfigHandle::new(Config::default());
        let reader = handle.clone();

        handle.set_target_serial(Some("SN1".to_string()));
        handle.set_slot(Slot::clamped(4));
        handle.set_sense(SenseMode::Lf);

        assert_eq!(reader.target_serial().as_deref(), Some("SN1"));
        assert_eq!(reader.slot().number(), 4);
        assert_eq!(reader.sense(), SenseMode::Lf);
    }

    #[test]
    fn handle_toggle_notifications_returns_new_value() {
        let handle = ConfigHandle::new(Config::default());
        assert!(handle.notifications_enabled());
        assert!(!handle.toggle_notifications());
        assert!(!handle.notifications_enabled());
        assert!(handle.toggle_notifications());
    }

    #[test]
    fn handle_apply_replaces_everything() {
        let handle = ConfigHandle::new(Config::default());
        handle.set_target_serial(Some("OLD".to_string()));

        let mut fresh = Config::default();
        fresh.device.target_serial = Some("NEW".to_string());
        fresh.monitor.poll_interval_ms = 250;
        handle.apply(fresh.clone());

        assert_eq!(handle.snapshot(), fresh);
        assert_eq!(handle.poll_interval(), Duration::from_millis(250));
    }
}
