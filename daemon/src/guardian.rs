/// Clipboard backup/restore across one device connection.
///
/// On attach the user's clipboard is backed up. On detach it is put back, but
/// only if the clipboard still holds exactly what the daemon last wrote; any
/// other content is treated as the user's and left alone.
use tracing::{info, warn};

use crate::clipboard::ClipboardPort;

/// What [`ClipboardGuardian::on_detach`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetachOutcome {
    /// No session was open.
    NoSession,
    /// The backup was written back (or already matched the clipboard).
    Restored,
    /// The clipboard changed since our write; user content kept.
    SkippedUserEdit,
    /// The clipboard could not be read, so nothing was overwritten.
    Unverifiable,
    /// The restore write itself failed.
    RestoreFailed,
}

/// Holds the backup for at most one open session.
///
/// `last_written` is only ever set while `backup` is, and both are cleared
/// together when the session closes.
#[derive(Debug, Default)]
pub struct ClipboardGuardian {
    backup: Option<String>,
    last_written: Option<String>,
}

impl ClipboardGuardian {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_open(&self) -> bool {
        self.backup.is_some()
    }

    #[cfg(test)]
    pub fn backup(&self) -> Option<&str> {
        self.backup.as_deref()
    }

    #[cfg(test)]
    pub fn last_written(&self) -> Option<&str> {
        self.last_written.as_deref()
    }

    /// Opens a session by backing up the current clipboard. An already open
    /// session keeps its original backup. If the clipboard cannot be read no
    /// session is opened.
    pub fn on_attach(&mut self, clipboard: &mut dyn ClipboardPort) {
        if self.session_open() {
            return;
        }
        match clipboard.get() {
            Ok(current) => {
                self.backup = Some(current);
                self.last_written = None;
                info!("Original clipboard content saved");
            }
            Err(e) => warn!("Failed to read clipboard backup: {e}"),
        }
    }

    /// Records a value the daemon just wrote. Ignored outside a session.
    pub fn on_write(&mut self, value: &str) {
        if self.session_open() {
            self.last_written = Some(value.to_string());
        }
    }

    /// Closes the session, restoring the backup only when it is safe to.
    pub fn on_detach(&mut self, clipboard: &mut dyn ClipboardPort) -> DetachOutcome {
        let Some(backup) = self.backup.take() else {
            return DetachOutcome::NoSession;
        };
        let last_written = self.last_written.take();

        let current = match clipboard.get() {
            Ok(c) => c,
            Err(e) => {
                warn!("Cannot verify clipboard ({e}); restoration skipped");
                return DetachOutcome::Unverifiable;
            }
        };

        match last_written {
            Some(written) if current == written => match clipboard.set(&backup) {
                Ok(()) => {
                    info!("Clipboard restored to original state");
                    DetachOutcome::Restored
                }
                Err(e) => {
                    warn!("Failed to restore clipboard: {e}");
                    DetachOutcome::RestoreFailed
                }
            },
            // Nothing was written and nothing changed: restoring is a no-op.
            None if current == backup => DetachOutcome::Restored,
            _ => {
                info!("Clipboard modified by user; restoration skipped");
                DetachOutcome::SkippedUserEdit
            }
        }
    }
}
