use arboard::Clipboard;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClipboardError {
    #[error("clipboard access failed: {0}")]
    Access(String),
}

/// Text access to the system clipboard.
pub trait ClipboardPort {
    fn get(&mut self) -> Result<String, ClipboardError>;
    fn set(&mut self, text: &str) -> Result<(), ClipboardError>;
}

/// `arboard`-backed clipboard.
///
/// The handle is opened on first use and kept for the life of the daemon: on
/// X11 the owning instance has to stay alive for pasted content to remain
/// available. A failed operation drops the handle so the next call reopens it.
#[derive(Default)]
pub struct ArboardClipboard {
    clipboard: Option<Clipboard>,
}

impl ArboardClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_clipboard<T>(
        &mut self,
        op: impl FnOnce(&mut Clipboard) -> Result<T, arboard::Error>,
    ) -> Result<T, ClipboardError> {
        let mut clipboard = match self.clipboard.take() {
            Some(c) => c,
            None => Clipboard::new().map_err(|e| ClipboardError::Access(e.to_string()))?,
        };
        match op(&mut clipboard) {
            Ok(value) => {
                self.clipboard = Some(clipboard);
                Ok(value)
            }
            Err(e) => Err(ClipboardError::Access(e.to_string())),
        }
    }
}

impl ClipboardPort for ArboardClipboard {
    fn get(&mut self) -> Result<String, ClipboardError> {
        self.with_clipboard(|c| match c.get_text() {
            // Non-text content reads as empty rather than as a failure.
            Err(arboard::Error::ContentNotAvailable) => Ok(String::new()),
            other => other,
        })
    }

    fn set(&mut self, text: &str) -> Result<(), ClipboardError> {
        self.with_clipboard(|c| c.set_text(text))
    }
}
