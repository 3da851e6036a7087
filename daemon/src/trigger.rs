use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::ConfigHandle;
use crate::tracker::Edge;

/// Manual "copy now" request shared between tasks.
///
/// Any task may raise it; only the monitor takes it. Raising it several times
/// before the next take yields a single request.
#[derive(Debug, Clone, Default)]
pub struct ManualTrigger {
    flag: Arc<AtomicBool>,
}

impl ManualTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Clears the flag and reports whether it was set.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }
}

/// Whether a read must run this tick.
///
/// `manual` is the already-taken manual flag; a request taken while nothing
/// is connected is simply dropped. An attach edge reads once, whatever the
/// manual flag says.
pub fn should_read(edge: Edge, connected: bool, manual: bool) -> bool {
    match edge {
        Edge::Attach => true,
        Edge::Detach => false,
        Edge::Steady => connected && manual,
    }
}

/// Makes `serial` the tracked device.
///
/// Reselecting the current target is a request to read it again. A new
/// target is read through its own attach edge, so raising the trigger as well
/// could read it twice.
pub fn select_target(config: &ConfigHandle, trigger: &ManualTrigger, serial: Option<String>) {
    if config.target_serial() == serial {
        trigger.raise();
    } else {
        config.set_target_serial(serial);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears_flag() {
        let t = ManualTrigger::new();
        assert!(!t.take());
        t.raise();
        assert!(t.take());
        assert!(!t.take());
    }

    #[test]
    fn repeated_raises_coalesce() {
        let t = ManualTrigger::new();
        let ui = t.clone();
        for _ in 0..5 {
            ui.raise();
        }
        assert!(t.take());
        assert!(!t.take());
    }

    #[test]
    fn raise_from_another_thread_is_seen() {
        let t = ManualTrigger::new();
        let remote = t.clone();
        std::thread::spawn(move || remote.raise()).join().unwrap();
        assert!(t.take());
    }

    #[test]
    fn selecting_a_new_target_does_not_raise() {
        let config = ConfigHandle::default();
        let t = ManualTrigger::new();
        select_target(&config, &t, Some("SN1".to_string()));
        assert_eq!(config.target_serial().as_deref(), Some("SN1"));
        assert!(!t.take());
    }

    #[test]
    fn reselecting_the_current_target_raises() {
        let config = ConfigHandle::default();
        config.set_target_serial(Some("SN1".to_string()));
        let t = ManualTrigger::new();
        select_target(&config, &t, Some("SN1".to_string()));
        assert!(t.take());
    }

    #[test]
    fn attach_always_reads() {
        assert!(should_read(Edge::Attach, true, false));
        assert!(should_read(Edge::Attach, true, true));
    }

    #[test]
    fn steady_connection_reads_only_on_manual() {
        assert!(!should_read(Edge::Steady, true, false));
        assert!(should_read(Edge::Steady, true, true));
    }

    #[test]
    fn manual_request_while_disconnected_is_dropped() {
        assert!(!should_read(Edge::Steady, false, true));
        assert!(!should_read(Edge::Detach, false, true));
    }
}
