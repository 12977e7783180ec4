use log::info;

/// What the process is currently holding on to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    Paused,
    Stopped,
}

/// Platform hook that keeps the process alive while a run is in progress
/// (a foreground notification, a wake lock, an inhibitor). Announcements are
/// idempotent.
pub trait LivenessSignal: Send {
    fn announce_running(&mut self, elapsed_ms: u64);

    fn announce_paused(&mut self, elapsed_ms: u64);

    fn announce_stopped(&mut self);
}

/// Signal that only records and logs the held state.
#[derive(Debug)]
pub struct LogLiveness {
    held: Liveness,
}

impl Default for LogLiveness {
    fn default() -> Self {
        Self {
            held: Liveness::Stopped,
        }
    }
}

impl LogLiveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn held(&self) -> Liveness {
        self.held
    }

    fn transition(&mut self, next: Liveness) -> bool {
        if self.held == next {
            return false;
        }
        self.held = next;
        true
    }
}

impl LivenessSignal for LogLiveness {
    fn announce_running(&mut self, elapsed_ms: u64) {
        if self.transition(Liveness::Running) {
            info!("Keep-alive held: running at {elapsed_ms}ms");
        }
    }

    fn announce_paused(&mut self, elapsed_ms: u64) {
        if self.transition(Liveness::Paused) {
            info!("Keep-alive held: paused at {elapsed_ms}ms");
        }
    }

    fn announce_stopped(&mut self) {
        if self.transition(Liveness::Stopped) {
            info!("Keep-alive released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_announcements_do_not_change_state() {
        let mut signal = LogLiveness::new();
        assert_eq!(signal.held(), Liveness::Stopped);

        signal.announce_running(0);
        signal.announce_running(500);
        assert_eq!(signal.held(), Liveness::Running);

        signal.announce_paused(900);
        assert_eq!(signal.held(), Liveness::Paused);
        assert!(!signal.transition(Liveness::Paused));

        signal.announce_stopped();
        signal.announce_stopped();
        assert_eq!(signal.held(), Liveness::Stopped);
    }
}
