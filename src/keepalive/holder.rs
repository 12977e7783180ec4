use serde::Serialize;

use crate::timer::{ReconcileReport, TimerState};

/// Why the engine pushed its state to the holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Transition {
    Started,
    Resumed,
    Paused,
    Lapped,
    Reset,
}

/// Engine state as handed to the keep-alive holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlivePush {
    pub transition: Transition,
    pub elapsed_ms: u64,
    pub is_running: bool,
    pub lap_count: usize,
    pub last_lap_total_ms: u64,
    /// Engine clock reading the figures were taken at.
    pub at_ms: i64,
}

impl KeepAlivePush {
    pub fn from_state(transition: Transition, state: &TimerState, now_ms: i64) -> Self {
        Self {
            transition,
            elapsed_ms: state.current_elapsed_ms(now_ms),
            is_running: state.is_running(),
            lap_count: state.laps.len(),
            last_lap_total_ms: state.laps.last().map_or(0, |lap| lap.total_time),
            at_ms: now_ms,
        }
    }
}

/// Summary published on each holder tick. Informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeepAliveStatus {
    pub elapsed_ms: u64,
    pub is_running: bool,
    pub lap_count: usize,
    pub current_lap_ms: u64,
}

/// The holder's own copy of the run, advanced from wall-clock readings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HolderState {
    accumulated_ms: u64,
    resumed_at_ms: i64,
    is_running: bool,
    lap_count: usize,
    last_lap_total_ms: u64,
}

impl HolderState {
    /// Replaces the held state with the pushed one.
    pub fn apply(&mut self, push: &KeepAlivePush) {
        self.accumulated_ms = push.elapsed_ms;
        self.is_running = push.is_running;
        self.lap_count = push.lap_count;
        self.last_lap_total_ms = push.last_lap_total_ms;
        if push.is_running {
            self.resumed_at_ms = push.at_ms;
        }
    }

    pub fn elapsed_ms(&self, now_ms: i64) -> u64 {
        if self.is_running {
            let since = now_ms.saturating_sub(self.resumed_at_ms).max(0) as u64;
            self.accumulated_ms.saturating_add(since)
        } else {
            self.accumulated_ms
        }
    }

    pub fn report(&self, now_ms: i64) -> ReconcileReport {
        ReconcileReport {
            elapsed_ms: self.elapsed_ms(now_ms),
            is_running: self.is_running,
        }
    }

    pub fn status(&self, now_ms: i64) -> KeepAliveStatus {
        let elapsed_ms = self.elapsed_ms(now_ms);
        KeepAliveStatus {
            elapsed_ms,
            is_running: self.is_running,
            lap_count: self.lap_count,
            current_lap_ms: elapsed_ms.saturating_sub(self.last_lap_total_ms),
        }
    }
}
