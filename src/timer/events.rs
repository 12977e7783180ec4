use serde::Serialize;
use tokio::sync::broadcast;

use crate::db::SessionWithLaps;

use super::{laps::Lap, state::TimerState};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Notifications published by the timer to whatever front end is listening.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TimerEvent {
    #[serde(rename_all = "camelCase")]
    StateChanged { state: TimerState, elapsed_ms: u64 },
    #[serde(rename_all = "camelCase")]
    Heartbeat { state: TimerState, elapsed_ms: u64 },
    #[serde(rename_all = "camelCase")]
    LapRecorded { lap: Lap, lap_count: usize },
    #[serde(rename_all = "camelCase")]
    SessionCompleted { session: SessionWithLaps },
}

impl TimerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TimerEvent::StateChanged { .. } => "timer-state-changed",
            TimerEvent::Heartbeat { .. } => "timer-heartbeat",
            TimerEvent::LapRecorded { .. } => "lap-recorded",
            TimerEvent::SessionCompleted { .. } => "session-completed",
        }
    }
}

/// Fan-out of [`TimerEvent`]s. Sending never blocks and is dropped when
/// nobody subscribes.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TimerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: TimerEvent) {
        let _ = self.sender.send(event);
    }
}
