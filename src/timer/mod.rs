pub mod commands;
pub mod controller;
pub mod events;
pub mod laps;
pub mod snapshot;
pub mod state;

pub use controller::{TimerController, TimerSnapshot};
pub use events::{EventBus, TimerEvent};
pub use laps::{Lap, LapLedger, LapStatistics};
pub use snapshot::{PersistedSnapshot, SnapshotStore};
pub use state::{
    FinishedRun, ReconcileOutcome, ReconcileReport, TimerState, TimerStatus,
    RECONCILE_TOLERANCE_MS,
};
