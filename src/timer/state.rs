use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::laps::{Lap, LapLedger};

/// Differences at or below this many milliseconds between the engine and a
/// keep-alive report are treated as scheduling noise.
pub const RECONCILE_TOLERANCE_MS: u64 = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TimerStatus {
    #[default]
    Idle,
    Running,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub status: TimerStatus,
    pub run_id: Option<String>,
    pub elapsed_ms: u64,
    /// Total frozen at the last pause (or adopted from a keep-alive report);
    /// combines with `run_started_at_ms` to compute the live elapsed time.
    pub accumulated_ms: u64,
    pub run_started_at_ms: Option<i64>,
    pub session_started_at_ms: Option<i64>,
    pub laps: LapLedger,
    /// Bumped on every transition that starts or stops the tick loop. A tick
    /// only applies while its captured generation is still current.
    #[serde(skip)]
    pub generation: u64,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            status: TimerStatus::Idle,
            run_id: None,
            elapsed_ms: 0,
            accumulated_ms: 0,
            run_started_at_ms: None,
            session_started_at_ms: None,
            laps: LapLedger::new(),
            generation: 0,
        }
    }
}

/// A run taken out of the engine on reset, ready to become a stored session.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedRun {
    pub run_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub total_duration_ms: u64,
    pub laps: Vec<Lap>,
}

/// Elapsed time reported back by the keep-alive holder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub elapsed_ms: u64,
    pub is_running: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    WithinTolerance,
    Adopted,
    AdoptedAndResumed,
    AdoptedAndPaused,
}

impl ReconcileOutcome {
    pub fn adopted(self) -> bool {
        !matches!(self, ReconcileOutcome::WithinTolerance)
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

impl TimerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.status == TimerStatus::Running
    }

    pub fn has_activity(&self) -> bool {
        self.elapsed_ms > 0 || !self.laps.is_empty()
    }

    pub fn current_elapsed_ms(&self, now_ms: i64) -> u64 {
        match (self.status, self.run_started_at_ms) {
            (TimerStatus::Running, Some(anchor)) => self
                .accumulated_ms
                .saturating_add(now_ms.saturating_sub(anchor).max(0) as u64),
            _ => self.elapsed_ms,
        }
    }

    pub fn sync_elapsed(&mut self, now_ms: i64) {
        self.elapsed_ms = self.current_elapsed_ms(now_ms);
    }

    /// Starts a fresh run or resumes a paused one. Returns `false` when the
    /// timer is already running.
    pub fn start(&mut self, now_ms: i64) -> bool {
        if self.status == TimerStatus::Running {
            return false;
        }

        if self.session_started_at_ms.is_none() {
            self.session_started_at_ms = Some(now_ms);
            self.run_id = Some(uuid::Uuid::new_v4().to_string());
        }
        self.accumulated_ms = self.elapsed_ms;
        self.run_started_at_ms = Some(now_ms);
        self.status = TimerStatus::Running;
        self.generation = self.generation.wrapping_add(1);
        true
    }

    /// Freezes the elapsed time. Returns `false` unless the timer was running.
    pub fn pause(&mut self, now_ms: i64) -> bool {
        if self.status != TimerStatus::Running {
            return false;
        }

        self.sync_elapsed(now_ms);
        self.accumulated_ms = self.elapsed_ms;
        self.run_started_at_ms = None;
        self.status = TimerStatus::Paused;
        self.generation = self.generation.wrapping_add(1);
        true
    }

    pub fn add_lap(&mut self, now_ms: i64) -> Option<Lap> {
        self.sync_elapsed(now_ms);
        self.laps.append(self.elapsed_ms)
    }

    /// Ends the run. Returns the finished run when there was anything to keep;
    /// the state is back to Idle either way.
    pub fn finish(&mut self, now_ms: i64) -> Option<FinishedRun> {
        if self.status == TimerStatus::Idle {
            return None;
        }

        self.sync_elapsed(now_ms);
        let finished = self.has_activity().then(|| FinishedRun {
            run_id: self.run_id.clone(),
            started_at: millis_to_datetime(self.session_started_at_ms.unwrap_or(now_ms)),
            ended_at: millis_to_datetime(now_ms),
            total_duration_ms: self.elapsed_ms,
            laps: self.laps.as_slice().to_vec(),
        });

        self.clear();
        finished
    }

    /// Returns to Idle while keeping the generation counter monotonic.
    pub fn clear(&mut self) {
        let generation = self.generation.wrapping_add(1);
        *self = Self {
            generation,
            ..Self::default()
        };
    }

    /// Applies a keep-alive report. Above the tolerance the reported elapsed
    /// time wins and the running flag follows the report.
    pub fn reconcile(&mut self, report: ReconcileReport, now_ms: i64) -> ReconcileOutcome {
        self.sync_elapsed(now_ms);
        if self.elapsed_ms.abs_diff(report.elapsed_ms) <= RECONCILE_TOLERANCE_MS {
            return ReconcileOutcome::WithinTolerance;
        }

        self.accumulated_ms = report.elapsed_ms;
        self.elapsed_ms = report.elapsed_ms;

        match (report.is_running, self.is_running()) {
            (true, false) => {
                if self.session_started_at_ms.is_none() {
                    self.session_started_at_ms = Some(now_ms.saturating_sub(report.elapsed_ms as i64));
                    self.run_id = Some(uuid::Uuid::new_v4().to_string());
                }
                self.run_started_at_ms = Some(now_ms);
                self.status = TimerStatus::Running;
                self.generation = self.generation.wrapping_add(1);
                ReconcileOutcome::AdoptedAndResumed
            }
            (false, true) => {
                self.run_started_at_ms = None;
                self.status = TimerStatus::Paused;
                self.generation = self.generation.wrapping_add(1);
                ReconcileOutcome::AdoptedAndPaused
            }
            (true, true) => {
                self.run_started_at_ms = Some(now_ms);
                ReconcileOutcome::Adopted
            }
            (false, false) => {
                if self.status == TimerStatus::Idle && report.elapsed_ms > 0 {
                    self.status = TimerStatus::Paused;
                    self.session_started_at_ms.get_or_insert(now_ms);
                }
                ReconcileOutcome::Adopted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_freezes_and_resume_continues() {
        let mut state = TimerState::new();
        assert!(state.start(10_000));
        assert_eq!(state.current_elapsed_ms(12_000), 2_000);

        assert!(state.pause(12_000));
        assert_eq!(state.status, TimerStatus::Paused);
        assert_eq!(state.current_elapsed_ms(50_000), 2_000);

        assert!(state.start(60_000));
        assert_eq!(state.session_started_at_ms, Some(10_000));
        assert_eq!(state.current_elapsed_ms(60_500), 2_500);
    }

    #[test]
    fn start_while_running_is_a_no_op() {
        let mut state = TimerState::new();
        state.start(0);
        let generation = state.generation;
        assert!(!state.start(5_000));
        assert_eq!(state.run_started_at_ms, Some(0));
        assert_eq!(state.generation, generation);
        assert!(!TimerState::new().pause(0));
    }

    #[test]
    fn finishing_builds_run_with_laps_in_order() {
        let mut state = TimerState::new();
        state.start(0);
        let first = state.add_lap(1_500).unwrap();
        let second = state.add_lap(4_200).unwrap();
        assert_eq!((first.lap_number, first.lap_duration), (1, 1_500));
        assert_eq!((second.lap_number, second.lap_duration), (2, 2_700));

        let run = state.finish(4_200).unwrap();
        assert_eq!(run.total_duration_ms, 4_200);
        assert_eq!(run.laps, vec![first, second]);
        assert_eq!(run.started_at.timestamp_millis(), 0);
        assert_eq!(state.status, TimerStatus::Idle);
        assert_eq!(state.elapsed_ms, 0);
        assert!(state.laps.is_empty());
        assert_eq!(state.session_started_at_ms, None);
    }

    #[test]
    fn finishing_an_empty_run_discards_it() {
        let mut state = TimerState::new();
        state.start(1_000);
        state.pause(1_000);
        assert_eq!(state.finish(2_000), None);
        assert_eq!(state.status, TimerStatus::Idle);
        assert_eq!(TimerState::new().finish(5_000), None);
    }

    #[test]
    fn reconcile_ignores_small_drift() {
        let mut state = TimerState::new();
        state.start(0);
        state.pause(5_000);
        let outcome = state.reconcile(ReconcileReport { elapsed_ms: 5_050, is_running: false }, 9_000);
        assert_eq!(outcome, ReconcileOutcome::WithinTolerance);
        assert_eq!(state.elapsed_ms, 5_000);
        assert_eq!(state.accumulated_ms, 5_000);
    }

    #[test]
    fn reconcile_adopts_large_drift_and_follows_running_flag() {
        let mut state = TimerState::new();
        state.start(0);
        state.pause(5_000);
        let generation = state.generation;

        let outcome = state.reconcile(ReconcileReport { elapsed_ms: 6_000, is_running: true }, 9_000);
        assert_eq!(outcome, ReconcileOutcome::AdoptedAndResumed);
        assert_eq!(state.accumulated_ms, 6_000);
        assert!(state.is_running());
        assert_ne!(state.generation, generation);
        assert_eq!(state.current_elapsed_ms(9_400), 6_400);

        let outcome = state.reconcile(ReconcileReport { elapsed_ms: 20_000, is_running: false }, 9_500);
        assert_eq!(outcome, ReconcileOutcome::AdoptedAndPaused);
        assert_eq!(state.status, TimerStatus::Paused);
        assert_eq!(state.current_elapsed_ms(99_000), 20_000);
    }

    #[test]
    fn reconcile_while_running_re_anchors() {
        let mut state = TimerState::new();
        state.start(0);
        let outcome = state.reconcile(ReconcileReport { elapsed_ms: 8_000, is_running: true }, 5_000);
        assert_eq!(outcome, ReconcileOutcome::Adopted);
        assert_eq!(state.current_elapsed_ms(6_000), 9_000);
    }
}
