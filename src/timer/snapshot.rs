use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use crate::settings::{KeyValueStore, KvWrite};

use super::laps::{decode_laps, encode_laps, Lap, LapLedger};
use super::state::{TimerState, TimerStatus};

const SNAPSHOT_VERSION: u64 = 1;

const KEY_VERSION: &str = "stopwatch_snapshot_version";
const KEY_ELAPSED_TIME: &str = "stopwatch_elapsed_time";
const KEY_IS_RUNNING: &str = "stopwatch_is_running";
const KEY_SESSION_START_TIME: &str = "stopwatch_session_start_time";
const KEY_ACCUMULATED_TIME: &str = "stopwatch_accumulated_time";
const KEY_LAST_UPDATE_TIME: &str = "stopwatch_last_update_time";
const KEY_LAPS_JSON: &str = "stopwatch_laps_json";
const KEY_RUN_ID: &str = "stopwatch_run_id";

const ALL_KEYS: [&str; 8] = [
    KEY_VERSION,
    KEY_ELAPSED_TIME,
    KEY_IS_RUNNING,
    KEY_SESSION_START_TIME,
    KEY_ACCUMULATED_TIME,
    KEY_LAST_UPDATE_TIME,
    KEY_LAPS_JSON,
    KEY_RUN_ID,
];

/// The part of the timer state that must survive the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub elapsed_ms: u64,
    pub is_running: bool,
    /// Wall-clock start of the run, 0 when unknown.
    pub session_start_ms: i64,
    pub accumulated_ms: u64,
    pub last_update_ms: i64,
    pub laps: Vec<Lap>,
    pub run_id: Option<String>,
}

impl PersistedSnapshot {
    pub fn capture(state: &TimerState, now_ms: i64) -> Self {
        Self {
            elapsed_ms: state.current_elapsed_ms(now_ms),
            is_running: state.is_running(),
            session_start_ms: state.session_started_at_ms.unwrap_or(0),
            accumulated_ms: state.accumulated_ms,
            last_update_ms: now_ms,
            laps: state.laps.as_slice().to_vec(),
            run_id: state.run_id.clone(),
        }
    }

    /// Rebuilds engine state at `now_ms`. A run that was live when saved keeps
    /// counting through the time the process was gone.
    pub fn into_state(self, now_ms: i64) -> TimerState {
        let mut state = TimerState::new();
        state.laps = LapLedger::from_laps(self.laps);
        state.run_id = self.run_id.or_else(|| Some(uuid::Uuid::new_v4().to_string()));
        state.session_started_at_ms = Some(if self.session_start_ms > 0 {
            self.session_start_ms
        } else {
            now_ms
        });

        if self.is_running {
            let gone_for = now_ms.saturating_sub(self.last_update_ms).max(0) as u64;
            state.elapsed_ms = self.elapsed_ms.saturating_add(gone_for);
            state.accumulated_ms = state.elapsed_ms;
            state.run_started_at_ms = Some(now_ms);
            state.status = TimerStatus::Running;
        } else {
            state.elapsed_ms = self.elapsed_ms;
            state.accumulated_ms = self.elapsed_ms;
            state.status = TimerStatus::Paused;
        }
        state.generation = 1;
        state
    }
}

/// Reads and writes the timer snapshot in the preference store.
#[derive(Clone)]
pub struct SnapshotStore {
    store: Arc<dyn KeyValueStore>,
}

impl SnapshotStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn save(&self, snapshot: &PersistedSnapshot) -> Result<()> {
        let laps = encode_laps(&snapshot.laps).map_or(Value::Null, Value::String);
        let mut batch = vec![
            KvWrite::set(KEY_VERSION, SNAPSHOT_VERSION),
            KvWrite::set(KEY_ELAPSED_TIME, snapshot.elapsed_ms),
            KvWrite::set(KEY_IS_RUNNING, snapshot.is_running),
            KvWrite::set(KEY_SESSION_START_TIME, snapshot.session_start_ms),
            KvWrite::set(KEY_ACCUMULATED_TIME, snapshot.accumulated_ms),
            KvWrite::set(KEY_LAST_UPDATE_TIME, snapshot.last_update_ms),
        ];
        batch.push(match laps {
            Value::Null => KvWrite::remove(KEY_LAPS_JSON),
            laps => KvWrite::Set(KEY_LAPS_JSON.to_string(), laps),
        });
        batch.push(match &snapshot.run_id {
            Some(run_id) => KvWrite::set(KEY_RUN_ID, run_id.as_str()),
            None => KvWrite::remove(KEY_RUN_ID),
        });
        self.store.apply(batch)
    }

    /// Returns the stored snapshot, or `None` when there is no run to resume.
    pub fn load(&self) -> Option<PersistedSnapshot> {
        let version = self.store.get_u64(KEY_VERSION, SNAPSHOT_VERSION);
        if version > SNAPSHOT_VERSION {
            log::warn!("ignoring timer snapshot from newer version {version}");
            return None;
        }

        let elapsed_ms = self.store.get_u64(KEY_ELAPSED_TIME, 0);
        let laps_json = self.store.get_string(KEY_LAPS_JSON);
        if elapsed_ms == 0 && laps_json.is_none() {
            return None;
        }

        Some(PersistedSnapshot {
            elapsed_ms,
            is_running: self.store.get_bool(KEY_IS_RUNNING, false),
            session_start_ms: self.store.get_i64(KEY_SESSION_START_TIME, 0),
            accumulated_ms: self.store.get_u64(KEY_ACCUMULATED_TIME, 0),
            last_update_ms: self.store.get_i64(KEY_LAST_UPDATE_TIME, 0),
            laps: laps_json.as_deref().map(decode_laps).unwrap_or_default(),
            run_id: self.store.get_string(KEY_RUN_ID),
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.store
            .apply(ALL_KEYS.iter().map(|key| KvWrite::remove(key)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemoryStore;
    use serde_json::json;

    fn snapshot_store() -> (SnapshotStore, Arc<MemoryStore>) {
        let kv = Arc::new(MemoryStore::new());
        (SnapshotStore::new(kv.clone()), kv)
    }

    fn running_state() -> TimerState {
        let mut state = TimerState::new();
        state.start(1_000);
        state.add_lap(2_500);
        state.add_lap(4_000);
        state
    }

    #[test]
    fn empty_store_has_nothing_to_resume() {
        let (store, _) = snapshot_store();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn save_then_load_keeps_every_field() {
        let (store, _) = snapshot_store();
        let snapshot = PersistedSnapshot::capture(&running_state(), 5_000);
        store.save(&snapshot).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.elapsed_ms, 4_000);
        assert!(loaded.is_running);
        assert_eq!(loaded.session_start_ms, 1_000);
        assert_eq!(loaded.laps.len(), 2);
    }

    #[test]
    fn clear_removes_the_snapshot() {
        let (store, kv) = snapshot_store();
        store
            .save(&PersistedSnapshot::capture(&running_state(), 5_000))
            .unwrap();
        store.clear().unwrap();
        assert_eq!(store.load(), None);
        assert_eq!(kv.get(KEY_LAST_UPDATE_TIME), None);
    }

    #[test]
    fn corrupt_fields_fall_back_individually() {
        let (store, kv) = snapshot_store();
        kv.apply(vec![
            KvWrite::set(KEY_ELAPSED_TIME, 9_000),
            KvWrite::set(KEY_IS_RUNNING, "yes"),
            KvWrite::set(
                KEY_LAPS_JSON,
                r#"[{"lapNumber":1,"totalTime":4000,"lapDuration":4000},{"broken":true}]"#,
            ),
            KvWrite::Set(KEY_ACCUMULATED_TIME.into(), json!(-5)),
        ])
        .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.elapsed_ms, 9_000);
        assert!(!loaded.is_running);
        assert_eq!(loaded.accumulated_ms, 0);
        assert_eq!(loaded.laps.len(), 1);
    }

    #[test]
    fn running_snapshot_counts_time_spent_away() {
        let snapshot = PersistedSnapshot::capture(&running_state(), 5_000);
        let state = snapshot.into_state(65_000);
        assert_eq!(state.status, TimerStatus::Running);
        assert_eq!(state.current_elapsed_ms(65_000), 64_000);
        assert_eq!(state.current_elapsed_ms(66_000), 65_000);
        assert_eq!(state.session_started_at_ms, Some(1_000));
    }

    #[test]
    fn paused_snapshot_restores_frozen() {
        let mut state = running_state();
        state.pause(6_000);
        let restored = PersistedSnapshot::capture(&state, 7_000).into_state(99_000);
        assert_eq!(restored.status, TimerStatus::Paused);
        assert_eq!(restored.current_elapsed_ms(120_000), 5_000);
        assert_eq!(restored.laps.len(), 2);
    }
}
