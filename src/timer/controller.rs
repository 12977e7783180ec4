use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{self, Duration},
};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{Database, NewSession, SessionWithLaps},
    keepalive::{KeepAliveHandle, KeepAlivePush, Transition},
    settings::Settings,
    utils::Clock,
};

use super::{
    events::{EventBus, TimerEvent},
    laps::{Lap, LapStatistics},
    snapshot::{PersistedSnapshot, SnapshotStore},
    state::{ReconcileOutcome, ReconcileReport, TimerState, TimerStatus},
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const FAST_TICK: Duration = Duration::from_millis(10);
const SLOW_TICK: Duration = Duration::from_millis(1000);
const SNAPSHOT_INTERVAL_MS: i64 = 5_000;
const HEARTBEAT_INTERVAL_MS: i64 = 10_000;
const DEBUG_HEARTBEAT_INTERVAL_MS: i64 = 1_000;

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub state: TimerState,
    pub elapsed_ms: u64,
    pub statistics: Option<LapStatistics>,
}

impl TimerSnapshot {
    /// View of `state` as of `now_ms`, without touching the stored run.
    pub fn at(state: TimerState, now_ms: i64) -> Self {
        Self {
            elapsed_ms: state.current_elapsed_ms(now_ms),
            statistics: state.laps.statistics(),
            state,
        }
    }
}

struct Ticker {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Everything a tick needs, cloned into the spawned loop.
#[derive(Clone)]
struct TickContext {
    state: Arc<Mutex<TimerState>>,
    settings: Settings,
    snapshots: SnapshotStore,
    clock: Arc<dyn Clock>,
    events: EventBus,
    heartbeat_interval_ms: i64,
}

#[derive(Clone)]
pub struct TimerController {
    state: Arc<Mutex<TimerState>>,
    db: Database,
    settings: Settings,
    snapshots: SnapshotStore,
    keepalive: KeepAliveHandle,
    clock: Arc<dyn Clock>,
    events: EventBus,
    ticker: Arc<Mutex<Option<Ticker>>>,
    heartbeat_interval_ms: i64,
}

impl TimerController {
    /// Builds the controller and resumes whatever run the last process left
    /// behind in the snapshot store.
    pub async fn new(
        db: Database,
        settings: Settings,
        keepalive: KeepAliveHandle,
        clock: Arc<dyn Clock>,
        debug_mode: bool,
    ) -> Self {
        let controller = Self {
            state: Arc::new(Mutex::new(TimerState::new())),
            snapshots: SnapshotStore::new(settings.store()),
            db,
            settings,
            keepalive,
            clock,
            events: EventBus::new(),
            ticker: Arc::new(Mutex::new(None)),
            heartbeat_interval_ms: if debug_mode {
                DEBUG_HEARTBEAT_INTERVAL_MS
            } else {
                HEARTBEAT_INTERVAL_MS
            },
        };
        controller.resume_from_snapshot().await;
        controller
    }

    async fn resume_from_snapshot(&self) {
        let Some(snapshot) = self.snapshots.load() else {
            return;
        };

        let now = self.clock.now_ms();
        let restored = snapshot.into_state(now);
        {
            let mut guard = self.state.lock().await;
            *guard = TimerState {
                generation: guard.generation.wrapping_add(1),
                ..restored
            };
        }

        let state = self.state.lock().await.clone();
        if state.is_running() {
            self.spawn_ticker(state.generation).await;
            self.push_keepalive(Transition::Resumed, &state, now);
        } else {
            self.push_keepalive(Transition::Paused, &state, now);
        }
        log_info!(
            "Restored {:?} run {} at {}ms with {} laps",
            state.status,
            state.run_id.as_deref().unwrap_or("-"),
            state.current_elapsed_ms(now),
            state.laps.len()
        );
        self.emit_state_changed(&state, now);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.events.subscribe()
    }

    pub fn keepalive(&self) -> &KeepAliveHandle {
        &self.keepalive
    }

    pub async fn get_state(&self) -> TimerState {
        let now = self.clock.now_ms();
        let mut guard = self.state.lock().await;
        guard.sync_elapsed(now);
        guard.clone()
    }

    pub async fn get_snapshot(&self) -> TimerSnapshot {
        let now = self.clock.now_ms();
        let mut guard = self.state.lock().await;
        guard.sync_elapsed(now);
        TimerSnapshot::at(guard.clone(), now)
    }

    pub async fn start_or_pause(&self) -> TimerSnapshot {
        let running = self.state.lock().await.is_running();
        if running {
            self.pause().await
        } else {
            self.start().await
        }
    }

    /// Starts a fresh run or resumes a paused one. No-op while running.
    pub async fn start(&self) -> TimerSnapshot {
        let now = self.clock.now_ms();
        let (state, transition) = {
            let mut guard = self.state.lock().await;
            let transition = if guard.status == TimerStatus::Paused {
                Transition::Resumed
            } else {
                Transition::Started
            };
            if !guard.start(now) {
                drop(guard);
                return self.get_snapshot().await;
            }
            (guard.clone(), transition)
        };

        self.spawn_ticker(state.generation).await;
        self.save_snapshot(&state, now);
        self.push_keepalive(transition, &state, now);
        self.emit_state_changed(&state, now);
        log_info!(
            "Timer {:?} run {} at {}ms",
            transition,
            state.run_id.as_deref().unwrap_or("-"),
            state.elapsed_ms
        );

        self.get_snapshot().await
    }

    /// Freezes the elapsed time. No-op unless running.
    pub async fn pause(&self) -> TimerSnapshot {
        let now = self.clock.now_ms();
        let state = {
            let mut guard = self.state.lock().await;
            if !guard.pause(now) {
                drop(guard);
                return self.get_snapshot().await;
            }
            guard.clone()
        };

        self.cancel_ticker().await;
        self.save_snapshot(&state, now);
        self.push_keepalive(Transition::Paused, &state, now);
        self.emit_state_changed(&state, now);

        self.get_snapshot().await
    }

    /// Records a lap at the current elapsed time. Returns `None` at zero.
    pub async fn lap(&self) -> Option<Lap> {
        let now = self.clock.now_ms();
        let (lap, state) = {
            let mut guard = self.state.lock().await;
            let lap = guard.add_lap(now)?;
            (lap, guard.clone())
        };

        self.save_snapshot(&state, now);
        self.push_keepalive(Transition::Lapped, &state, now);
        self.events.emit(TimerEvent::LapRecorded {
            lap,
            lap_count: state.laps.len(),
        });
        self.emit_state_changed(&state, now);

        Some(lap)
    }

    pub async fn lap_and_pause(&self) -> Option<Lap> {
        let lap = self.lap().await;
        self.pause().await;
        lap
    }

    /// Ends the run. A run with any elapsed time or laps is stored as a
    /// session; storage failures are logged and the engine still resets.
    pub async fn reset(&self) -> Option<SessionWithLaps> {
        let now = self.clock.now_ms();
        let (finished, state) = {
            let mut guard = self.state.lock().await;
            if guard.status == TimerStatus::Idle {
                return None;
            }
            let finished = guard.finish(now);
            (finished, guard.clone())
        };

        self.cancel_ticker().await;
        if let Err(err) = self.snapshots.clear() {
            log_error!("Failed to clear timer snapshot: {err:?}");
        }
        self.push_keepalive(Transition::Reset, &state, now);
        self.emit_state_changed(&state, now);

        let run = finished?;
        let comment = Some(self.settings.current_comment());
        match self
            .db
            .insert_session_with_laps(NewSession::from_run(run, comment))
            .await
        {
            Ok(session) => {
                log_info!(
                    "Stored session {} ({}ms, {} laps)",
                    session.session.id,
                    session.session.total_duration_ms,
                    session.laps.len()
                );
                self.events.emit(TimerEvent::SessionCompleted {
                    session: session.clone(),
                });
                Some(session)
            }
            Err(err) => {
                log_error!("Failed to store finished session: {err:?}");
                None
            }
        }
    }

    pub fn show_milliseconds(&self) -> bool {
        self.settings.show_milliseconds()
    }

    /// Flips the sub-second display. The running ticker picks up the new
    /// cadence on its next tick.
    pub fn toggle_show_milliseconds(&self) -> Result<bool> {
        let next = !self.settings.show_milliseconds();
        self.settings.set_show_milliseconds(next)?;
        Ok(next)
    }

    pub fn update_current_comment(&self, comment: &str) -> Result<()> {
        self.settings.update_current_comment(comment)
    }

    /// Asks the keep-alive holder for its figures and reconciles with them.
    pub async fn sync_from_keepalive(&self) -> Result<ReconcileOutcome> {
        let report = self.keepalive.request_report().await?;
        Ok(self.reconcile(report).await)
    }

    pub async fn reconcile(&self, report: ReconcileReport) -> ReconcileOutcome {
        let now = self.clock.now_ms();
        let (outcome, state) = {
            let mut guard = self.state.lock().await;
            let outcome = guard.reconcile(report, now);
            (outcome, guard.clone())
        };

        match outcome {
            ReconcileOutcome::WithinTolerance => return outcome,
            ReconcileOutcome::AdoptedAndResumed => self.spawn_ticker(state.generation).await,
            ReconcileOutcome::AdoptedAndPaused => self.cancel_ticker().await,
            ReconcileOutcome::Adopted => {}
        }

        log_warn!(
            "Adopted keep-alive elapsed {}ms ({outcome:?})",
            report.elapsed_ms
        );
        self.save_snapshot(&state, now);
        self.emit_state_changed(&state, now);
        outcome
    }

    /// Persists the current run so the next process can pick it up.
    pub async fn persist(&self) {
        let now = self.clock.now_ms();
        let state = self.state.lock().await.clone();
        if state.status != TimerStatus::Idle {
            self.save_snapshot(&state, now);
        }
    }

    pub async fn shutdown(&self) {
        self.persist().await;
        self.cancel_ticker().await;
        self.keepalive.shutdown();
    }

    /// Replaces the running ticker with one bound to `generation`. Does
    /// nothing if the state has moved past `generation` in the meantime.
    async fn spawn_ticker(&self, generation: u64) {
        let mut ticker_guard = self.ticker.lock().await;
        if self.state.lock().await.generation != generation {
            return;
        }
        if let Some(ticker) = ticker_guard.take() {
            ticker.cancel_token.cancel();
            ticker.handle.abort();
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(tick_loop(
            self.tick_context(),
            generation,
            cancel_token.clone(),
        ));

        *ticker_guard = Some(Ticker {
            handle,
            cancel_token,
        });
    }

    fn tick_context(&self) -> TickContext {
        TickContext {
            state: self.state.clone(),
            settings: self.settings.clone(),
            snapshots: self.snapshots.clone(),
            clock: self.clock.clone(),
            events: self.events.clone(),
            heartbeat_interval_ms: self.heartbeat_interval_ms,
        }
    }

    async fn cancel_ticker(&self) {
        if let Some(ticker) = self.ticker.lock().await.take() {
            ticker.cancel_token.cancel();
            ticker.handle.abort();
        }
    }

    fn save_snapshot(&self, state: &TimerState, now_ms: i64) {
        if let Err(err) = self.snapshots.save(&PersistedSnapshot::capture(state, now_ms)) {
            log_error!("Failed to save timer snapshot: {err:?}");
        }
    }

    fn push_keepalive(&self, transition: Transition, state: &TimerState, now_ms: i64) {
        self.keepalive
            .push(KeepAlivePush::from_state(transition, state, now_ms));
    }

    fn emit_state_changed(&self, state: &TimerState, now_ms: i64) {
        self.events.emit(TimerEvent::StateChanged {
            elapsed_ms: state.current_elapsed_ms(now_ms),
            state: state.clone(),
        });
    }
}

async fn tick_loop(context: TickContext, generation: u64, cancel_token: CancellationToken) {
    let started = context.clock.now_ms();
    let mut last_saved_ms = started;
    let mut last_heartbeat_ms = started;

    loop {
        let cadence = if context.settings.show_milliseconds() {
            FAST_TICK
        } else {
            SLOW_TICK
        };

        tokio::select! {
            _ = time::sleep(cadence) => {}
            _ = cancel_token.cancelled() => break,
        }

        let now = context.clock.now_ms();
        let snapshot = {
            let mut guard = context.state.lock().await;
            if guard.generation != generation || !guard.is_running() {
                break;
            }
            guard.sync_elapsed(now);
            guard.clone()
        };

        if now - last_saved_ms >= SNAPSHOT_INTERVAL_MS {
            last_saved_ms = now;
            if let Err(err) = context
                .snapshots
                .save(&PersistedSnapshot::capture(&snapshot, now))
            {
                log_error!("Failed to save timer snapshot: {err:?}");
            }
        }

        if now - last_heartbeat_ms >= context.heartbeat_interval_ms {
            last_heartbeat_ms = now;
            context.events.emit(TimerEvent::Heartbeat {
                elapsed_ms: snapshot.elapsed_ms,
                state: snapshot,
            });
        }
    }
}
