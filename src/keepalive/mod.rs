//! Background holder that keeps its own account of the running stopwatch
//! while the foreground engine may be suspended.
//!
//! The engine pushes its state on every transition; the holder advances that
//! state from wall-clock readings and answers report requests. Reports are
//! what the engine reconciles against when it comes back.

mod holder;
mod liveness;

pub use holder::{HolderState, KeepAlivePush, KeepAliveStatus, Transition};
pub use liveness::{Liveness, LivenessSignal, LogLiveness};

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{self, Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::timer::ReconcileReport;
use crate::utils::Clock;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

enum HolderCommand {
    Push(KeepAlivePush),
    Report(oneshot::Sender<ReconcileReport>),
}

/// Cloneable handle to the holder task.
#[derive(Clone)]
pub struct KeepAliveHandle {
    sender: mpsc::UnboundedSender<HolderCommand>,
    status: watch::Receiver<KeepAliveStatus>,
    cancel_token: CancellationToken,
}

impl KeepAliveHandle {
    /// Spawns the holder on the current tokio runtime.
    pub fn spawn(clock: Arc<dyn Clock>, liveness: Box<dyn LivenessSignal>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(KeepAliveStatus::default());
        let cancel_token = CancellationToken::new();

        tokio::spawn(holder_loop(
            receiver,
            status_tx,
            clock,
            liveness,
            cancel_token.clone(),
        ));

        Self {
            sender,
            status: status_rx,
            cancel_token,
        }
    }

    /// Hands the engine's state to the holder. Never blocks.
    pub fn push(&self, push: KeepAlivePush) {
        if self.sender.send(HolderCommand::Push(push)).is_err() {
            log_warn!("keep-alive holder is gone; dropped {:?} push", push.transition);
        }
    }

    /// Asks the holder for its current view of the run.
    pub async fn request_report(&self) -> Result<ReconcileReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(HolderCommand::Report(reply_tx))
            .map_err(|_| anyhow!("keep-alive holder is not running"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("keep-alive holder stopped before reporting"))
    }

    pub fn status(&self) -> watch::Receiver<KeepAliveStatus> {
        self.status.clone()
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

async fn holder_loop(
    mut receiver: mpsc::UnboundedReceiver<HolderCommand>,
    status_tx: watch::Sender<KeepAliveStatus>,
    clock: Arc<dyn Clock>,
    mut liveness: Box<dyn LivenessSignal>,
    cancel_token: CancellationToken,
) {
    let mut ticker = time::interval(STATUS_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut held = HolderState::default();

    loop {
        tokio::select! {
            command = receiver.recv() => {
                let Some(command) = command else {
                    break;
                };
                let now = clock.now_ms();
                match command {
                    HolderCommand::Push(push) => {
                        held.apply(&push);
                        match (push.transition, push.is_running) {
                            (Transition::Reset, _) => liveness.announce_stopped(),
                            (_, true) => liveness.announce_running(push.elapsed_ms),
                            (_, false) => liveness.announce_paused(push.elapsed_ms),
                        }
                        let _ = status_tx.send(held.status(now));
                        log_debug!("keep-alive push {:?} at {}ms", push.transition, push.elapsed_ms);
                    }
                    HolderCommand::Report(reply) => {
                        let _ = reply.send(held.report(now));
                    }
                }
            }
            _ = ticker.tick() => {
                let _ = status_tx.send(held.status(clock.now_ms()));
            }
            _ = cancel_token.cancelled() => {
                break;
            }
        }
    }

    liveness.announce_stopped();
    log_info!("keep-alive holder shutting down");
}
