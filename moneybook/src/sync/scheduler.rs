//! Sync scheduler: one background task that decides when passes run.
//!
//! Triggers come from three places and all funnel into the same loop, so
//! passes are serialized:
//!
//! - a mutation calls [`SchedulerHandle::trigger`] (never blocks),
//! - the timer fires while the queue holds live tasks,
//! - a caller asks explicitly through [`SchedulerHandle::sync_now`] or
//!   [`SchedulerHandle::refresh`].
//!
//! After a pass with failures the timer delay grows geometrically up to a
//! ceiling; a clean pass resets it. Explicit and mutation triggers are
//! never delayed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::engine::{PassReport, SyncEngine};
use super::reconcile::{ReconcileOutcome, Reconciler};
use crate::remote::RemoteLedger;

/// Default delay between timer-driven passes.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Default ceiling for the backed-off delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Timing and buffering of a [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between timer-driven passes after a clean pass.
    pub interval: Duration,
    /// Growth of the delay per consecutive failed pass. `1.0` disables
    /// backoff.
    pub backoff_factor: f64,
    /// Upper bound for the delay.
    pub max_backoff: Duration,
    /// Capacity of the trigger channel.
    pub trigger_buffer: usize,
    /// Capacity of the event channel.
    pub event_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            backoff_factor: 2.0,
            max_backoff: DEFAULT_MAX_BACKOFF,
            trigger_buffer: 8,
            event_buffer: 64,
        }
    }
}

/// Timer delay after `failures` consecutive failed passes.
#[must_use]
pub fn calculate_backoff(failures: u32, config: &SchedulerConfig) -> Duration {
    let exponent = i32::try_from(failures).unwrap_or(i32::MAX);
    let secs = config.interval.as_secs_f64() * config.backoff_factor.max(1.0).powi(exponent);
    let ceiling = config.max_backoff.max(config.interval).as_secs_f64();
    Duration::from_secs_f64(secs.min(ceiling))
}

/// Published after every pass or reconcile the scheduler runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A sync pass finished (or was skipped).
    Pass(PassReport),
    /// A reconcile finished.
    Reconciled(ReconcileOutcome),
}

enum Command {
    Trigger,
    SyncNow(oneshot::Sender<PassReport>),
    Refresh(oneshot::Sender<ReconcileOutcome>),
    Shutdown,
}

/// Cloneable handle for sending triggers to a running [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    /// Requests a pass without waiting.
    ///
    /// If the channel is full a trigger is already pending and this one is
    /// dropped.
    pub fn trigger(&self) {
        match self.tx.try_send(Command::Trigger) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("scheduler stopped, trigger dropped");
            }
        }
    }

    /// Runs a pass now and waits for its report.
    ///
    /// Returns `None` if the scheduler has stopped.
    pub async fn sync_now(&self) -> Option<PassReport> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::SyncNow(reply)).await.ok()?;
        rx.await.ok()
    }

    /// Runs a reconcile now and waits for its outcome.
    ///
    /// Returns `None` if the scheduler has stopped.
    pub async fn refresh(&self) -> Option<ReconcileOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Refresh(reply)).await.ok()?;
        rx.await.ok()
    }
}

/// Owner of the background sync task.
pub struct Scheduler {
    handle: SchedulerHandle,
    task: JoinHandle<()>,
}

impl Scheduler {
    /// Spawns the scheduler task on the current tokio runtime.
    ///
    /// Returns the scheduler and the receiving end of its event channel.
    /// Events are sent best effort: a full channel drops them.
    pub fn spawn<L>(
        engine: Arc<SyncEngine<L>>,
        config: SchedulerConfig,
    ) -> (Self, mpsc::Receiver<SyncEvent>)
    where
        L: RemoteLedger + 'static,
    {
        let (tx, rx) = mpsc::channel(config.trigger_buffer.max(1));
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let reconciler = Reconciler::new(Arc::clone(&engine));
        let task = tokio::spawn(run_loop(engine, reconciler, config, rx, event_tx));
        (
            Self {
                handle: SchedulerHandle { tx },
                task,
            },
            event_rx,
        )
    }

    /// A handle for sending triggers.
    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Stops the loop after the current pass and waits for it to exit.
    pub async fn shutdown(self) {
        if self.handle.tx.send(Command::Shutdown).await.is_err() {
            tracing::debug!("scheduler already stopped");
        }
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "scheduler task ended abnormally");
        }
    }
}

async fn run_loop<L: RemoteLedger>(
    engine: Arc<SyncEngine<L>>,
    reconciler: Reconciler<L>,
    config: SchedulerConfig,
    mut rx: mpsc::Receiver<Command>,
    events: mpsc::Sender<SyncEvent>,
) {
    tracing::info!(interval_ms = config.interval.as_millis(), "scheduler started");
    let mut failures: u32 = 0;
    loop {
        let delay = calculate_backoff(failures, &config);
        let command = tokio::select! {
            command = rx.recv() => match command {
                Some(command) => Some(command),
                None => break,
            },
            () = tokio::time::sleep(delay) => None,
        };

        let event = match command {
            None => {
                if !engine.state().queue().has_live_tasks() {
                    continue;
                }
                tracing::debug!(delay_ms = delay.as_millis(), "timer pass");
                SyncEvent::Pass(engine.run_once().await)
            }
            Some(Command::Trigger) => SyncEvent::Pass(engine.run_once().await),
            Some(Command::SyncNow(reply)) => {
                let report = engine.run_once().await;
                // The caller may have stopped waiting.
                let _ = reply.send(report);
                SyncEvent::Pass(report)
            }
            Some(Command::Refresh(reply)) => {
                let outcome = reconciler.reconcile().await;
                let _ = reply.send(outcome.clone());
                SyncEvent::Reconciled(outcome)
            }
            Some(Command::Shutdown) => break,
        };

        let failed = match &event {
            SyncEvent::Pass(PassReport::Completed(summary))
            | SyncEvent::Reconciled(ReconcileOutcome::Merged { pass: summary, .. }) => {
                Some(summary.had_failures())
            }
            SyncEvent::Reconciled(ReconcileOutcome::Aborted { .. }) => Some(true),
            SyncEvent::Pass(PassReport::Skipped)
            | SyncEvent::Reconciled(ReconcileOutcome::Skipped) => None,
        };
        match failed {
            Some(true) => failures = failures.saturating_add(1),
            Some(false) => failures = 0,
            None => {}
        }

        // Best effort: a full channel drops the event.
        let _ = events.try_send(event);
    }
    tracing::info!("scheduler stopped");
}
