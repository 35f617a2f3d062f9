//! Recurring match scheduler.
//!
//! One tokio task ticks on a fixed interval and hands the current time to
//! [`LifecycleService::advance_due`]. Ticks run one after another inside that
//! task, so two ticks never touch a slot at the same time; across processes the
//! conditional status writes keep transitions single.
//!
//! The scheduler is owned, not global: the server binary creates it, starts it
//! after the store is ready and stops it on shutdown.

use crate::lifecycle::{LifecycleService, TickReport};
use chrono::{DateTime, Utc};
use slotbook_core::SlotbookError;
use slotbook_core::environment::Clock;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Shortest tick interval the scheduler runs with.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Scheduler settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between ticks; raised to [`MIN_INTERVAL`] if shorter
    pub interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Running {
    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Owned background task driving slot transitions.
pub struct MatchScheduler {
    lifecycle: Arc<LifecycleService>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    running: Mutex<Option<Running>>,
}

impl MatchScheduler {
    /// Create a stopped scheduler.
    #[must_use]
    pub fn new(lifecycle: Arc<LifecycleService>, clock: Arc<dyn Clock>, config: SchedulerConfig) -> Self {
        Self {
            lifecycle,
            clock,
            config,
            running: Mutex::new(None),
        }
    }

    /// Spawn the tick loop. Returns `false` if it was already running.
    ///
    /// A loop whose task has died is replaced.
    ///
    /// The first tick fires immediately, catching up on transitions missed
    /// while no scheduler was running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(Running::is_alive) {
            return false;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let lifecycle = Arc::clone(&self.lifecycle);
        let clock = Arc::clone(&self.clock);
        let interval = self.config.interval.max(MIN_INTERVAL);
        if interval != self.config.interval {
            tracing::warn!(
                configured_ms = self.config.interval.as_millis(),
                interval_ms = interval.as_millis(),
                "Scheduler interval too short, using the minimum"
            );
        }

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(interval_ms = interval.as_millis(), "Match scheduler started");
            while !*shutdown_rx.borrow() {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_tick(&lifecycle, clock.now()).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Match scheduler stopped");
        });

        *running = Some(Running {
            shutdown: shutdown_tx,
            handle,
        });
        true
    }

    /// Signal the loop to stop and wait for the current tick to finish.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(Running { shutdown, handle }) = running {
            let _ = shutdown.send(true);
            if let Err(error) = handle.await {
                tracing::error!(%error, "Match scheduler task failed");
            }
        }
    }

    /// `true` while the tick loop started by [`MatchScheduler::start`] is
    /// alive and not stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Running::is_alive)
    }

    /// Run one pass at `now`, outside the timer.
    ///
    /// # Errors
    ///
    /// Returns [`SlotbookError::Storage`] if the candidate slots cannot be
    /// listed.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<TickReport, SlotbookError> {
        self.lifecycle.advance_due(now).await
    }
}

impl std::fmt::Debug for MatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchScheduler")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

async fn run_tick(lifecycle: &LifecycleService, now: DateTime<Utc>) {
    match lifecycle.advance_due(now).await {
        Ok(report) if !report.transitioned.is_empty() || !report.failed.is_empty() => {
            tracing::info!(
                examined = report.examined,
                transitioned = report.transitioned.len(),
                failed = report.failed.len(),
                "Scheduler tick"
            );
        }
        Ok(report) => tracing::debug!(examined = report.examined, "Scheduler tick, nothing due"),
        Err(error) => tracing::error!(%error, "Scheduler tick failed"),
    }
}
