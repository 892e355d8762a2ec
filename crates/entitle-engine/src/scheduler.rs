//! # Daily Scheduler
//!
//! Fires the reconciliation and quota reset jobs once a day at their
//! configured wall-clock hours.
//!
//! ```text
//! ┌──────────────────────┐      ┌──────────────────────┐
//! │  reconcile task      │      │  reset task          │
//! │  sleep → run → loop  │      │  sleep → run → loop  │
//! └──────────▲───────────┘      └──────────▲───────────┘
//!            │ shutdown (mpsc)             │ shutdown (mpsc)
//!            └──────────── SchedulerHandle ┘
//! ```
//!
//! Each task runs its job to completion before computing the next fire
//! time, so two runs of the same job never overlap.

use std::time::Duration as StdDuration;

use chrono::{FixedOffset, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::reconcile::Reconciler;
use crate::reset::QuotaResetter;
use crate::store::EngineStore;
use crate::window::next_daily_run;

/// Spawns the daily job tasks.
pub struct Scheduler;

/// Handle for stopping the scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    reconcile_shutdown: mpsc::Sender<()>,
    reset_shutdown: mpsc::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Starts both jobs on the current tokio runtime.
    pub fn spawn<S: EngineStore>(store: S, config: &EngineConfig) -> EngineResult<SchedulerHandle> {
        config.validate()?;
        let offset = config.schedule.offset()?;

        let reconciler = Reconciler::from_config(store.clone(), config)?;
        let resetter = QuotaResetter::new(store);

        let (reconcile_shutdown, reconcile_rx) = mpsc::channel(1);
        let (reset_shutdown, reset_rx) = mpsc::channel(1);

        let reconcile_hour = config.schedule.reconcile_hour;
        let reset_hour = config.schedule.reset_hour;

        info!(
            reconcile_hour,
            reset_hour,
            utc_offset_minutes = config.schedule.utc_offset_minutes,
            "Scheduler starting"
        );

        let tasks = vec![
            tokio::spawn(run_reconcile_loop(
                reconciler,
                reconcile_hour,
                offset,
                reconcile_rx,
            )),
            tokio::spawn(run_reset_loop(resetter, reset_hour, offset, reset_rx)),
        ];

        Ok(SchedulerHandle {
            reconcile_shutdown,
            reset_shutdown,
            tasks,
        })
    }
}

impl SchedulerHandle {
    /// Stops both tasks and waits for them.
    ///
    /// A job that is mid-run finishes first.
    pub async fn shutdown(self) -> EngineResult<()> {
        for tx in [&self.reconcile_shutdown, &self.reset_shutdown] {
            if tx.send(()).await.is_err() {
                warn!("Scheduler task already stopped");
            }
        }

        for task in self.tasks {
            task.await
                .map_err(|e| EngineError::ChannelError(format!("Scheduler task failed: {}", e)))?;
        }

        info!("Scheduler stopped");
        Ok(())
    }
}

/// Sleeps until the next `hour:00` in `offset`.
///
/// Returns false if shutdown was requested first.
async fn wait_for_next_run(
    job: &'static str,
    hour: u32,
    offset: FixedOffset,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> EngineResult<bool> {
    let now = Utc::now();
    let next = next_daily_run(now, hour, offset)?;
    let delay = (next - now).to_std().unwrap_or(StdDuration::ZERO);

    info!(job, next_run = %next, "Next run scheduled");

    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(true),
        _ = shutdown_rx.recv() => Ok(false),
    }
}

async fn run_reconcile_loop<S: EngineStore>(
    mut reconciler: Reconciler<S>,
    hour: u32,
    offset: FixedOffset,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        match wait_for_next_run("reconcile", hour, offset, &mut shutdown_rx).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                error!(error = %e, "Cannot compute next reconciliation time");
                break;
            }
        }

        match reconciler.run_scheduled(Utc::now()).await {
            Ok(report) => info!(
                window_start = %report.window_start,
                window_end = %report.window_end,
                processed = report.total_processed,
                created = report.created,
                revoked = report.revoked,
                failures = report.failures.len(),
                "Scheduled reconciliation finished"
            ),
            Err(e) => error!(error = %e, "Scheduled reconciliation failed"),
        }
    }

    info!("Reconcile task stopped");
}

async fn run_reset_loop<S: EngineStore>(
    resetter: QuotaResetter<S>,
    hour: u32,
    offset: FixedOffset,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        match wait_for_next_run("reset", hour, offset, &mut shutdown_rx).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                error!(error = %e, "Cannot compute next reset time");
                break;
            }
        }

        if let Err(e) = resetter.reset_daily_quota().await {
            error!(error = %e, "Scheduled quota reset failed");
        }
    }

    info!("Reset task stopped");
}
