//! Fixed-period scheduler
//!
//! Run a cycle, log how it went, sleep the full period, repeat. No back-off,
//! no jitter, no early retry after a failure. Shutdown is only observed
//! between cycles; a running cycle always reaches a terminal state.

use crate::models::CycleSession;
use crate::services::runner::CycleRunner;
use mtrack_common::time::format_period;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Scheduler {
    runner: Arc<CycleRunner>,
    period: Duration,
}

impl Scheduler {
    pub fn new(runner: Arc<CycleRunner>, period: Duration) -> Self {
        Self { runner, period }
    }

    /// Run one cycle and log the result
    ///
    /// Never fails: every cycle error is logged here and swallowed.
    pub async fn run_once(&self) -> Option<CycleSession> {
        match self.runner.run_cycle().await {
            Ok(session) if session.succeeded() => {
                info!(
                    cycle_id = %session.cycle_id,
                    new_items = session.new_items,
                    delivered = session.delivered.unwrap_or(false),
                    "Cycle finished"
                );
                Some(session)
            }
            Ok(session) => {
                error!(
                    cycle_id = %session.cycle_id,
                    failed_in = ?session.failed_in(),
                    error = session.error.as_deref().unwrap_or("unknown"),
                    "Cycle failed, retrying next period"
                );
                Some(session)
            }
            Err(e) => {
                warn!(error = %e, "Cycle did not run to completion");
                None
            }
        }
    }

    /// Loop until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(period = %format_period(self.period), "Scheduler started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            self.run_once().await;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.period) => {}
            }
        }

        info!("Scheduler stopped");
    }
}
