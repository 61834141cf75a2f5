//! Cycle runner
//!
//! Owns the authoritative watermarks between cycles and guarantees that at
//! most one cycle is in flight, whichever path triggered it (scheduler or
//! control API).
//!
//! Each cycle runs in its own task on a copy of the watermarks. The task,
//! not the caller, holds the in-flight flag and writes the outcome back, so
//! a caller that stops waiting leaves the cycle to finish on its own. A
//! cycle that panics leaves the authoritative copy untouched.

use crate::db::{StoreError, WatermarkStore};
use crate::models::{CycleSession, Watermarks};
use crate::services::orchestrator::{CycleError, CycleOrchestrator};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

/// Clears the in-flight flag when dropped, including during a panic
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CycleRunner {
    orchestrator: Arc<CycleOrchestrator>,
    store: Arc<dyn WatermarkStore>,
    watermarks: Arc<Mutex<Watermarks>>,
    in_flight: Arc<AtomicBool>,
    last_cycle: Arc<RwLock<Option<CycleSession>>>,
}

impl CycleRunner {
    pub fn new(orchestrator: Arc<CycleOrchestrator>, store: Arc<dyn WatermarkStore>) -> Self {
        Self {
            orchestrator,
            store,
            watermarks: Arc::new(Mutex::new(Watermarks::new())),
            in_flight: Arc::new(AtomicBool::new(false)),
            last_cycle: Arc::new(RwLock::new(None)),
        }
    }

    /// Load stored watermarks and initialise any the store does not know
    ///
    /// Returns the number of watermarks loaded from the store.
    pub async fn load(&self) -> Result<usize, StoreError> {
        let mut stored = self.store.load().await?;
        let loaded = stored.len();

        let initialised = self.orchestrator.ensure_watermarks(&mut stored, Utc::now());
        info!(loaded, initialised, "Watermarks ready");

        *self.watermarks.lock().await = stored;
        Ok(loaded)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Snapshot of the authoritative watermarks
    pub async fn watermarks(&self) -> Watermarks {
        self.watermarks.lock().await.clone()
    }

    pub async fn last_cycle(&self) -> Option<CycleSession> {
        self.last_cycle.read().await.clone()
    }

    pub fn orchestrator(&self) -> &Arc<CycleOrchestrator> {
        &self.orchestrator
    }

    /// Run one cycle now
    ///
    /// Returns the session of the finished cycle, completed or failed.
    /// Errors only when a cycle is already running or the cycle task panicked.
    /// Dropping the returned future does not stop the cycle.
    pub async fn run_cycle(&self) -> Result<CycleSession, CycleError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Cycle requested while another is in flight, ignoring");
            return Err(CycleError::AlreadyRunning);
        }
        let guard = InFlightGuard(Arc::clone(&self.in_flight));

        let orchestrator = Arc::clone(&self.orchestrator);
        let store = Arc::clone(&self.store);
        let watermarks = Arc::clone(&self.watermarks);
        let last_cycle = Arc::clone(&self.last_cycle);

        let task = tokio::spawn(async move {
            let _guard = guard;

            let current = watermarks.lock().await.clone();
            let outcome = orchestrator.run_cycle(current).await;

            *watermarks.lock().await = outcome.watermarks.clone();

            // The seen-set may have changed even if the cycle failed
            if let Err(e) = store.save(&outcome.watermarks).await {
                error!(error = %e, "Failed to persist watermarks, keeping in-memory copy");
            }

            *last_cycle.write().await = Some(outcome.session.clone());
            outcome.session
        });

        task.await.map_err(|e| {
            error!(error = %e, "Cycle task aborted, watermarks unchanged");
            CycleError::Panicked(e.to_string())
        })
    }
}
