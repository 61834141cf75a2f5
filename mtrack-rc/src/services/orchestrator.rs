//! Cycle orchestrator
//!
//! Runs one reconciliation cycle through the state machine
//!
//! ```text
//! Idle → Collecting → Normalizing → Disambiguating → Reporting → Committing → Idle
//!             └────────────┴──────────────┴─────────────┴───────────┴──→ Failed
//! ```
//!
//! The orchestrator holds no watermark state of its own. `run_cycle` takes
//! the current watermarks by value and hands back the next ones inside the
//! [`CycleOutcome`]; the caller decides what to keep.
//!
//! # Commit timing
//! - Seen-set watermarks are replaced during `Collecting`, so they survive a
//!   later failure. They reflect what the shelf physically looked like.
//! - Scalar watermarks only advance in `Committing`, after the engine has
//!   answered, and only to the time the source was pulled. Item timestamps
//!   never move a watermark. A failed cycle leaves them where they were and the next cycle
//!   re-reads the same window.
//! - A source whose pull failed keeps its watermark either way.

use crate::models::{
    CanonicalItem, CycleReport, CycleSession, CycleState, MediaKind, RawItem, SourceStats,
    WatermarkMode, Watermarks,
};
use crate::services::delta::extract_delta;
use crate::services::disambiguation::{
    DisambiguationEngine, DisambiguationError, DISAMBIGUATION_INSTRUCTION,
};
use crate::services::normalizer::normalize_all;
use crate::services::reporter::{ReportError, Reporter};
use crate::sources::SourceCollector;
use chrono::{DateTime, Utc};
use mtrack_common::events::{CycleEvent, EventBus};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Cycle-fatal errors
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Disambiguation failed: {0}")]
    Disambiguation(#[from] DisambiguationError),

    #[error("A cycle is already in flight")]
    AlreadyRunning,

    #[error("Cycle task panicked: {0}")]
    Panicked(String),
}

/// How a cycle ended
#[derive(Debug)]
pub enum CycleStatus {
    /// Reached `Committing`; delivery is reported separately and never fails the cycle
    Completed {
        report: CycleReport,
        delivery: Result<(), ReportError>,
    },
    Failed {
        failed_in: CycleState,
        error: CycleError,
    },
}

/// Everything a cycle hands back to its caller
#[derive(Debug)]
pub struct CycleOutcome {
    /// Watermarks to carry into the next cycle
    pub watermarks: Watermarks,
    pub session: CycleSession,
    pub status: CycleStatus,
}

impl CycleOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, CycleStatus::Completed { .. })
    }

    pub fn report(&self) -> Option<&CycleReport> {
        match &self.status {
            CycleStatus::Completed { report, .. } => Some(report),
            CycleStatus::Failed { .. } => None,
        }
    }
}

/// New records from one successfully pulled source
struct SourceDelta {
    source: String,
    kind: MediaKind,
    items: Vec<RawItem>,
}

/// Sequences one cycle over the configured collaborators
pub struct CycleOrchestrator {
    collector: SourceCollector,
    engine: Arc<dyn DisambiguationEngine>,
    reporter: Arc<dyn Reporter>,
    event_bus: EventBus,
}

impl CycleOrchestrator {
    pub fn new(
        collector: SourceCollector,
        engine: Arc<dyn DisambiguationEngine>,
        reporter: Arc<dyn Reporter>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            collector,
            engine,
            reporter,
            event_bus,
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn source_count(&self) -> usize {
        self.collector.count()
    }

    /// Make sure every registered source has a watermark
    ///
    /// Returns the number of watermarks initialised.
    pub fn ensure_watermarks(&self, watermarks: &mut Watermarks, now: DateTime<Utc>) -> usize {
        self.collector
            .sources()
            .iter()
            .filter(|source| watermarks.ensure(source.name(), source.watermark_mode(), now))
            .count()
    }

    fn transition(&self, session: &mut CycleSession, state: CycleState, item_count: usize) {
        let transition = session.transition_to(state);

        info!(
            cycle_id = %session.cycle_id,
            from = %transition.old_state,
            to = %transition.new_state,
            items = item_count,
            "Cycle state changed"
        );

        self.event_bus.emit_lossy(CycleEvent::StateChanged {
            cycle_id: session.cycle_id,
            old_state: transition.old_state,
            new_state: transition.new_state,
            item_count,
            timestamp: transition.transitioned_at,
        });
    }

    /// Run one full cycle
    pub async fn run_cycle(&self, mut watermarks: Watermarks) -> CycleOutcome {
        let mut session = CycleSession::new();
        let cycle_id = session.cycle_id;
        let started = Utc::now();

        info!(cycle_id = %cycle_id, sources = self.collector.count(), "Starting reconciliation cycle");
        self.event_bus.emit_lossy(CycleEvent::CycleStarted {
            cycle_id,
            timestamp: started,
        });

        let initialised = self.ensure_watermarks(&mut watermarks, started);
        if initialised > 0 {
            debug!(cycle_id = %cycle_id, initialised, "Initialised watermarks for new sources");
        }

        // ── Collecting ──────────────────────────────────────────────────────
        self.transition(&mut session, CycleState::Collecting, 0);

        let mut deltas: Vec<SourceDelta> = Vec::new();
        // Scalar sources pulled this cycle, with their pull start time
        let mut scalar_commits: Vec<(String, DateTime<Utc>)> = Vec::new();

        for pull in self.collector.collect_all().await {
            let mut stats = SourceStats::new(&pull.source, pull.kind);

            let snapshot = match pull.result {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(
                        cycle_id = %cycle_id,
                        source = %pull.source,
                        error = %e,
                        "Source unavailable, watermark left unchanged"
                    );
                    self.event_bus.emit_lossy(CycleEvent::SourceFailed {
                        cycle_id,
                        source: pull.source.clone(),
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    stats.error = Some(e.to_string());
                    session.sources.push(stats);
                    continue;
                }
            };

            let watermark = watermarks
                .get(&pull.source)
                .cloned()
                .unwrap_or_else(|| pull.mode.initial(started));
            let delta = extract_delta(&snapshot.items, &watermark);

            stats.pulled = snapshot.items.len();
            stats.new = delta.new_items.len();

            match pull.mode {
                WatermarkMode::SeenSet => {
                    if snapshot.items.is_empty() {
                        info!(
                            cycle_id = %cycle_id,
                            source = %pull.source,
                            "Scan read no items, keeping previous seen-set"
                        );
                    }
                    watermarks.set(pull.source.clone(), delta.next_watermark);
                }
                WatermarkMode::Scalar => {
                    scalar_commits.push((pull.source.clone(), snapshot.captured_at));
                }
            }

            debug!(
                cycle_id = %cycle_id,
                source = %pull.source,
                pulled = stats.pulled,
                new = stats.new,
                "Delta extracted"
            );

            deltas.push(SourceDelta {
                source: pull.source,
                kind: pull.kind,
                items: delta.new_items,
            });
            session.sources.push(stats);
        }

        let raw_count: usize = deltas.iter().map(|d| d.items.len()).sum();

        // ── Normalizing ─────────────────────────────────────────────────────
        self.transition(&mut session, CycleState::Normalizing, raw_count);

        let mut union: Vec<CanonicalItem> = Vec::with_capacity(raw_count);
        for delta in &deltas {
            let (items, errors) = normalize_all(&delta.items, delta.kind);

            for (index, reason) in &errors {
                warn!(
                    cycle_id = %cycle_id,
                    source = %delta.source,
                    index = *index,
                    reason = %reason,
                    "Dropping malformed item"
                );
                self.event_bus.emit_lossy(CycleEvent::ItemDropped {
                    cycle_id,
                    source: delta.source.clone(),
                    reason: reason.to_string(),
                    timestamp: Utc::now(),
                });
            }

            if let Some(stats) = session.source_mut(&delta.source) {
                stats.dropped = errors.len();
            }
            union.extend(items);
        }

        // ── Disambiguating ──────────────────────────────────────────────────
        self.transition(&mut session, CycleState::Disambiguating, union.len());

        let resolved = match self.engine.disambiguate(&union, DISAMBIGUATION_INSTRUCTION).await {
            Ok(resolved) => resolved,
            Err(e) => {
                return self.fail(session, watermarks, CycleState::Disambiguating, e.into());
            }
        };

        // ── Reporting ───────────────────────────────────────────────────────
        self.transition(&mut session, CycleState::Reporting, resolved.len());

        let report = CycleReport::new(Utc::now(), resolved);
        session.new_items = report.len();

        let delivery = self.reporter.deliver(&report).await;
        match &delivery {
            Ok(()) => {
                info!(cycle_id = %cycle_id, items = report.len(), "Report delivered");
                session.delivered = Some(true);
            }
            Err(e) => {
                error!(
                    cycle_id = %cycle_id,
                    error = %e,
                    "Report delivery failed, cycle continues"
                );
                self.event_bus.emit_lossy(CycleEvent::ReportDeliveryFailed {
                    cycle_id,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                session.delivered = Some(false);
            }
        }

        // ── Committing ──────────────────────────────────────────────────────
        self.transition(&mut session, CycleState::Committing, report.len());

        for (source, pulled_at) in scalar_commits {
            if let Some(watermark) = watermarks.get_mut(&source) {
                if watermark.advance_to(pulled_at) {
                    debug!(cycle_id = %cycle_id, source = %source, to = %pulled_at, "Watermark advanced");
                }
            }
        }

        self.transition(&mut session, CycleState::Idle, report.len());

        info!(
            cycle_id = %cycle_id,
            new_items = report.len(),
            delivered = delivery.is_ok(),
            "Reconciliation cycle completed"
        );
        self.event_bus.emit_lossy(CycleEvent::CycleCompleted {
            cycle_id,
            new_items: report.len(),
            delivered: delivery.is_ok(),
            timestamp: Utc::now(),
        });

        CycleOutcome {
            watermarks,
            session,
            status: CycleStatus::Completed { report, delivery },
        }
    }

    fn fail(
        &self,
        mut session: CycleSession,
        watermarks: Watermarks,
        failed_in: CycleState,
        error: CycleError,
    ) -> CycleOutcome {
        session.fail(error.to_string());

        error!(
            cycle_id = %session.cycle_id,
            failed_in = %failed_in,
            error = %error,
            "Reconciliation cycle failed, scalar watermarks not committed"
        );
        self.event_bus.emit_lossy(CycleEvent::CycleFailed {
            cycle_id: session.cycle_id,
            failed_in,
            error: error.to_string(),
            timestamp: Utc::now(),
        });

        CycleOutcome {
            watermarks,
            session,
            status: CycleStatus::Failed { failed_in, error },
        }
    }
}
