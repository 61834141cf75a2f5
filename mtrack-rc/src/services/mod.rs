//! Reconciliation services
//!
//! Pipeline stages (delta extraction, normalization, disambiguation,
//! reporting) and the machinery that drives them (orchestrator, runner,
//! scheduler).

pub mod delta;
pub mod disambiguation;
pub mod normalizer;
pub mod orchestrator;
pub mod reporter;
pub mod runner;
pub mod scheduler;

pub use delta::{extract_delta, Delta};
pub use disambiguation::{
    DisambiguationEngine, DisambiguationError, HttpDisambiguationEngine,
    DISAMBIGUATION_INSTRUCTION,
};
pub use normalizer::{normalize, normalize_all, MalformedItemError};
pub use orchestrator::{CycleError, CycleOrchestrator, CycleOutcome, CycleStatus};
pub use reporter::{HttpReporter, ReportError, Reporter};
pub use runner::CycleRunner;
pub use scheduler::Scheduler;
