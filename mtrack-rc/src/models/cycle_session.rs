//! Per-cycle bookkeeping
//!
//! A `CycleSession` records the path one cycle took through the state
//! machine and what each source contributed. It is what `/status` reports
//! and what the scheduler logs once the cycle ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CycleState, MediaKind};

/// A single state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub cycle_id: Uuid,
    pub old_state: CycleState,
    pub new_state: CycleState,
    pub transitioned_at: DateTime<Utc>,
}

/// What one source contributed to a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub source: String,
    pub kind: MediaKind,
    /// Records in the pulled snapshot
    pub pulled: usize,
    /// Records past the watermark
    pub new: usize,
    /// New records rejected by normalization
    pub dropped: usize,
    /// Why the source produced no snapshot, if it failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceStats {
    pub fn new(source: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            source: source.into(),
            kind,
            pulled: 0,
            new: 0,
            dropped: 0,
            error: None,
        }
    }
}

/// One reconciliation cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSession {
    pub cycle_id: Uuid,
    pub state: CycleState,
    pub transitions: Vec<StateTransition>,
    pub sources: Vec<SourceStats>,
    /// Items handed to the reporter
    pub new_items: usize,
    /// Whether the reporter accepted the report (None until Reporting ran)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered: Option<bool>,
    /// Cycle-fatal error, if the cycle failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl CycleSession {
    pub fn new() -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            state: CycleState::Idle,
            transitions: Vec::new(),
            sources: Vec::new(),
            new_items: 0,
            delivered: None,
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Move to `new_state`, recording the transition
    pub fn transition_to(&mut self, new_state: CycleState) -> StateTransition {
        debug_assert!(
            self.state.can_transition_to(new_state),
            "illegal cycle transition {} -> {}",
            self.state,
            new_state
        );

        let transition = StateTransition {
            cycle_id: self.cycle_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;
        self.transitions.push(transition.clone());

        if self.is_terminal() {
            self.ended_at = Some(transition.transitioned_at);
        }

        transition
    }

    /// Enter `Failed` from the current state
    pub fn fail(&mut self, error: impl Into<String>) -> StateTransition {
        self.error = Some(error.into());
        self.transition_to(CycleState::Failed)
    }

    /// The state a failed cycle was in when it failed
    pub fn failed_in(&self) -> Option<CycleState> {
        self.transitions
            .iter()
            .rev()
            .find(|t| t.new_state == CycleState::Failed)
            .map(|t| t.old_state)
    }

    /// Whether the cycle visited `state` at any point
    pub fn visited(&self, state: CycleState) -> bool {
        self.transitions.iter().any(|t| t.new_state == state)
    }

    /// A cycle has ended once it has left `Idle` and either failed or returned
    pub fn is_terminal(&self) -> bool {
        match self.state {
            CycleState::Failed => true,
            CycleState::Idle => !self.transitions.is_empty(),
            _ => false,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == CycleState::Idle && self.visited(CycleState::Committing)
    }

    pub fn source_mut(&mut self, source: &str) -> Option<&mut SourceStats> {
        self.sources.iter_mut().find(|s| s.source == source)
    }
}

impl Default for CycleSession {
    fn default() -> Self {
        Self::new()
    }
}
