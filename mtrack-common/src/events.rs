//! Cycle event types and EventBus
//!
//! The reconciler broadcasts one event per state transition and per
//! non-fatal failure. Subscribers (logging, the control API, tests) observe
//! the cycle without reaching into its state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Reconciliation cycle state
///
/// `Idle → Collecting → Normalizing → Disambiguating → Reporting → Committing → Idle`,
/// with `Failed` reachable from every non-idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Collecting,
    Normalizing,
    Disambiguating,
    Reporting,
    Committing,
    Failed,
}

impl CycleState {
    /// Whether `self → next` is an edge of the state machine
    pub fn can_transition_to(self, next: CycleState) -> bool {
        use CycleState::*;
        match (self, next) {
            (Idle, Collecting)
            | (Collecting, Normalizing)
            | (Normalizing, Disambiguating)
            | (Disambiguating, Reporting)
            | (Reporting, Committing)
            | (Committing, Idle)
            | (Failed, Idle) => true,
            (from, Failed) => from != Idle && from != Failed,
            _ => false,
        }
    }
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::Collecting => "collecting",
            CycleState::Normalizing => "normalizing",
            CycleState::Disambiguating => "disambiguating",
            CycleState::Reporting => "reporting",
            CycleState::Committing => "committing",
            CycleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Events emitted by the reconciler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CycleEvent {
    CycleStarted {
        cycle_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    StateChanged {
        cycle_id: Uuid,
        old_state: CycleState,
        new_state: CycleState,
        /// Number of items carried into the new state
        item_count: usize,
        timestamp: DateTime<Utc>,
    },
    /// A source produced no snapshot this cycle
    SourceFailed {
        cycle_id: Uuid,
        source: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A single record was rejected by normalization
    ItemDropped {
        cycle_id: Uuid,
        source: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    CycleCompleted {
        cycle_id: Uuid,
        new_items: usize,
        delivered: bool,
        timestamp: DateTime<Utc>,
    },
    CycleFailed {
        cycle_id: Uuid,
        failed_in: CycleState,
        error: String,
        timestamp: DateTime<Utc>,
    },
    ReportDeliveryFailed {
        cycle_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl CycleEvent {
    /// Event name, used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            CycleEvent::CycleStarted { .. } => "CycleStarted",
            CycleEvent::StateChanged { .. } => "StateChanged",
            CycleEvent::SourceFailed { .. } => "SourceFailed",
            CycleEvent::ItemDropped { .. } => "ItemDropped",
            CycleEvent::CycleCompleted { .. } => "CycleCompleted",
            CycleEvent::CycleFailed { .. } => "CycleFailed",
            CycleEvent::ReportDeliveryFailed { .. } => "ReportDeliveryFailed",
        }
    }

    pub fn cycle_id(&self) -> Uuid {
        match self {
            CycleEvent::CycleStarted { cycle_id, .. }
            | CycleEvent::StateChanged { cycle_id, .. }
            | CycleEvent::SourceFailed { cycle_id, .. }
            | CycleEvent::ItemDropped { cycle_id, .. }
            | CycleEvent::CycleCompleted { cycle_id, .. }
            | CycleEvent::CycleFailed { cycle_id, .. }
            | CycleEvent::ReportDeliveryFailed { cycle_id, .. } => *cycle_id,
        }
    }
}

/// Broadcast bus for [`CycleEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CycleEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<CycleEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; errors if nobody is subscribed
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: CycleEvent) -> Result<usize, broadcast::error::SendError<CycleEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: CycleEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
