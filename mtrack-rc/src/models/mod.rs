//! Data models for the reconciler

pub mod cycle_session;
pub mod item;
pub mod report;
pub mod watermark;

pub use cycle_session::{CycleSession, SourceStats, StateTransition};
pub use item::{CanonicalItem, MediaKind, RawAudiobook, RawItem, RawShelfLabel, RawTrack};
pub use mtrack_common::events::CycleState;
pub use report::CycleReport;
pub use watermark::{Watermark, WatermarkMode, Watermarks};
