//! Per-source watermarks
//!
//! A watermark marks how much of a source has already been reconciled.
//! Two shapes exist:
//! - `Since`: a scalar "last update" timestamp. Moves forward only.
//! - `Seen`: the set of item identities observed in the last usable scan.
//!   Replaced wholesale on every observation, never merged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Which watermark shape a source uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkMode {
    Scalar,
    SeenSet,
}

impl WatermarkMode {
    /// Watermark used when a source has never been reconciled
    ///
    /// Scalar sources start one day before `now`; seen-set sources start empty.
    pub fn initial(self, now: DateTime<Utc>) -> Watermark {
        match self {
            WatermarkMode::Scalar => Watermark::Since {
                timestamp: mtrack_common::time::one_day_before(now),
            },
            WatermarkMode::SeenSet => Watermark::Seen {
                titles: BTreeSet::new(),
            },
        }
    }
}

/// Cursor for one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Watermark {
    Since { timestamp: DateTime<Utc> },
    Seen { titles: BTreeSet<String> },
}

impl Watermark {
    pub fn mode(&self) -> WatermarkMode {
        match self {
            Watermark::Since { .. } => WatermarkMode::Scalar,
            Watermark::Seen { .. } => WatermarkMode::SeenSet,
        }
    }

    /// Move a scalar watermark forward to `to`
    ///
    /// Returns true if the watermark changed. Never moves backwards; a
    /// seen-set watermark is left untouched.
    pub fn advance_to(&mut self, to: DateTime<Utc>) -> bool {
        match self {
            Watermark::Since { timestamp } if to > *timestamp => {
                *timestamp = to;
                true
            }
            _ => false,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Watermark::Since { timestamp } => Some(*timestamp),
            Watermark::Seen { .. } => None,
        }
    }

    pub fn seen(&self) -> Option<&BTreeSet<String>> {
        match self {
            Watermark::Seen { titles } => Some(titles),
            Watermark::Since { .. } => None,
        }
    }
}

/// Watermarks for every source, keyed by source name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermarks {
    sources: BTreeMap<String, Watermark>,
}

impl Watermarks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: &str) -> Option<&Watermark> {
        self.sources.get(source)
    }

    pub fn get_mut(&mut self, source: &str) -> Option<&mut Watermark> {
        self.sources.get_mut(source)
    }

    pub fn set(&mut self, source: impl Into<String>, watermark: Watermark) {
        self.sources.insert(source.into(), watermark);
    }

    /// Make sure `source` has a watermark of the given mode
    ///
    /// A missing entry, or one stored under a different mode, is replaced by
    /// the initial watermark for `mode`. Returns true if anything changed.
    pub fn ensure(&mut self, source: &str, mode: WatermarkMode, now: DateTime<Utc>) -> bool {
        match self.sources.get(source) {
            Some(existing) if existing.mode() == mode => false,
            _ => {
                self.sources.insert(source.to_string(), mode.initial(now));
                true
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Watermark)> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl FromIterator<(String, Watermark)> for Watermarks {
    fn from_iter<I: IntoIterator<Item = (String, Watermark)>>(iter: I) -> Self {
        Self {
            sources: iter.into_iter().collect(),
        }
    }
}
