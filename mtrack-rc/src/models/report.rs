//! Daily "what's new" report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CanonicalItem;

/// Result of one successful cycle
///
/// Immutable once built; serialized as `{date, newItems}` for the reporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    date: DateTime<Utc>,
    new_items: Vec<CanonicalItem>,
}

impl CycleReport {
    pub fn new(date: DateTime<Utc>, new_items: Vec<CanonicalItem>) -> Self {
        Self { date, new_items }
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    pub fn new_items(&self) -> &[CanonicalItem] {
        &self.new_items
    }

    pub fn len(&self) -> usize {
        self.new_items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.new_items.is_empty()
    }
}
