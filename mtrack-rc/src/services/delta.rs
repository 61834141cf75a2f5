//! Delta extraction
//!
//! Given a source snapshot and that source's watermark, decide which records
//! are new. Pure: no I/O, no clock, no mutation of the inputs.
//!
//! - Scalar (`Since`): keep records observed strictly after the watermark.
//!   Records without a usable time are kept so the normalizer can reject
//!   them visibly. The watermark itself is advanced at commit time, not here.
//! - Seen-set (`Seen`): keep records whose identity is not in the set. The
//!   next watermark is the snapshot's identity set, replacing the old one.
//!   An empty snapshot reports nothing and leaves the set alone.

use crate::models::{RawItem, Watermark};
use std::collections::BTreeSet;

/// New records plus the watermark to carry forward
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub new_items: Vec<RawItem>,
    pub next_watermark: Watermark,
}

impl Delta {
    fn unchanged(watermark: &Watermark) -> Self {
        Self {
            new_items: Vec::new(),
            next_watermark: watermark.clone(),
        }
    }
}

/// Compute the records in `snapshot` that lie past `watermark`
pub fn extract_delta(snapshot: &[RawItem], watermark: &Watermark) -> Delta {
    match watermark {
        Watermark::Since { timestamp } => Delta {
            new_items: snapshot
                .iter()
                .filter(|item| match item.observed_at() {
                    Some(at) => at > *timestamp,
                    None => true,
                })
                .cloned()
                .collect(),
            next_watermark: watermark.clone(),
        },
        Watermark::Seen { titles } => {
            if snapshot.is_empty() {
                return Delta::unchanged(watermark);
            }

            let new_items = snapshot
                .iter()
                .filter(|item| match item.identity() {
                    Some(id) => !titles.contains(id),
                    None => true,
                })
                .cloned()
                .collect();

            let observed: BTreeSet<String> = snapshot
                .iter()
                .filter_map(RawItem::identity)
                .map(str::to_string)
                .collect();

            Delta {
                new_items,
                next_watermark: Watermark::Seen { titles: observed },
            }
        }
    }
}
