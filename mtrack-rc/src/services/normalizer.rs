//! Raw record → canonical item
//!
//! One rule per source shape. A record that cannot be mapped fails with
//! [`MalformedItemError`]; callers drop that record and carry on.

use crate::models::{CanonicalItem, MediaKind, RawItem};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Creator assigned to books read off a shelf
pub const UNKNOWN_CREATOR: &str = "Unknown";

/// Why a record could not be normalized
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedItemError {
    #[error("missing or blank field '{0}'")]
    MissingField(&'static str),

    #[error("missing or unparseable timestamp")]
    MissingTimestamp,

    #[error("{found} record delivered by a {expected} source")]
    KindMismatch { expected: MediaKind, found: MediaKind },

    #[error("invalid record: {0}")]
    Invalid(String),
}

fn required(value: Option<&str>, field: &'static str) -> Result<String, MalformedItemError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(MalformedItemError::MissingField(field))
}

fn timestamp(value: Option<DateTime<Utc>>) -> Result<DateTime<Utc>, MalformedItemError> {
    value.ok_or(MalformedItemError::MissingTimestamp)
}

/// Map one raw record from a source of kind `source_kind`
pub fn normalize(raw: &RawItem, source_kind: MediaKind) -> Result<CanonicalItem, MalformedItemError> {
    if raw.kind() != source_kind {
        return Err(MalformedItemError::KindMismatch {
            expected: source_kind,
            found: raw.kind(),
        });
    }

    match raw {
        RawItem::Audiobook(book) => Ok(CanonicalItem {
            title: required(book.title.as_deref(), "title")?,
            creator: required(book.author.as_deref(), "author")?,
            kind: MediaKind::Audiobook,
            observed_at: timestamp(book.date_added)?,
        }),
        RawItem::Track(track) => Ok(CanonicalItem {
            title: required(track.track.as_deref(), "track")?,
            creator: required(track.artist.as_deref(), "artist")?,
            kind: MediaKind::Music,
            observed_at: timestamp(track.played_at)?,
        }),
        RawItem::ShelfLabel(label) => Ok(CanonicalItem {
            title: required(Some(&label.title), "title")?,
            creator: UNKNOWN_CREATOR.to_string(),
            kind: MediaKind::PhysicalBook,
            observed_at: label.captured_at,
        }),
    }
}

/// Re-check a canonical item received from outside (e.g. the engine's reply)
///
/// Trims text fields and rejects blank ones.
pub fn validate_canonical(item: CanonicalItem) -> Result<CanonicalItem, MalformedItemError> {
    Ok(CanonicalItem {
        title: required(Some(&item.title), "title")?,
        creator: required(Some(&item.creator), "creator")?,
        ..item
    })
}

/// Normalize a batch, splitting it into accepted items and per-record errors
///
/// Errors carry the index of the offending record in `raw`.
pub fn normalize_all(
    raw: &[RawItem],
    source_kind: MediaKind,
) -> (Vec<CanonicalItem>, Vec<(usize, MalformedItemError)>) {
    let mut items = Vec::with_capacity(raw.len());
    let mut errors = Vec::new();

    for (index, record) in raw.iter().enumerate() {
        match normalize(record, source_kind) {
            Ok(item) => items.push(item),
            Err(e) => errors.push((index, e)),
        }
    }

    (items, errors)
}
