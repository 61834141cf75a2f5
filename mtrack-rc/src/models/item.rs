//! Media item shapes
//!
//! Each source produces its own raw record shape. Raw records are parsed
//! leniently so that one bad record never sinks a whole snapshot; the
//! normalizer decides later whether a record is usable.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Kind of media an item represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audiobook,
    Music,
    PhysicalBook,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MediaKind::Audiobook => "audiobook",
            MediaKind::Music => "music",
            MediaKind::PhysicalBook => "physical_book",
        })
    }
}

/// Normalized, source-agnostic media item
///
/// Not a primary key: two items with similar titles from different sources
/// may be the same object. Resolving that is the disambiguation engine's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalItem {
    pub title: String,
    pub creator: String,
    #[serde(alias = "type")]
    pub kind: MediaKind,
    #[serde(alias = "observed_at", alias = "timestamp")]
    pub observed_at: DateTime<Utc>,
}

/// Audiobook library record: `{title, author, date_added}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAudiobook {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "creator")]
    pub author: Option<String>,
    #[serde(default, alias = "added_at", deserialize_with = "lenient_timestamp")]
    pub date_added: Option<DateTime<Utc>>,
}

/// Recently played track: `{track, artist, played_at}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTrack {
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub played_at: Option<DateTime<Utc>>,
}

/// Spine label read from a shelf photograph
///
/// Labels carry no inherent timestamp; `captured_at` is the frame time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawShelfLabel {
    pub title: String,
    pub captured_at: DateTime<Utc>,
}

/// A record as pulled from a source, before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum RawItem {
    Audiobook(RawAudiobook),
    Track(RawTrack),
    ShelfLabel(RawShelfLabel),
}

impl RawItem {
    /// Observation time, if the record carries a usable one
    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            RawItem::Audiobook(book) => book.date_added,
            RawItem::Track(track) => track.played_at,
            RawItem::ShelfLabel(label) => Some(label.captured_at),
        }
    }

    /// Identity used by seen-set watermarks (the trimmed title)
    pub fn identity(&self) -> Option<&str> {
        let title = match self {
            RawItem::Audiobook(book) => book.title.as_deref(),
            RawItem::Track(track) => track.track.as_deref(),
            RawItem::ShelfLabel(label) => Some(label.title.as_str()),
        };
        title.map(str::trim).filter(|t| !t.is_empty())
    }

    /// Media kind implied by the record shape
    pub fn kind(&self) -> MediaKind {
        match self {
            RawItem::Audiobook(_) => MediaKind::Audiobook,
            RawItem::Track(_) => MediaKind::Music,
            RawItem::ShelfLabel(_) => MediaKind::PhysicalBook,
        }
    }
}

/// Accepts RFC 3339, naive ISO-8601 (read as UTC) or unix seconds; anything
/// else becomes `None` instead of failing the surrounding document.
pub fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| parse_timestamp_value(&v)))
}

fn parse_timestamp_value(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => parse_timestamp_str(s),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}
