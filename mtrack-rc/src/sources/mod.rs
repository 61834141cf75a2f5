//! Source adapters
//!
//! Every media source implements [`MediaSource`]: a single `pull` returning
//! the items currently visible from that source. Adapters are swappable
//! strategies; the orchestrator only ever sees the trait.
//!
//! # Adapters
//! - **audiobook** - self-hosted audiobook library endpoint
//! - **music** - Spotify Web API recently-played history
//! - **shelf** - camera frame + spine reader for physical books
//!
//! # Failure isolation
//! [`SourceCollector`] pulls all sources concurrently and joins them. A
//! failing source yields an error entry for that source only; the others
//! are unaffected.

pub mod audiobook;
pub mod music;
pub mod shelf;

pub use audiobook::AudiobookLibraryClient;
pub use music::SpotifyClient;
pub use shelf::{Frame, HttpShelfCamera, HttpSpineReader, ShelfCamera, ShelfScanner, SpineReader};

use crate::config::ReconcilerConfig;
use crate::models::{MediaKind, RawItem, WatermarkMode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Items visible from one source at one moment
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub items: Vec<RawItem>,
    /// When the pull started
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(items: Vec<RawItem>, captured_at: DateTime<Utc>) -> Self {
        Self { items, captured_at }
    }
}

/// Decode each record of a provider array on its own
///
/// A record that does not fit `T` at all becomes `T::default()`, which the
/// normalizer then rejects like any other incomplete record.
pub(crate) fn decode_records<T>(source: &str, records: Vec<serde_json::Value>) -> Vec<T>
where
    T: DeserializeOwned + Default,
{
    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            serde_json::from_value(record).unwrap_or_else(|e| {
                warn!(source, index, error = %e, "Unreadable record, keeping it as empty");
                T::default()
            })
        })
        .collect()
}

/// Why a source produced no snapshot
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// The camera produced no usable frame (distinct from reading zero books)
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Source task failed: {0}")]
    Internal(String),
}

/// A pullable media source
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Stable name, used as the watermark key
    fn name(&self) -> &str;

    fn kind(&self) -> MediaKind;

    fn watermark_mode(&self) -> WatermarkMode;

    /// Pull the current snapshot
    async fn pull(&self) -> Result<Snapshot, SourceError>;
}

/// Result of pulling one source
#[derive(Debug)]
pub struct SourcePull {
    pub source: String,
    pub kind: MediaKind,
    pub mode: WatermarkMode,
    pub result: Result<Snapshot, SourceError>,
}

/// Pulls every source concurrently and waits for all of them
pub struct SourceCollector {
    sources: Vec<Arc<dyn MediaSource>>,
}

impl SourceCollector {
    pub fn new(sources: Vec<Arc<dyn MediaSource>>) -> Self {
        Self { sources }
    }

    pub fn sources(&self) -> &[Arc<dyn MediaSource>] {
        &self.sources
    }

    pub fn count(&self) -> usize {
        self.sources.len()
    }

    /// Pull all sources; results keep source registration order
    pub async fn collect_all(&self) -> Vec<SourcePull> {
        let futures = self.sources.iter().map(|source| {
            let source = Arc::clone(source);
            async move {
                let name = source.name().to_string();
                // A panicking adapter degrades to a failed pull
                let task = tokio::spawn({
                    let source = Arc::clone(&source);
                    async move { source.pull().await }
                });
                let result = match task.await {
                    Ok(result) => result,
                    Err(e) => Err(SourceError::Internal(e.to_string())),
                };

                match &result {
                    Ok(snapshot) => debug!(
                        source = %name,
                        items = snapshot.items.len(),
                        "Source pull succeeded"
                    ),
                    Err(e) => warn!(
                        source = %name,
                        error = %e,
                        "Source pull failed, source contributes nothing this cycle"
                    ),
                }

                SourcePull {
                    source: name,
                    kind: source.kind(),
                    mode: source.watermark_mode(),
                    result,
                }
            }
        });

        join_all(futures).await
    }
}

/// Build the configured sources
///
/// A source whose settings are absent is skipped with a warning.
pub fn build_sources(config: &ReconcilerConfig) -> Result<Vec<Arc<dyn MediaSource>>, SourceError> {
    let mut sources: Vec<Arc<dyn MediaSource>> = Vec::new();

    match &config.audiobook {
        Some(settings) => {
            sources.push(Arc::new(AudiobookLibraryClient::new(
                settings.library_url.clone(),
                settings.token.clone(),
            )?));
            info!("Audiobook source enabled ({})", settings.library_url);
        }
        None => warn!("Audiobook library URL not configured, audiobook source disabled"),
    }

    match &config.music {
        Some(settings) => {
            sources.push(Arc::new(SpotifyClient::new(settings.clone())?));
            info!("Music source enabled");
        }
        None => warn!("Music credentials not configured, music source disabled"),
    }

    match &config.shelf {
        Some(settings) => {
            let camera = HttpShelfCamera::new(settings.camera_url.clone())?;
            let reader = HttpSpineReader::new(settings.reader_url.clone())?;
            sources.push(Arc::new(ShelfScanner::new(Arc::new(camera), Arc::new(reader))));
            info!("Shelf source enabled ({})", settings.camera_url);
        }
        None => warn!("Shelf camera not configured, shelf source disabled"),
    }

    Ok(sources)
}

// ============================================================================
// Mock Source for Testing
// ============================================================================


#[cfg(test)]
mod tests {
    use super::mock::{MockSource, PanickingSource};
    use super::*;
    use crate::models::RawAudiobook;
    use serde_json::json;

    fn book(title: &str) -> RawItem {
        RawItem::Audiobook(RawAudiobook {
            title: Some(title.to_string()),
            author: Some("Author".to_string()),
            date_added: Some(Utc::now()),
        })
    }

    #[tokio::test]
    async fn test_collect_all_keeps_order_and_isolates_failures() {
        let sources: Vec<Arc<dyn MediaSource>> = vec![
            Arc::new(MockSource::new(
                "audiobook",
                MediaKind::Audiobook,
                vec![book("A"), book("B")],
            )),
            Arc::new(MockSource::failing("music", MediaKind::Music)),
            Arc::new(MockSource::new("shelf", MediaKind::PhysicalBook, vec![])),
        ];

        let pulls = SourceCollector::new(sources).collect_all().await;

        assert_eq!(pulls.len(), 3);
        assert_eq!(pulls[0].source, "audiobook");
        assert_eq!(pulls[0].result.as_ref().unwrap().items.len(), 2);
        assert_eq!(pulls[1].source, "music");
        assert!(pulls[1].result.is_err());
        assert_eq!(pulls[2].mode, WatermarkMode::SeenSet);
        assert!(pulls[2].result.is_ok());
    }

    #[tokio::test]
    async fn test_panicking_source_becomes_failed_pull() {
        let sources: Vec<Arc<dyn MediaSource>> = vec![
            Arc::new(PanickingSource),
            Arc::new(MockSource::new("audiobook", MediaKind::Audiobook, vec![book("A")])),
        ];

        let pulls = SourceCollector::new(sources).collect_all().await;

        assert!(matches!(pulls[0].result, Err(SourceError::Internal(_))));
        assert!(pulls[1].result.is_ok());
    }

    #[test]
    fn test_decode_records_keeps_wrongly_typed_records() {
        let records = vec![
            json!({"title": "Dune", "author": "Frank Herbert", "date_added": "2024-05-01T08:00:00Z"}),
            json!({"title": 42, "author": "Nobody"}),
            json!("not an object"),
        ];

        let books: Vec<RawAudiobook> = decode_records("audiobook", records);

        assert_eq!(books.len(), 3);
        assert_eq!(books[0].title.as_deref(), Some("Dune"));
        assert_eq!(books[1], RawAudiobook::default());
        assert_eq!(books[2], RawAudiobook::default());
    }
}
