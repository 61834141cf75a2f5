//! Audiobook library client
//!
//! Pulls the user's audiobook library from a self-hosted library endpoint
//! that answers `GET` with a JSON array of `{title, author, date_added}`.
//! Only the array itself must parse. Each record is decoded on its own and
//! kept even when its fields are unusable; the normalizer rejects them one
//! by one.

use super::{decode_records, MediaSource, Snapshot, SourceError};
use crate::models::{MediaKind, RawAudiobook, RawItem, WatermarkMode};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Watermark key for this source
pub const SOURCE_NAME: &str = "audiobook";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("mtrack/", env!("CARGO_PKG_VERSION"));

/// Audiobook library endpoint client
pub struct AudiobookLibraryClient {
    http_client: Client,
    library_url: String,
    token: Option<String>,
}

impl AudiobookLibraryClient {
    pub fn new(library_url: String, token: Option<String>) -> Result<Self, SourceError> {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            library_url,
            token,
        })
    }

    /// Fetch the full library
    pub async fn fetch_library(&self) -> Result<Vec<RawAudiobook>, SourceError> {
        debug!(url = %self.library_url, "Fetching audiobook library");

        let mut request = self.http_client.get(&self.library_url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let status = response.status();
        if status == 401 || status == 403 {
            return Err(SourceError::Auth(format!(
                "library endpoint rejected credentials ({})",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let records: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;

        Ok(decode_records(SOURCE_NAME, records))
    }
}

#[async_trait]
impl MediaSource for AudiobookLibraryClient {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Audiobook
    }

    fn watermark_mode(&self) -> WatermarkMode {
        WatermarkMode::Scalar
    }

    async fn pull(&self) -> Result<Snapshot, SourceError> {
        let captured_at = Utc::now();
        let library = self.fetch_library().await?;

        debug!(books = library.len(), "Audiobook library fetched");

        Ok(Snapshot::new(
            library.into_iter().map(RawItem::Audiobook).collect(),
            captured_at,
        ))
    }
}
