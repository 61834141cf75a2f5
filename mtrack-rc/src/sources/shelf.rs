//! Physical bookshelf scanner
//!
//! A shelf scan is two steps: grab a frame from the shelf camera, then ask a
//! spine reader which titles are visible in it. Both steps sit behind traits
//! so either end can be replaced without touching the scanner.
//!
//! Capture failure and "no books visible" are different outcomes. A failed
//! capture is an error; an empty read is a successful, empty snapshot.

use super::{MediaSource, Snapshot, SourceError};
use crate::models::{MediaKind, RawItem, RawShelfLabel, WatermarkMode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Watermark key for this source
pub const SOURCE_NAME: &str = "shelf";

const CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);
/// Spine reading runs a vision model; allow it more time than a capture
const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// One still image of the shelf
#[derive(Debug, Clone)]
pub struct Frame {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub captured_at: DateTime<Utc>,
}

/// Produces frames of the shelf
#[async_trait]
pub trait ShelfCamera: Send + Sync {
    async fn capture(&self) -> Result<Frame, SourceError>;
}

/// Reads book titles off the spines in a frame
#[async_trait]
pub trait SpineReader: Send + Sync {
    async fn read_spines(&self, frame: &Frame) -> Result<Vec<String>, SourceError>;
}

/// Camera exposing `GET {camera_url}/capture`
pub struct HttpShelfCamera {
    http_client: Client,
    camera_url: String,
}

impl HttpShelfCamera {
    pub fn new(camera_url: String) -> Result<Self, SourceError> {
        let http_client = Client::builder()
            .timeout(CAPTURE_TIMEOUT)
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            camera_url,
        })
    }
}

#[async_trait]
impl ShelfCamera for HttpShelfCamera {
    async fn capture(&self) -> Result<Frame, SourceError> {
        let url = format!("{}/capture", self.camera_url.trim_end_matches('/'));
        let captured_at = Utc::now();

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::CaptureFailed(format!("camera unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::CaptureFailed(format!(
                "camera returned {}",
                status
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::CaptureFailed(e.to_string()))?;

        if bytes.is_empty() {
            return Err(SourceError::CaptureFailed("camera returned an empty frame".to_string()));
        }

        debug!(bytes = bytes.len(), content_type = %content_type, "Shelf frame captured");

        Ok(Frame {
            bytes: bytes.to_vec(),
            content_type,
            captured_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SpineReadResponse {
    #[serde(default)]
    titles: Vec<String>,
}

/// Spine reader service: `POST` the image, receive `{titles: [...]}`
pub struct HttpSpineReader {
    http_client: Client,
    reader_url: String,
}

impl HttpSpineReader {
    pub fn new(reader_url: String) -> Result<Self, SourceError> {
        let http_client = Client::builder()
            .timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            reader_url,
        })
    }
}

#[async_trait]
impl SpineReader for HttpSpineReader {
    async fn read_spines(&self, frame: &Frame) -> Result<Vec<String>, SourceError> {
        let response = self
            .http_client
            .post(&self.reader_url)
            .header(reqwest::header::CONTENT_TYPE, frame.content_type.as_str())
            .body(frame.bytes.clone())
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let read: SpineReadResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;

        Ok(read.titles)
    }
}

/// Shelf source: camera + spine reader
pub struct ShelfScanner {
    camera: Arc<dyn ShelfCamera>,
    reader: Arc<dyn SpineReader>,
}

impl ShelfScanner {
    pub fn new(camera: Arc<dyn ShelfCamera>, reader: Arc<dyn SpineReader>) -> Self {
        Self { camera, reader }
    }
}

#[async_trait]
impl MediaSource for ShelfScanner {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn kind(&self) -> MediaKind {
        MediaKind::PhysicalBook
    }

    fn watermark_mode(&self) -> WatermarkMode {
        WatermarkMode::SeenSet
    }

    async fn pull(&self) -> Result<Snapshot, SourceError> {
        let frame = self.camera.capture().await?;
        let titles = self.reader.read_spines(&frame).await?;

        let items: Vec<RawItem> = titles
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .map(|title| {
                RawItem::ShelfLabel(RawShelfLabel {
                    title,
                    captured_at: frame.captured_at,
                })
            })
            .collect();

        debug!(spines = items.len(), "Shelf spines read");

        Ok(Snapshot::new(items, frame.captured_at))
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;

    /// Camera returning a fixed frame, or failing
    pub struct MockCamera {
        pub fail: bool,
    }

    #[async_trait]
    impl ShelfCamera for MockCamera {
        async fn capture(&self) -> Result<Frame, SourceError> {
            if self.fail {
                return Err(SourceError::CaptureFailed("lens cap on".to_string()));
            }
            Ok(Frame {
                bytes: vec![0xFF, 0xD8],
                content_type: "image/jpeg".to_string(),
                captured_at: Utc::now(),
            })
        }
    }

    /// Reader returning fixed titles
    pub struct MockReader {
        pub titles: Vec<String>,
    }

    #[async_trait]
    impl SpineReader for MockReader {
        async fn read_spines(&self, _frame: &Frame) -> Result<Vec<String>, SourceError> {
            Ok(self.titles.clone())
        }
    }
}
