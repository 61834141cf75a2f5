//! Disambiguation engine client
//!
//! The engine receives the union of every source's new items and returns the
//! resolved list: cross-source duplicates merged, near-duplicates folded.
//! Its answer is authoritative for the cycle; there is no fallback to the
//! unresolved union.
//!
//! Wire format:
//! - request: `POST {items: [CanonicalItem], instruction: string}`
//! - response: `{newItems: [CanonicalItem]}` (`new_items` also accepted)

use crate::models::CanonicalItem;
use crate::services::normalizer::validate_canonical;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Instruction sent with every request
pub const DISAMBIGUATION_INSTRUCTION: &str = "Given the list of new items in the user's media \
collection (audiobooks, music, and physical books), identify and return only the items that are \
genuinely new since the last update. Merge entries from different sources that refer to the same \
work. Do not make any recommendations or suggestions. Return the list of new items with their \
details in the same shape they were given.";

/// Disambiguation failure (fatal for the cycle)
#[derive(Debug, Error)]
pub enum DisambiguationError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Engine returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unparseable engine response: {0}")]
    Parse(String),
}

/// Cross-source duplicate resolver
#[async_trait]
pub trait DisambiguationEngine: Send + Sync {
    async fn disambiguate(
        &self,
        items: &[CanonicalItem],
        instruction: &str,
    ) -> Result<Vec<CanonicalItem>, DisambiguationError>;
}

#[derive(Debug, Serialize)]
struct DisambiguationRequest<'a> {
    items: &'a [CanonicalItem],
    instruction: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisambiguationResponse {
    #[serde(alias = "new_items")]
    new_items: Vec<serde_json::Value>,
}

/// Decode the engine's records, dropping any that are not canonical items
///
/// Returns the accepted items and the number dropped.
pub fn accept_engine_records(records: Vec<serde_json::Value>) -> (Vec<CanonicalItem>, usize) {
    let mut accepted = Vec::with_capacity(records.len());
    let mut dropped = 0;

    for (index, record) in records.into_iter().enumerate() {
        let item = serde_json::from_value::<CanonicalItem>(record)
            .map_err(|e| e.to_string())
            .and_then(|item| validate_canonical(item).map_err(|e| e.to_string()));

        match item {
            Ok(item) => accepted.push(item),
            Err(reason) => {
                warn!(index, reason = %reason, "Dropping malformed record from disambiguation engine");
                dropped += 1;
            }
        }
    }

    (accepted, dropped)
}

/// Engine reached over HTTP
pub struct HttpDisambiguationEngine {
    http_client: Client,
    url: String,
}

impl HttpDisambiguationEngine {
    /// `timeout` of `None` waits indefinitely
    pub fn new(url: String, timeout: Option<Duration>) -> Result<Self, DisambiguationError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder
            .build()
            .map_err(|e| DisambiguationError::Network(e.to_string()))?;

        Ok(Self { http_client, url })
    }
}

#[async_trait]
impl DisambiguationEngine for HttpDisambiguationEngine {
    async fn disambiguate(
        &self,
        items: &[CanonicalItem],
        instruction: &str,
    ) -> Result<Vec<CanonicalItem>, DisambiguationError> {
        debug!(url = %self.url, items = items.len(), "Sending items to disambiguation engine");

        let response = self
            .http_client
            .post(&self.url)
            .json(&DisambiguationRequest { items, instruction })
            .send()
            .await
            .map_err(|e| DisambiguationError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DisambiguationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: DisambiguationResponse = response
            .json()
            .await
            .map_err(|e| DisambiguationError::Parse(e.to_string()))?;

        let (accepted, dropped) = accept_engine_records(body.new_items);
        debug!(accepted = accepted.len(), dropped, "Disambiguation engine answered");

        Ok(accepted)
    }
}
