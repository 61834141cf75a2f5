//! Report delivery
//!
//! Best effort: a failed delivery is logged by the caller and never retried
//! within the cycle.

use crate::models::CycleReport;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Report endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Delivers a finished report
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn deliver(&self, report: &CycleReport) -> Result<(), ReportError>;
}

/// Posts `{date, newItems}` to the report endpoint
pub struct HttpReporter {
    http_client: Client,
    url: String,
}

impl HttpReporter {
    pub fn new(url: String) -> Result<Self, ReportError> {
        let http_client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ReportError::Network(e.to_string()))?;

        Ok(Self { http_client, url })
    }
}

#[async_trait]
impl Reporter for HttpReporter {
    async fn deliver(&self, report: &CycleReport) -> Result<(), ReportError> {
        debug!(url = %self.url, items = report.len(), "Delivering cycle report");

        let response = self
            .http_client
            .post(&self.url)
            .json(report)
            .send()
            .await
            .map_err(|e| ReportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}
