//! Watermark persistence
//!
//! The runner keeps the authoritative watermarks in memory and hands a copy
//! to a [`WatermarkStore`] after every cycle. Two stores exist: one that
//! lives only as long as the process, and one backed by `mtrack.db` in the
//! root folder.

pub mod memory;
pub mod watermarks;

pub use memory::MemoryWatermarkStore;
pub use watermarks::SqliteWatermarkStore;

use crate::models::Watermarks;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to encode watermark for '{key}': {reason}")]
    Encode { key: String, reason: String },
}

/// Durable home for watermarks
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Load every stored watermark
    async fn load(&self) -> Result<Watermarks, StoreError>;

    /// Persist `watermarks`, overwriting stored entries with the same key
    async fn save(&self, watermarks: &Watermarks) -> Result<(), StoreError>;
}

/// Open (or create) the database and make sure the tables exist
pub async fn init_database_pool(db_path: &Path) -> mtrack_common::Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

async fn init_tables(pool: &SqlitePool) -> mtrack_common::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS watermarks (
            source TEXT PRIMARY KEY,
            mode TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (watermarks)");

    Ok(())
}
