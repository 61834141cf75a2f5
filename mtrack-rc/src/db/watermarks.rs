//! SQLite watermark store
//!
//! One row per source. `value` holds the watermark as JSON so both shapes
//! share a table; `mode` duplicates the tag for ad-hoc inspection.

use super::{StoreError, WatermarkStore};
use crate::models::{Watermark, Watermarks};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

pub struct SqliteWatermarkStore {
    pool: SqlitePool,
}

impl SqliteWatermarkStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn mode_name(watermark: &Watermark) -> &'static str {
    match watermark {
        Watermark::Since { .. } => "scalar",
        Watermark::Seen { .. } => "seen_set",
    }
}

#[async_trait]
impl WatermarkStore for SqliteWatermarkStore {
    async fn load(&self) -> Result<Watermarks, StoreError> {
        let rows = sqlx::query("SELECT source, value FROM watermarks")
            .fetch_all(&self.pool)
            .await?;

        let mut watermarks = Watermarks::new();
        for row in rows {
            let source: String = row.get("source");
            let value: String = row.get("value");

            // An unreadable row falls back to the source's initial watermark
            match serde_json::from_str::<Watermark>(&value) {
                Ok(watermark) => watermarks.set(source, watermark),
                Err(e) => warn!(source = %source, error = %e, "Ignoring unreadable stored watermark"),
            }
        }

        debug!(count = watermarks.len(), "Loaded watermarks");
        Ok(watermarks)
    }

    async fn save(&self, watermarks: &Watermarks) -> Result<(), StoreError> {
        let updated_at = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for (source, watermark) in watermarks.iter() {
            let value = serde_json::to_string(watermark).map_err(|e| StoreError::Encode {
                key: source.clone(),
                reason: e.to_string(),
            })?;

            sqlx::query(
                r#"
                INSERT INTO watermarks (source, mode, value, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(source) DO UPDATE SET
                    mode = excluded.mode,
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(source)
            .bind(mode_name(watermark))
            .bind(&value)
            .bind(&updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(count = watermarks.len(), "Saved watermarks");
        Ok(())
    }
}
