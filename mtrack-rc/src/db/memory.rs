//! In-process watermark store (lost on restart)

use super::{StoreError, WatermarkStore};
use crate::models::Watermarks;
use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryWatermarkStore {
    watermarks: RwLock<Watermarks>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing watermarks
    pub fn with_watermarks(watermarks: Watermarks) -> Self {
        Self {
            watermarks: RwLock::new(watermarks),
        }
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn load(&self) -> Result<Watermarks, StoreError> {
        Ok(self.watermarks.read().await.clone())
    }

    async fn save(&self, watermarks: &Watermarks) -> Result<(), StoreError> {
        *self.watermarks.write().await = watermarks.clone();
        Ok(())
    }
}
