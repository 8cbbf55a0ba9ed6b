//! PICS change-number watermark.
//!
//! The cursor lives in a single string settings slot. An empty or unreadable
//! value means "never synced" and the next cycle asks for changes since 0.
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const CHANGE_CURSOR_KEY: &str = "steam.last_change_number";

/// One string-valued configuration slot.
#[async_trait]
pub trait SettingSlot: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>>;
    async fn save(&self, key: &str, value: &str) -> Result<()>;
}

/// Process-local slot; used by `scrape_once --dry-run` and tests.
#[derive(Debug, Default)]
pub struct MemorySlot {
    value: Mutex<Option<String>>,
}

impl MemorySlot {
    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(value.into())),
        }
    }
}

#[async_trait]
impl SettingSlot for MemorySlot {
    async fn load(&self, _key: &str) -> Result<Option<String>> {
        Ok(self.value.lock().await.clone())
    }

    async fn save(&self, _key: &str, value: &str) -> Result<()> {
        *self.value.lock().await = Some(value.to_string());
        Ok(())
    }
}

pub fn decode_cursor(raw: Option<&str>) -> Option<u32> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<u32>() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(stored = raw, error = %e, "unreadable change cursor; falling back to full resync");
            None
        }
    }
}

#[derive(Clone)]
pub struct ChangeCursor {
    slot: Arc<dyn SettingSlot>,
}

impl ChangeCursor {
    pub fn new(slot: Arc<dyn SettingSlot>) -> Self {
        Self { slot }
    }

    pub async fn current(&self) -> Result<Option<u32>> {
        let raw = self.slot.load(CHANGE_CURSOR_KEY).await?;
        Ok(decode_cursor(raw.as_deref()))
    }

    pub async fn advance(&self, change_number: u32) -> Result<()> {
        self.slot
            .save(CHANGE_CURSOR_KEY, &change_number.to_string())
            .await?;
        info!(change_number, "change cursor advanced");
        Ok(())
    }
}
