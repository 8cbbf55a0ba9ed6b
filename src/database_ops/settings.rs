//! `scraper_settings` key/value slots.
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;

use super::db::Db;
use crate::sync::cursor::SettingSlot;

#[derive(Clone)]
pub struct DbSettings {
    db: Db,
}

impl DbSettings {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SettingSlot for DbSettings {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM scraper_settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db.pool)
            .await
            .with_context(|| format!("loading setting {key}"))
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO scraper_settings (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().timestamp())
        .execute(&self.db.pool)
        .await
        .with_context(|| format!("saving setting {key}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::cursor::ChangeCursor;
    use std::sync::Arc;

    #[tokio::test]
    async fn cursor_persists_in_settings_table() {
        let db = Db::in_memory().await;
        let cursor = ChangeCursor::new(Arc::new(DbSettings::new(db.clone())));
        assert_eq!(cursor.current().await.unwrap(), None);
        cursor.advance(31_337).await.unwrap();
        cursor.advance(31_338).await.unwrap();

        let reopened = ChangeCursor::new(Arc::new(DbSettings::new(db)));
        assert_eq!(reopened.current().await.unwrap(), Some(31_338));
    }

    #[tokio::test]
    async fn garbage_in_slot_reads_as_absent() {
        let db = Db::in_memory().await;
        let settings = DbSettings::new(db);
        settings
            .save(crate::sync::cursor::CHANGE_CURSOR_KEY, "twelve")
            .await
            .unwrap();
        let cursor = ChangeCursor::new(Arc::new(settings));
        assert_eq!(cursor.current().await.unwrap(), None);
    }
}
