/// Runtime settings table
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use super::to_millis;
use crate::config::runtime::RuntimeSource;

/// `runtime_settings` as a [`RuntimeSource`]
#[derive(Clone)]
pub struct SettingsSource {
    pool: SqlitePool,
}

impl SettingsSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO runtime_settings (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to store runtime setting {}", key))?;

        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM runtime_settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .context("Failed to delete runtime setting")?;
        Ok(())
    }
}

#[async_trait]
impl RuntimeSource for SettingsSource {
    async fn fetch(&self) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT key, value FROM runtime_settings")
            .fetch_all(&self.pool)
            .await
            .context("Failed to read runtime settings")?;

        let mut values: HashMap<String, String> = HashMap::with_capacity(rows.len());
        for row in rows {
            values.insert(row.try_get("key")?, row.try_get("value")?);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_settings_round_trip() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("s.db")).await.unwrap();
        let settings = db.settings();

        settings.set("paused", "true").await.unwrap();
        settings.set("paused", "false").await.unwrap();
        settings.set("memory_cadence", "4").await.unwrap();

        let values = settings.fetch().await.unwrap();
        assert_eq!(values.get("paused").map(String::as_str), Some("false"));
        assert_eq!(values.len(), 2);

        settings.remove("memory_cadence").await.unwrap();
        assert_eq!(settings.fetch().await.unwrap().len(), 1);
    }
}
