use anyhow::{Context, Result};
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, Row, SqlitePool};
use std::{path::Path, str::FromStr};
use tracing::{debug, error};

pub const HISTORY_KEY: &str = "chatHistory";
pub const CURRENT_ID_KEY: &str = "currentChatId";
pub const MESSAGES_KEY: &str = "currentMessages";

/// JSON key-value records in a local SQLite file.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new Store instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    /// Serialize `value` and store it under `key`.
    /// Failures are logged and otherwise ignored.
    pub async fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        if let Err(e) = self.try_save(key, value).await {
            error!(key, error = %e, "Error saving record");
        }
    }

    /// Load the record under `key`, or `default` when it is missing or unreadable.
    pub async fn load<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.try_load(key).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                debug!(key, "No stored record, using default");
                default
            }
            Err(e) => {
                error!(key, error = %e, "Error loading record");
                default
            }
        }
    }

    async fn try_save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value).context("Failed to serialize record")?;

        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to save record")?;

        Ok(())
    }

    async fn try_load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch record")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let json: String = row.try_get("value")?;
        let value = serde_json::from_str(&json).context("Failed to parse record")?;
        Ok(Some(value))
    }

    #[cfg(test)]
    pub(crate) async fn put_raw(&self, key: &str, json: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)")
            .bind(key)
            .bind(json)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop the table so every later query fails.
    #[cfg(test)]
    pub(crate) async fn break_storage(&self) {
        sqlx::query("DROP TABLE kv_store")
            .execute(&self.pool)
            .await
            .unwrap();
    }
}

#[cfg(test)]
pub(crate) async fn test_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path().join("parley.db")).await.unwrap();
    store.init().await.unwrap();
    (dir, store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{Conversation, Message, Sender};
    use chrono::{DateTime, TimeZone};

    #[tokio::test]
    async fn missing_key_returns_default() {
        let (_dir, store) = test_store().await;
        let id: Option<i64> = store.load(CURRENT_ID_KEY, None).await;
        assert_eq!(id, None);
    }

    #[tokio::test]
    async fn corrupt_record_returns_default() {
        let (_dir, store) = test_store().await;
        store.put_raw(HISTORY_KEY, "{not json").await.unwrap();
        let history: Vec<Conversation> = store.load(HISTORY_KEY, Vec::new()).await;
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn storage_errors_are_logged_not_raised() {
        let (_dir, store) = test_store().await;
        store.save(CURRENT_ID_KEY, &7_i64).await;
        store.break_storage().await;

        store.save(CURRENT_ID_KEY, &8_i64).await;
        let id: Option<i64> = store.load(CURRENT_ID_KEY, None).await;
        assert_eq!(id, None);
        let history: Vec<Conversation> = store.load(HISTORY_KEY, Vec::new()).await;
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn history_round_trip_keeps_timestamps() {
        let (_dir, store) = test_store().await;
        let mut conversation = Conversation::new(1_700_000_000_000);
        let mut reply = Message::user(2, "what time is it?");
        reply.timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        conversation.messages.push(reply);
        conversation.refresh_summary();

        store.save(HISTORY_KEY, &vec![conversation.clone()]).await;
        let loaded: Vec<Conversation> = store.load(HISTORY_KEY, Vec::new()).await;

        assert_eq!(loaded, vec![conversation]);
        let expected: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(loaded[0].timestamp, expected);
    }

    #[tokio::test]
    async fn save_overwrites_previous_value() {
        let (_dir, store) = test_store().await;
        store.save(CURRENT_ID_KEY, &1_i64).await;
        store.save(CURRENT_ID_KEY, &2_i64).await;
        assert_eq!(store.load::<Option<i64>>(CURRENT_ID_KEY, None).await, Some(2));
    }

    #[tokio::test]
    async fn loads_records_written_by_the_browser_app() {
        let (_dir, store) = test_store().await;
        let raw = r#"[{"id":1,"text":"Hello!","sender":"bot","timestamp":"2024-05-04T10:15:30.123Z","intent":"greeting"},
                      {"id":1714817800000,"text":"hi","sender":"user","timestamp":"2024-05-04T10:16:40.000Z"}]"#;
        store.put_raw(MESSAGES_KEY, raw).await.unwrap();

        let messages: Vec<Message> = store.load(MESSAGES_KEY, Vec::new()).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].sender, Sender::User);
        assert_eq!(messages[1].intent, None);
        assert_eq!(
            messages[0].timestamp,
            Utc.with_ymd_and_hms(2024, 5, 4, 10, 15, 30).unwrap()
                + chrono::Duration::milliseconds(123)
        );
    }
}
