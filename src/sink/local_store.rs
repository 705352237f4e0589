// src/sink/local_store.rs
//! Keyed local persistence using SQLite
//!
//! Each batch is stored as one zstd-compressed JSON blob under the sink's
//! store key, alongside its event count and write time. An optional max-age
//! retention trim runs after every successful write.

use crate::capture::event::Event;
use crate::recording::buffer::Batch;
use crate::recording::compressor::{CompressionLevel, Compressor};
use crate::sink::{Ack, Sink};
use crate::utils::errors::{Result, SinkError, TelemetryError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, ErrorCode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Local store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalStoreConfig {
    /// SQLite database file
    pub path: PathBuf,

    /// Key the batches are stored under
    pub key: String,

    /// Batches older than this are trimmed after each write
    pub max_age_days: Option<u32>,

    pub compression: CompressionLevel,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("folio-telemetry.db"),
            key: "portfolio_activity_logs".to_string(),
            max_age_days: None,
            compression: CompressionLevel::default(),
        }
    }
}

/// Metadata of one stored batch
#[derive(Debug, Clone)]
pub struct BatchMetadata {
    pub batch_seq: u64,
    pub event_count: usize,
    pub compressed_size: usize,
    pub created_at: DateTime<Utc>,
}

/// Storage statistics for one store key
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub total_batches: u64,
    pub total_events: u64,
    pub total_size_bytes: u64,
}

/// SQLite-backed keyed sink
pub struct LocalStoreSink {
    config: LocalStoreConfig,
    db: Mutex<Connection>,
    compressor: Compressor,
}

impl LocalStoreSink {
    /// Open (or create) the store
    pub async fn open(config: LocalStoreConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                TelemetryError::StorageFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        let conn = Connection::open(&config.path).map_err(|e| {
            TelemetryError::StorageFailed(format!("Failed to open database: {}", e))
        })?;

        let store = Self {
            compressor: Compressor::new(config.compression),
            config,
            db: Mutex::new(conn),
        };
        store.init_schema().await?;

        info!(
            "Local store opened at {:?} (key {})",
            store.config.path, store.config.key
        );
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        let db = self.db.lock().await;

        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS event_batches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                store_key TEXT NOT NULL,
                batch_seq INTEGER NOT NULL,
                event_count INTEGER NOT NULL,
                compressed_size INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                data BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_store_key_created
                ON event_batches(store_key, created_at);
            "#,
        )
        .map_err(|e| TelemetryError::StorageFailed(format!("Schema creation failed: {}", e)))
    }

    pub fn key(&self) -> &str {
        &self.config.key
    }

    async fn insert(&self, batch: &Batch, data: &[u8]) -> std::result::Result<(), SinkError> {
        let db = self.db.lock().await;
        db.execute(
            r#"
            INSERT INTO event_batches (store_key, batch_seq, event_count, compressed_size, created_at, data)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                self.config.key,
                batch.sequence() as i64,
                batch.len() as i64,
                data.len() as i64,
                Utc::now().timestamp_millis(),
                data,
            ],
        )
        .map_err(classify)?;
        Ok(())
    }

    /// All stored events for this key, oldest batch first
    pub async fn load(&self) -> Result<Vec<Event>> {
        let blobs: Vec<Vec<u8>> = {
            let db = self.db.lock().await;
            let mut stmt = db
                .prepare("SELECT data FROM event_batches WHERE store_key = ? ORDER BY id")
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![self.config.key], |row| row.get(0))
                .map_err(storage_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(storage_err)?;
            rows
        };

        let mut events = Vec::new();
        for blob in blobs {
            events.extend(self.compressor.decode(&blob)?);
        }
        Ok(events)
    }

    /// Stored batches for this key
    pub async fn list_batches(&self) -> Result<Vec<BatchMetadata>> {
        let db = self.db.lock().await;
        let mut stmt = db
            .prepare(
                "SELECT batch_seq, event_count, compressed_size, created_at
                 FROM event_batches WHERE store_key = ? ORDER BY id",
            )
            .map_err(storage_err)?;

        let batches = stmt
            .query_map(params![self.config.key], |row| {
                let created_at: i64 = row.get(3)?;
                Ok(BatchMetadata {
                    batch_seq: row.get::<_, i64>(0)? as u64,
                    event_count: row.get::<_, i64>(1)? as usize,
                    compressed_size: row.get::<_, i64>(2)? as usize,
                    created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_default(),
                })
            })
            .map_err(storage_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage_err)?;

        Ok(batches)
    }

    pub async fn storage_stats(&self) -> Result<StorageStats> {
        let db = self.db.lock().await;
        let (batches, events, size): (i64, i64, i64) = db
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(event_count), 0), COALESCE(SUM(compressed_size), 0)
                 FROM event_batches WHERE store_key = ?",
                params![self.config.key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(storage_err)?;

        Ok(StorageStats {
            total_batches: batches as u64,
            total_events: events as u64,
            total_size_bytes: size as u64,
        })
    }

    /// Remove batches written before `cutoff`; returns the number removed
    pub async fn trim_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let db = self.db.lock().await;
        let removed = db
            .execute(
                "DELETE FROM event_batches WHERE store_key = ? AND created_at < ?",
                params![self.config.key, cutoff.timestamp_millis()],
            )
            .map_err(storage_err)?;

        if removed > 0 {
            debug!("Trimmed {} batches older than {}", removed, cutoff);
        }
        Ok(removed)
    }

    pub async fn trim_older_than(&self, max_age: Duration) -> Result<usize> {
        self.trim_before(Utc::now() - max_age).await
    }
}

#[async_trait]
impl Sink for LocalStoreSink {
    fn name(&self) -> &str {
        "local_store"
    }

    async fn write(&self, batch: &Batch) -> std::result::Result<Ack, SinkError> {
        let data = self
            .compressor
            .encode(batch.events())
            .map_err(|e| SinkError::Serialization(e.to_string()))?;

        self.insert(batch, &data).await?;
        debug!(
            "Stored batch #{} ({} events, {} bytes) under {}",
            batch.sequence(),
            batch.len(),
            data.len(),
            self.config.key
        );

        if let Some(days) = self.config.max_age_days {
            if let Err(e) = self.trim_older_than(Duration::days(i64::from(days))).await {
                warn!("Retention trim failed: {}", e);
            }
        }

        Ok(Ack {
            accepted: batch.len(),
        })
    }
}

fn classify(err: rusqlite::Error) -> SinkError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ReadOnly)
        | Some(ErrorCode::PermissionDenied)
        | Some(ErrorCode::AuthorizationForStatementDenied) => SinkError::Permission(err.to_string()),
        _ => SinkError::Unavailable(err.to_string()),
    }
}

fn storage_err(err: rusqlite::Error) -> TelemetryError {
    TelemetryError::StorageFailed(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::event::test_support::event;
    use crate::capture::event::{ActivityCategory, EventKind};
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path) -> LocalStoreConfig {
        LocalStoreConfig {
            path: dir.join("nested").join("events.db"),
            ..Default::default()
        }
    }

    fn batch(seq: u64, n: usize) -> Batch {
        Batch::new(
            seq,
            (0..n)
                .map(|i| event(EventKind::Activity(ActivityCategory::Data), &format!("update_{}", i)))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_open_creates_directories() {
        let dir = tempdir().unwrap();
        let store = LocalStoreSink::open(config_in(dir.path())).await;
        assert!(store.is_ok());
        assert!(dir.path().join("nested").join("events.db").exists());
    }

    #[tokio::test]
    async fn test_write_and_load() {
        let dir = tempdir().unwrap();
        let store = LocalStoreSink::open(config_in(dir.path())).await.unwrap();

        let first = batch(1, 2);
        let second = batch(2, 3);
        assert_eq!(store.write(&first).await.unwrap().accepted, 2);
        store.write(&second).await.unwrap();

        let loaded = store.load().await.unwrap();
        let expected: Vec<Event> = first.events().iter().chain(second.events()).cloned().collect();
        assert_eq!(loaded, expected);

        let batches = store.list_batches().await.unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].batch_seq, 2);
        assert_eq!(batches[1].event_count, 3);

        let stats = store.storage_stats().await.unwrap();
        assert_eq!(stats.total_batches, 2);
        assert_eq!(stats.total_events, 5);
        assert!(stats.total_size_bytes > 0);
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.db");

        let activity = LocalStoreSink::open(LocalStoreConfig {
            path: path.clone(),
            key: "activity".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
        activity.write(&batch(1, 4)).await.unwrap();

        let telemetry = LocalStoreSink::open(LocalStoreConfig {
            path,
            key: "telemetry".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        assert!(telemetry.load().await.unwrap().is_empty());
        assert_eq!(activity.load().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_trim_before() {
        let dir = tempdir().unwrap();
        let store = LocalStoreSink::open(config_in(dir.path())).await.unwrap();
        store.write(&batch(1, 1)).await.unwrap();
        store.write(&batch(2, 1)).await.unwrap();

        assert_eq!(store.trim_before(Utc::now() - Duration::days(1)).await.unwrap(), 0);
        assert_eq!(store.trim_before(Utc::now() + Duration::seconds(1)).await.unwrap(), 2);
        assert!(store.load().await.unwrap().is_empty());
    }

    #[test]
    fn test_classify_read_only_as_permission() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_READONLY),
            None,
        );
        assert!(matches!(classify(err), SinkError::Permission(_)));

        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(classify(busy).is_retryable());
    }
}
