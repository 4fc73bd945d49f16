//! SQLite-backed checkpoint storage
//!
//! Persistent [`CheckpointSaver`] for single-node deployments. Uses three
//! tables:
//!
//! - `checkpoints` - metadata plus the serialized state, PK
//!   `(thread_id, checkpoint_ns, id)`
//! - `checkpoint_blobs` - per-channel payloads, PK
//!   `(thread_id, checkpoint_ns, channel, version)`
//! - `checkpoint_writes` - the per-task write ledger, PK
//!   `(thread_id, checkpoint_ns, checkpoint_id, task_id, idx)`
//!
//! Connections are opened per operation inside `spawn_blocking`; SQLite's own
//! locking provides write atomicity per checkpoint id.

use crate::checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, PendingWrite,
};
use crate::error::{CheckpointError, Result};
use crate::traits::CheckpointSaver;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

/// Checkpoint saver persisting to a SQLite database file
pub struct SqliteSaver {
    db_path: PathBuf,
}

impl SqliteSaver {
    /// Open (or create) the database and ensure the schema exists
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let conn = open(&db_path)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT NOT NULL,
                checkpoint_ns TEXT NOT NULL,
                id TEXT NOT NULL,
                parent_id TEXT,
                type TEXT NOT NULL,
                state_json TEXT NOT NULL,
                timestamp_unix INTEGER NOT NULL,
                metadata_json TEXT NOT NULL,
                version INTEGER NOT NULL,
                created_at_unix INTEGER NOT NULL,
                PRIMARY KEY (thread_id, checkpoint_ns, id)
            );
            CREATE TABLE IF NOT EXISTS checkpoint_blobs (
                thread_id TEXT NOT NULL,
                checkpoint_ns TEXT NOT NULL,
                channel TEXT NOT NULL,
                version INTEGER NOT NULL,
                type TEXT NOT NULL,
                data_bytes BLOB NOT NULL,
                created_at_unix INTEGER NOT NULL,
                PRIMARY KEY (thread_id, checkpoint_ns, channel, version)
            );
            CREATE TABLE IF NOT EXISTS checkpoint_writes (
                thread_id TEXT NOT NULL,
                checkpoint_ns TEXT NOT NULL,
                checkpoint_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                idx INTEGER NOT NULL,
                channel TEXT NOT NULL,
                type TEXT NOT NULL,
                value_json TEXT NOT NULL,
                created_at_unix INTEGER NOT NULL,
                PRIMARY KEY (thread_id, checkpoint_ns, checkpoint_id, task_id, idx)
            );
            "#,
        )
        .map_err(storage_err)?;

        Ok(Self { db_path })
    }
}

fn open(path: &Path) -> Result<Connection> {
    Connection::open(path).map_err(storage_err)
}

fn storage_err(err: rusqlite::Error) -> CheckpointError {
    CheckpointError::Storage(err.to_string())
}

fn join_err(err: tokio::task::JoinError) -> CheckpointError {
    CheckpointError::Storage(err.to_string())
}

fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        thread_id: row.get(0)?,
        namespace: row.get(1)?,
        id: row.get(2)?,
        parent_id: row.get(3)?,
        checkpoint_type: row.get(4)?,
        state_json: row.get(5)?,
        timestamp_unix: row.get(6)?,
        metadata_json: row.get(7)?,
        version: row.get(8)?,
    })
}

const CHECKPOINT_COLUMNS: &str =
    "thread_id, checkpoint_ns, id, parent_id, type, state_json, timestamp_unix, metadata_json, version";

struct RawRow {
    thread_id: String,
    namespace: String,
    id: String,
    parent_id: Option<String>,
    checkpoint_type: String,
    state_json: String,
    timestamp_unix: i64,
    metadata_json: String,
    version: i64,
}

impl RawRow {
    fn into_checkpoint(self) -> Result<Checkpoint> {
        let state = serde_json::from_str(&self.state_json)?;
        let metadata: CheckpointMetadata = serde_json::from_str(&self.metadata_json)?;
        let ts = DateTime::<Utc>::from_timestamp(self.timestamp_unix, 0).ok_or_else(|| {
            CheckpointError::Storage(format!("invalid timestamp {}", self.timestamp_unix))
        })?;

        Ok(Checkpoint {
            id: self.id,
            thread_id: self.thread_id,
            namespace: self.namespace,
            parent_id: self.parent_id,
            checkpoint_type: self.checkpoint_type,
            state,
            ts,
            metadata,
            version: self.version as u64,
        })
    }
}

#[async_trait]
impl CheckpointSaver for SqliteSaver {
    async fn save(&self, checkpoint: Checkpoint) -> Result<CheckpointConfig> {
        let config = CheckpointConfig {
            thread_id: checkpoint.thread_id.clone(),
            namespace: checkpoint.namespace.clone(),
            checkpoint_id: Some(checkpoint.id.clone()),
        };

        let state_json = serde_json::to_string(&checkpoint.state)?;
        let metadata_json = serde_json::to_string(&checkpoint.metadata)?;
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = open(&db_path)?;
            let tx = conn.transaction().map_err(storage_err)?;
            let now = Utc::now().timestamp();

            tx.execute(
                r#"
                INSERT OR REPLACE INTO checkpoints
                (thread_id, checkpoint_ns, id, parent_id, type, state_json,
                 timestamp_unix, metadata_json, version, created_at_unix)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    checkpoint.thread_id,
                    checkpoint.namespace,
                    checkpoint.id,
                    checkpoint.parent_id,
                    checkpoint.checkpoint_type,
                    state_json,
                    checkpoint.ts.timestamp(),
                    metadata_json,
                    checkpoint.version as i64,
                    now,
                ],
            )
            .map_err(storage_err)?;

            // One blob row per top-level state channel at this version.
            if let Some(channels) = checkpoint.state.as_object() {
                for (channel, value) in channels {
                    let data = serde_json::to_vec(value)?;
                    tx.execute(
                        r#"
                        INSERT OR REPLACE INTO checkpoint_blobs
                        (thread_id, checkpoint_ns, channel, version, type, data_bytes, created_at_unix)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                        "#,
                        params![
                            checkpoint.thread_id,
                            checkpoint.namespace,
                            channel,
                            checkpoint.version as i64,
                            checkpoint.checkpoint_type,
                            data,
                            now,
                        ],
                    )
                    .map_err(storage_err)?;
                }
            }

            tx.commit().map_err(storage_err)
        })
        .await
        .map_err(join_err)??;

        Ok(config)
    }

    async fn load(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        let thread_id = config.thread_id.clone();
        let namespace = config.namespace.clone();
        let want_id = config.checkpoint_id.clone();
        let db_path = self.db_path.clone();

        let raw = tokio::task::spawn_blocking(move || -> Result<Option<RawRow>> {
            let conn = open(&db_path)?;

            let sql_by_id = format!(
                "SELECT {} FROM checkpoints WHERE thread_id = ?1 AND checkpoint_ns = ?2 AND id = ?3",
                CHECKPOINT_COLUMNS
            );
            let sql_latest = format!(
                "SELECT {} FROM checkpoints WHERE thread_id = ?1 AND checkpoint_ns = ?2 \
                 ORDER BY version DESC, created_at_unix DESC LIMIT 1",
                CHECKPOINT_COLUMNS
            );

            let result = if let Some(id) = &want_id {
                conn.query_row(&sql_by_id, params![thread_id, namespace, id], row_to_checkpoint)
            } else {
                conn.query_row(&sql_latest, params![thread_id, namespace], row_to_checkpoint)
            };

            match result {
                Ok(row) => Ok(Some(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(storage_err(e)),
            }
        })
        .await
        .map_err(join_err)??;

        raw.map(RawRow::into_checkpoint).transpose()
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let thread_id = thread_id.to_string();
        let db_path = self.db_path.clone();

        let rows = tokio::task::spawn_blocking(move || -> Result<Vec<RawRow>> {
            let conn = open(&db_path)?;
            let sql = format!(
                "SELECT {} FROM checkpoints WHERE thread_id = ?1 \
                 ORDER BY timestamp_unix ASC, version ASC",
                CHECKPOINT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(params![thread_id], row_to_checkpoint)
                .map_err(storage_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
        })
        .await
        .map_err(join_err)??;

        rows.into_iter().map(RawRow::into_checkpoint).collect()
    }

    async fn delete(&self, config: &CheckpointConfig) -> Result<()> {
        let id = config
            .checkpoint_id
            .clone()
            .ok_or_else(|| CheckpointError::Invalid("delete requires a checkpoint_id".into()))?;
        let thread_id = config.thread_id.clone();
        let namespace = config.namespace.clone();
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = open(&db_path)?;
            let tx = conn.transaction().map_err(storage_err)?;

            let version: Option<i64> = match tx.query_row(
                "SELECT version FROM checkpoints WHERE thread_id = ?1 AND checkpoint_ns = ?2 AND id = ?3",
                params![thread_id, namespace, id],
                |row| row.get(0),
            ) {
                Ok(v) => Some(v),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(storage_err(e)),
            };

            let version = version.ok_or_else(|| CheckpointError::NotFound(id.clone()))?;

            tx.execute(
                "DELETE FROM checkpoints WHERE thread_id = ?1 AND checkpoint_ns = ?2 AND id = ?3",
                params![thread_id, namespace, id],
            )
            .map_err(storage_err)?;
            tx.execute(
                "DELETE FROM checkpoint_blobs WHERE thread_id = ?1 AND checkpoint_ns = ?2 AND version = ?3",
                params![thread_id, namespace, version],
            )
            .map_err(storage_err)?;
            tx.execute(
                "DELETE FROM checkpoint_writes WHERE thread_id = ?1 AND checkpoint_ns = ?2 AND checkpoint_id = ?3",
                params![thread_id, namespace, id],
            )
            .map_err(storage_err)?;

            tx.commit().map_err(storage_err)
        })
        .await
        .map_err(join_err)?
    }

    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        task_id: &str,
        writes: Vec<(String, serde_json::Value)>,
    ) -> Result<()> {
        let id = config
            .checkpoint_id
            .clone()
            .ok_or_else(|| CheckpointError::Invalid("put_writes requires a checkpoint_id".into()))?;
        let thread_id = config.thread_id.clone();
        let namespace = config.namespace.clone();
        let task_id = task_id.to_string();
        let db_path = self.db_path.clone();

        let encoded: Vec<(String, String)> = writes
            .into_iter()
            .map(|(channel, value)| {
                serde_json::to_string(&value).map(|json| (channel, json))
            })
            .collect::<std::result::Result<_, _>>()?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = open(&db_path)?;
            let tx = conn.transaction().map_err(storage_err)?;
            let now = Utc::now().timestamp();

            let next_idx: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(idx) + 1, 0) FROM checkpoint_writes \
                     WHERE thread_id = ?1 AND checkpoint_ns = ?2 AND checkpoint_id = ?3 AND task_id = ?4",
                    params![thread_id, namespace, id, task_id],
                    |row| row.get(0),
                )
                .map_err(storage_err)?;

            for (offset, (channel, value_json)) in encoded.iter().enumerate() {
                tx.execute(
                    r#"
                    INSERT OR REPLACE INTO checkpoint_writes
                    (thread_id, checkpoint_ns, checkpoint_id, task_id, idx, channel, type, value_json, created_at_unix)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'json', ?7, ?8)
                    "#,
                    params![
                        thread_id,
                        namespace,
                        id,
                        task_id,
                        next_idx + offset as i64,
                        channel,
                        value_json,
                        now,
                    ],
                )
                .map_err(storage_err)?;
            }

            tx.commit().map_err(storage_err)
        })
        .await
        .map_err(join_err)?
    }

    async fn list_writes(&self, config: &CheckpointConfig) -> Result<Vec<PendingWrite>> {
        let id = config
            .checkpoint_id
            .clone()
            .ok_or_else(|| CheckpointError::Invalid("list_writes requires a checkpoint_id".into()))?;
        let thread_id = config.thread_id.clone();
        let namespace = config.namespace.clone();
        let db_path = self.db_path.clone();

        let rows = tokio::task::spawn_blocking(move || -> Result<Vec<(String, u32, String, String)>> {
            let conn = open(&db_path)?;
            let mut stmt = conn
                .prepare(
                    "SELECT task_id, idx, channel, value_json FROM checkpoint_writes \
                     WHERE thread_id = ?1 AND checkpoint_ns = ?2 AND checkpoint_id = ?3 \
                     ORDER BY task_id ASC, idx ASC",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![thread_id, namespace, id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)? as u32,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(storage_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(storage_err)
        })
        .await
        .map_err(join_err)??;

        rows.into_iter()
            .map(|(task_id, idx, channel, value_json)| {
                Ok(PendingWrite {
                    task_id,
                    idx,
                    channel,
                    value: serde_json::from_str(&value_json)?,
                })
            })
            .collect()
    }
}
