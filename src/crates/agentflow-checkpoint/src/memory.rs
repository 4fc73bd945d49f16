//! In-memory checkpoint storage
//!
//! [`InMemorySaver`] is the reference [`CheckpointSaver`] implementation: a
//! thread-safe map of per-thread checkpoint lists. Suited to development,
//! tests, and short-lived runs; nothing survives a restart.
//!
//! The `clear`, `thread_count`, and `checkpoint_count` helpers exist for test
//! isolation and assertions.

use crate::checkpoint::{Checkpoint, CheckpointConfig, PendingWrite};
use crate::error::{CheckpointError, Result};
use crate::traits::CheckpointSaver;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredEntry {
    checkpoint: Checkpoint,
    writes: Vec<PendingWrite>,
}

type Storage = Arc<RwLock<HashMap<String, Vec<StoredEntry>>>>;

/// Thread-safe in-memory checkpoint saver
#[derive(Debug, Clone, Default)]
pub struct InMemorySaver {
    storage: Storage,
}

impl InMemorySaver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads with at least one checkpoint
    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Total checkpoints across all threads
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    /// Drop everything (test isolation)
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

#[async_trait]
impl CheckpointSaver for InMemorySaver {
    async fn save(&self, checkpoint: Checkpoint) -> Result<CheckpointConfig> {
        let config = CheckpointConfig {
            thread_id: checkpoint.thread_id.clone(),
            namespace: checkpoint.namespace.clone(),
            checkpoint_id: Some(checkpoint.id.clone()),
        };

        let mut storage = self.storage.write().await;
        let entries = storage.entry(checkpoint.thread_id.clone()).or_default();

        // Same id within the thread+namespace replaces in place.
        if let Some(existing) = entries.iter_mut().find(|e| {
            e.checkpoint.id == checkpoint.id && e.checkpoint.namespace == checkpoint.namespace
        }) {
            existing.checkpoint = checkpoint;
        } else {
            entries.push(StoredEntry {
                checkpoint,
                writes: Vec::new(),
            });
        }

        Ok(config)
    }

    async fn load(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        let storage = self.storage.read().await;

        let entries = match storage.get(&config.thread_id) {
            Some(entries) => entries,
            None => return Ok(None),
        };

        let found = match &config.checkpoint_id {
            Some(id) => entries
                .iter()
                .find(|e| &e.checkpoint.id == id && e.checkpoint.namespace == config.namespace),
            None => entries
                .iter()
                .filter(|e| e.checkpoint.namespace == config.namespace)
                .max_by_key(|e| (e.checkpoint.version, e.checkpoint.ts)),
        };

        Ok(found.map(|e| e.checkpoint.clone()))
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let storage = self.storage.read().await;

        let mut checkpoints: Vec<Checkpoint> = storage
            .get(thread_id)
            .map(|entries| entries.iter().map(|e| e.checkpoint.clone()).collect())
            .unwrap_or_default();

        checkpoints.sort_by_key(|c| (c.ts, c.version));
        Ok(checkpoints)
    }

    async fn delete(&self, config: &CheckpointConfig) -> Result<()> {
        let id = config
            .checkpoint_id
            .as_ref()
            .ok_or_else(|| CheckpointError::Invalid("delete requires a checkpoint_id".into()))?;

        let mut storage = self.storage.write().await;
        let entries = storage
            .get_mut(&config.thread_id)
            .ok_or_else(|| CheckpointError::NotFound(config.thread_id.clone()))?;

        let before = entries.len();
        entries
            .retain(|e| !(e.checkpoint.id == *id && e.checkpoint.namespace == config.namespace));

        if entries.len() == before {
            return Err(CheckpointError::NotFound(id.clone()));
        }
        if entries.is_empty() {
            storage.remove(&config.thread_id);
        }
        Ok(())
    }

    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        task_id: &str,
        writes: Vec<(String, serde_json::Value)>,
    ) -> Result<()> {
        let id = config
            .checkpoint_id
            .as_ref()
            .ok_or_else(|| CheckpointError::Invalid("put_writes requires a checkpoint_id".into()))?;

        let mut storage = self.storage.write().await;
        let entry = storage
            .get_mut(&config.thread_id)
            .and_then(|entries| {
                entries.iter_mut().find(|e| {
                    &e.checkpoint.id == id && e.checkpoint.namespace == config.namespace
                })
            })
            .ok_or_else(|| CheckpointError::NotFound(id.clone()))?;

        let mut idx = entry
            .writes
            .iter()
            .filter(|w| w.task_id == task_id)
            .count() as u32;

        for (channel, value) in writes {
            entry.writes.push(PendingWrite {
                task_id: task_id.to_string(),
                idx,
                channel,
                value,
            });
            idx += 1;
        }
        Ok(())
    }

    async fn list_writes(&self, config: &CheckpointConfig) -> Result<Vec<PendingWrite>> {
        let id = config
            .checkpoint_id
            .as_ref()
            .ok_or_else(|| CheckpointError::Invalid("list_writes requires a checkpoint_id".into()))?;

        let storage = self.storage.read().await;
        let entry = storage.get(&config.thread_id).and_then(|entries| {
            entries
                .iter()
                .find(|e| &e.checkpoint.id == id && e.checkpoint.namespace == config.namespace)
        });

        // A deleted (or never-written) checkpoint has no surviving writes.
        Ok(entry.map(|e| e.writes.clone()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_then_load_same_id() {
        let saver = InMemorySaver::new();
        let cp = Checkpoint::new("t1", json!({"n": 1}));
        let expected = cp.clone();

        let config = saver.save(cp).await.unwrap();
        let loaded = saver.load(&config).await.unwrap().unwrap();

        assert_eq!(loaded, expected);
    }

    #[tokio::test]
    async fn test_load_latest_picks_highest_version() {
        let saver = InMemorySaver::new();
        let first = Checkpoint::new("t1", json!({"n": 1}));
        let second = first.child(json!({"n": 2}));
        let second_id = second.id.clone();

        saver.save(first).await.unwrap();
        saver.save(second).await.unwrap();

        let latest = saver
            .load(&CheckpointConfig::for_thread("t1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, second_id);
        assert_eq!(latest.state, json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_save_same_id_is_idempotent_upsert() {
        let saver = InMemorySaver::new();
        let cp = Checkpoint::new("t1", json!({"n": 1}));
        let replacement = Checkpoint {
            state: json!({"n": 99}),
            ..cp.clone()
        };

        saver.save(cp).await.unwrap();
        let config = saver.save(replacement).await.unwrap();

        assert_eq!(saver.checkpoint_count().await, 1);
        let loaded = saver.load(&config).await.unwrap().unwrap();
        assert_eq!(loaded.state, json!({"n": 99}));
    }

    #[tokio::test]
    async fn test_list_is_chronological() {
        let saver = InMemorySaver::new();
        let first = Checkpoint::new("t1", json!({"step": 0}));
        let second = first.child(json!({"step": 1}));
        let third = second.child(json!({"step": 2}));

        // Insert out of order; list must still come back oldest first.
        saver.save(third.clone()).await.unwrap();
        saver.save(first.clone()).await.unwrap();
        saver.save(second.clone()).await.unwrap();

        let listed = saver.list("t1").await.unwrap();
        let versions: Vec<u64> = listed.iter().map(|c| c.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_delete_removes_from_list() {
        let saver = InMemorySaver::new();
        let cp = Checkpoint::new("t1", json!({}));
        let id = cp.id.clone();
        let config = saver.save(cp).await.unwrap();

        saver.delete(&config).await.unwrap();

        let listed = saver.list("t1").await.unwrap();
        assert!(listed.iter().all(|c| c.id != id));
        assert_eq!(saver.thread_count().await, 0);
    }

    #[tokio::test]
    async fn test_delete_unknown_id_errors() {
        let saver = InMemorySaver::new();
        saver.save(Checkpoint::new("t1", json!({}))).await.unwrap();

        let missing = CheckpointConfig::for_thread("t1").with_checkpoint_id("nope");
        assert!(matches!(
            saver.delete(&missing).await,
            Err(CheckpointError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_writes_ledger_ordering() {
        let saver = InMemorySaver::new();
        let config = saver.save(Checkpoint::new("t1", json!({}))).await.unwrap();

        saver
            .put_writes(
                &config,
                "task-a",
                vec![("out".into(), json!(1)), ("out".into(), json!(2))],
            )
            .await
            .unwrap();
        saver
            .put_writes(&config, "task-a", vec![("out".into(), json!(3))])
            .await
            .unwrap();

        let writes = saver.list_writes(&config).await.unwrap();
        let indices: Vec<u32> = writes.iter().map(|w| w.idx).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let saver = InMemorySaver::new();
        let root = Checkpoint::new("t1", json!({"scope": "root"}));
        let nested = Checkpoint::new("t1", json!({"scope": "sub"})).with_namespace("sub");

        saver.save(root).await.unwrap();
        saver.save(nested).await.unwrap();

        let from_root = saver
            .load(&CheckpointConfig::for_thread("t1"))
            .await
            .unwrap()
            .unwrap();
        let from_sub = saver
            .load(&CheckpointConfig::for_thread("t1").with_namespace("sub"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(from_root.state, json!({"scope": "root"}));
        assert_eq!(from_sub.state, json!({"scope": "sub"}));
    }

    #[tokio::test]
    async fn test_clear() {
        let saver = InMemorySaver::new();
        saver.save(Checkpoint::new("t1", json!({}))).await.unwrap();
        saver.save(Checkpoint::new("t2", json!({}))).await.unwrap();

        assert_eq!(saver.checkpoint_count().await, 2);
        saver.clear().await;
        assert_eq!(saver.checkpoint_count().await, 0);
    }
}
