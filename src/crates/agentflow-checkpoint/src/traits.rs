//! Storage contract for checkpoint backends
//!
//! [`CheckpointSaver`] is the abstraction execution engines persist through.
//! Any backend works as long as it honors two consistency rules:
//!
//! - a `load` after a successful `save` of the same id observes that
//!   checkpoint;
//! - a `list` after a `delete` does not include the deleted id (nor do its
//!   pending writes survive).
//!
//! Implementations must be safe for concurrent readers and writers, and a
//! single checkpoint id must be written atomically.

use crate::checkpoint::{Checkpoint, CheckpointConfig, PendingWrite};
use crate::error::Result;
use async_trait::async_trait;

/// Pluggable checkpoint persistence backend
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Persist a checkpoint atomically
    ///
    /// Saving an id that already exists for the same thread + namespace
    /// replaces the stored checkpoint (idempotent upsert). Returns the config
    /// addressing the stored checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<CheckpointConfig>;

    /// Load a checkpoint
    ///
    /// When `config.checkpoint_id` is set, loads exactly that checkpoint;
    /// otherwise the most recent one for the thread + namespace. `None` when
    /// nothing matches.
    async fn load(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>>;

    /// All checkpoints of a thread, oldest first
    async fn list(&self, thread_id: &str) -> Result<Vec<Checkpoint>>;

    /// Delete one checkpoint and purge its pending writes
    ///
    /// Requires `config.checkpoint_id`; deleting an unknown id is an error.
    async fn delete(&self, config: &CheckpointConfig) -> Result<()>;

    /// Append task writes to a checkpoint's ledger
    ///
    /// Requires `config.checkpoint_id`. Write indices continue from the
    /// task's previous batch.
    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        task_id: &str,
        writes: Vec<(String, serde_json::Value)>,
    ) -> Result<()>;

    /// The write ledger of a checkpoint, in insertion order
    ///
    /// Empty for a checkpoint that does not exist (or was deleted).
    async fn list_writes(&self, config: &CheckpointConfig) -> Result<Vec<PendingWrite>>;
}
