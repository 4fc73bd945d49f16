//! Checkpoint persistence, durability, and recovery for agentflow
//!
//! This crate is the persistence spine shared by the agent and graph
//! execution cores:
//!
//! - [`Checkpoint`] - an immutable snapshot of state, keyed by
//!   `(thread_id, namespace, id)` with a parent chain for time travel
//! - [`CheckpointSaver`] - the pluggable storage contract, with
//!   [`InMemorySaver`] (development, tests) and [`SqliteSaver`]
//!   (single-node persistence) implementations
//! - [`SerializerProtocol`] - payload encoding strategy (JSON, bincode)
//! - [`DurableRunner`] - wraps tasks with retry + at-most-once /
//!   at-least-once / exactly-once semantics and a persisted task ledger
//! - [`RecoveryManager`] - restores a thread from its latest checkpoint and
//!   replays outstanding tasks
//!
//! # Example
//!
//! ```rust,ignore
//! use agentflow_checkpoint::{Checkpoint, CheckpointConfig, CheckpointSaver, InMemorySaver};
//! use serde_json::json;
//!
//! # async fn example() -> agentflow_checkpoint::Result<()> {
//! let saver = InMemorySaver::new();
//!
//! let config = saver.save(Checkpoint::new("session-1", json!({"count": 1}))).await?;
//! let restored = saver.load(&config).await?.expect("just saved");
//! assert_eq!(restored.state["count"], 1);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod durability;
pub mod error;
pub mod memory;
pub mod recovery;
pub mod serializer;
pub mod sqlite;
pub mod traits;

pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointSource,
    PendingWrite, CHECKPOINT_TYPE_JSON, DEFAULT_NAMESPACE,
};
pub use durability::{
    task_fn, DurabilityMode, DurableRunner, ExecutionContext, RetryPolicy, TaskExecution, TaskFn,
    TaskStatus, TASK_LEDGER_KEY,
};
pub use error::{CheckpointError, Result};
pub use memory::InMemorySaver;
pub use recovery::{RecoveryManager, RecoveryReport};
pub use serializer::{BincodeSerializer, JsonSerializer, SerializerProtocol};
pub use sqlite::SqliteSaver;
pub use traits::CheckpointSaver;
