//! Checkpoint data model
//!
//! A [`Checkpoint`] is an immutable snapshot of execution state for a thread.
//! Checkpoints are keyed by `(thread_id, namespace, id)`; each one may point
//! at a parent, so the per-thread history forms a chain (a DAG once forks are
//! involved) that time-travel walks backwards.
//!
//! The parent pointer is lookup-only: holding a checkpoint never keeps its
//! ancestors alive, and a dangling parent id simply means the ancestor was
//! deleted by retention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Checkpoint identifier
pub type CheckpointId = String;

/// Namespace used when the caller does not provide one
pub const DEFAULT_NAMESPACE: &str = "";

/// Payload encoding recorded on each checkpoint
pub const CHECKPOINT_TYPE_JSON: &str = "json";

/// How a checkpoint came to exist
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Written from the input of a fresh run
    Input,
    /// Written from inside an execution loop
    Loop,
    /// Written from a manual state update
    Update,
    /// Copied from another checkpoint
    Fork,
}

/// Metadata attached to a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CheckpointMetadata {
    /// The origin of this checkpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckpointSource>,

    /// Step number within the run (-1 for the input checkpoint)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,

    /// Free-form extra metadata (task ledgers, resume markers, tags)
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl CheckpointMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Immutable snapshot of state for a thread and namespace
///
/// Never updated in place: saving the same id again replaces the stored row
/// wholesale (idempotent upsert), and history advances by writing children.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// Unique id within the thread and namespace
    pub id: CheckpointId,

    /// Thread this checkpoint belongs to
    pub thread_id: String,

    /// Sub-scope within the thread (empty for the root scope)
    #[serde(default)]
    pub namespace: String,

    /// Id of the checkpoint this one descends from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<CheckpointId>,

    /// Payload encoding ("json")
    pub checkpoint_type: String,

    /// The captured state
    pub state: serde_json::Value,

    /// When the snapshot was taken
    pub ts: DateTime<Utc>,

    pub metadata: CheckpointMetadata,

    /// Monotonically increasing version within the thread
    pub version: u64,
}

impl Checkpoint {
    /// Create a first-version checkpoint for a thread
    pub fn new(thread_id: impl Into<String>, state: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            parent_id: None,
            checkpoint_type: CHECKPOINT_TYPE_JSON.to_string(),
            state,
            ts: Utc::now(),
            metadata: CheckpointMetadata::new(),
            version: 1,
        }
    }

    pub fn with_id(mut self, id: impl Into<CheckpointId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<CheckpointId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: CheckpointMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Derive the successor checkpoint carrying new state
    ///
    /// The child gets a fresh id, this checkpoint as parent, and the next
    /// version number.
    pub fn child(&self, state: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: self.thread_id.clone(),
            namespace: self.namespace.clone(),
            parent_id: Some(self.id.clone()),
            checkpoint_type: self.checkpoint_type.clone(),
            state,
            ts: Utc::now(),
            metadata: CheckpointMetadata::new().with_source(CheckpointSource::Loop),
            version: self.version + 1,
        }
    }

    /// Derive a fork of this checkpoint under a different thread
    pub fn fork(&self, thread_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            namespace: self.namespace.clone(),
            parent_id: Some(self.id.clone()),
            checkpoint_type: self.checkpoint_type.clone(),
            state: self.state.clone(),
            ts: Utc::now(),
            metadata: CheckpointMetadata::new().with_source(CheckpointSource::Fork),
            version: 1,
        }
    }
}

/// Addressing for checkpoint operations
///
/// `checkpoint_id` of `None` means "the latest for this thread + namespace".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointConfig {
    pub thread_id: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<CheckpointId>,
}

impl CheckpointConfig {
    /// Address the latest checkpoint of a thread's root namespace
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            checkpoint_id: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_checkpoint_id(mut self, id: impl Into<CheckpointId>) -> Self {
        self.checkpoint_id = Some(id.into());
        self
    }
}

/// One entry in the per-task write ledger of a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingWrite {
    /// Task that produced the write
    pub task_id: String,

    /// Position of the write within the task's batch
    pub idx: u32,

    /// Channel (state key) written
    pub channel: String,

    pub value: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_checkpoint_defaults() {
        let cp = Checkpoint::new("thread-1", json!({"counter": 0}));
        assert_eq!(cp.thread_id, "thread-1");
        assert_eq!(cp.namespace, DEFAULT_NAMESPACE);
        assert_eq!(cp.version, 1);
        assert!(cp.parent_id.is_none());
        assert_eq!(cp.checkpoint_type, CHECKPOINT_TYPE_JSON);
    }

    #[test]
    fn test_child_chains_parent_and_version() {
        let root = Checkpoint::new("t", json!({"n": 1}));
        let child = root.child(json!({"n": 2}));

        assert_eq!(child.parent_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(child.version, 2);
        assert_eq!(child.thread_id, root.thread_id);
        assert_ne!(child.id, root.id);
    }

    #[test]
    fn test_fork_copies_state_under_new_thread() {
        let root = Checkpoint::new("t1", json!({"x": true}));
        let fork = root.fork("t2");

        assert_eq!(fork.thread_id, "t2");
        assert_eq!(fork.state, root.state);
        assert_eq!(fork.parent_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(fork.metadata.source, Some(CheckpointSource::Fork));
    }

    #[test]
    fn test_metadata_builder() {
        let meta = CheckpointMetadata::new()
            .with_source(CheckpointSource::Input)
            .with_step(-1)
            .with_extra("origin", json!("test"));

        assert_eq!(meta.source, Some(CheckpointSource::Input));
        assert_eq!(meta.step, Some(-1));
        assert_eq!(meta.extra.get("origin"), Some(&json!("test")));
    }

    #[test]
    fn test_config_addressing() {
        let config = CheckpointConfig::for_thread("t")
            .with_namespace("sub")
            .with_checkpoint_id("cp-9");

        assert_eq!(config.thread_id, "t");
        assert_eq!(config.namespace, "sub");
        assert_eq!(config.checkpoint_id.as_deref(), Some("cp-9"));
    }
}
