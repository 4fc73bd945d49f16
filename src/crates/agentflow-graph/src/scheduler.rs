//! Node scheduling strategies
//!
//! The [`Scheduler`] runs groups of nodes either sequentially (each node sees
//! its predecessor's output) or in parallel (every node sees the same input,
//! bounded by a semaphore, outputs collected in declaration order). Merging
//! parallel outputs back into one state is the caller's job via the
//! configured [`StateMerger`].

use crate::error::{GraphError, Result};
use crate::graph::NodeSpec;
use crate::reducer::{LastValueMerger, StateMerger};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// How a group of nodes is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStrategy {
    #[default]
    Sequential,
    Parallel,
}

/// Bounded node scheduler with a pluggable state merger
pub struct Scheduler {
    strategy: ExecutionStrategy,
    semaphore: Arc<Semaphore>,
    merger: Arc<dyn StateMerger>,
}

impl Scheduler {
    /// Create a scheduler with the given strategy and concurrency bound
    pub fn new(strategy: ExecutionStrategy, max_concurrency: usize) -> Self {
        Self {
            strategy,
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            merger: Arc::new(LastValueMerger),
        }
    }

    /// Replace the state merger used by [`Scheduler::merge`]
    pub fn with_merger(mut self, merger: Arc<dyn StateMerger>) -> Self {
        self.merger = merger;
        self
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    /// Run one node under the concurrency bound
    pub async fn schedule_node(&self, spec: &NodeSpec, state: Value) -> Result<Value> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| GraphError::Cancelled)?;

        tracing::trace!(node = %spec.name, "scheduling node");
        (spec.func)(state)
            .await
            .map_err(|e| match e {
                err @ GraphError::NodeExecution { .. } => err,
                other => GraphError::node_execution(&spec.name, other.to_string()),
            })
    }

    /// Run a group of nodes according to the strategy
    ///
    /// Sequential: each node receives the previous node's output; the result
    /// vector holds every intermediate output in order.
    ///
    /// Parallel: every node receives a clone of the same input; results come
    /// back in the group's declaration order and the first error aborts the
    /// whole group.
    pub async fn schedule_nodes(&self, specs: &[NodeSpec], state: Value) -> Result<Vec<Value>> {
        if specs.is_empty() {
            return Ok(Vec::new());
        }

        match self.strategy {
            ExecutionStrategy::Sequential => {
                let mut outputs = Vec::with_capacity(specs.len());
                let mut current = state;

                for spec in specs {
                    current = self.schedule_node(spec, current).await?;
                    outputs.push(current.clone());
                }
                Ok(outputs)
            }
            ExecutionStrategy::Parallel => {
                let futures = specs
                    .iter()
                    .map(|spec| self.schedule_node(spec, state.clone()));
                futures::future::try_join_all(futures).await
            }
        }
    }

    /// Merge parallel outputs using the configured merger
    pub fn merge(&self, current: Value, updates: Vec<Value>) -> Value {
        self.merger.merge(current, updates)
    }
}
