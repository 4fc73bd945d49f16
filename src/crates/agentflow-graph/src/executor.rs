//! Graph execution
//!
//! Walks a [`CompiledGraph`] from its entry point until [`END`], one node at a
//! time:
//!
//! 1. cancellation check, step accounting (budget exhaustion fails the run)
//! 2. interrupt check for registered interrupt points
//! 3. node execution, with timing and errors recorded into history and
//!    emitted as events
//! 4. state update
//! 5. routing: the node's conditional router if present, else the first
//!    successor in the adjacency index; no successor is an error, [`END`]
//!    terminates successfully
//!
//! When a checkpointer and thread config are attached, state is checkpointed
//! after every node, and a run against a thread with existing checkpoints
//! resumes from the latest one.

use crate::compile::CompiledGraph;
use crate::error::{GraphError, Result};
use crate::graph::END;
use agentflow_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointSource,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Metadata key recording where a checkpointed run continues
const NEXT_NODE_KEY: &str = "next_node";

/// Events emitted while a graph runs
///
/// Delivered to the optional event channel as they happen (the channel is
/// unbounded, so emission never blocks execution) and collected into the
/// [`ExecutionResult`]. Within one run, node events appear in execution
/// order.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    GraphStart { entry: String },
    NodeStart { node: String, step: usize },
    NodeEnd { node: String, duration: Duration },
    NodeError { node: String, error: String },
    Interrupted { node: String },
    GraphEnd { steps: usize },
}

/// History record of one node execution
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub node: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub error: Option<String>,
}

/// Everything a finished (or interrupted) run produced
#[derive(Debug)]
pub struct ExecutionResult {
    /// Final state (state at the pause point when interrupted)
    pub state: Value,

    /// One record per executed node, in execution order
    pub history: Vec<NodeRecord>,

    /// Events in emission order
    pub events: Vec<ExecutionEvent>,

    /// Whether the run stopped at an interrupt point
    pub interrupted: bool,

    /// Node the run will continue from, when interrupted
    pub next_node: Option<String>,

    /// Number of steps taken
    pub steps: usize,
}

struct RunState {
    events: Vec<ExecutionEvent>,
    event_tx: Option<mpsc::UnboundedSender<ExecutionEvent>>,
}

impl RunState {
    fn emit(&mut self, event: ExecutionEvent) {
        if let Some(tx) = &self.event_tx {
            // Receiver may be gone; execution does not care.
            let _ = tx.send(event.clone());
        }
        self.events.push(event);
    }
}

impl CompiledGraph {
    /// Execute the graph to completion and return the final state
    pub async fn invoke(&self, input: Value) -> Result<Value> {
        self.invoke_with_config(input, None).await
    }

    /// Execute with checkpoint configuration for persistence and resumption
    ///
    /// With a checkpointer attached and a thread config supplied, state is
    /// saved after every node; a later call for the same thread resumes from
    /// the latest checkpoint. Interruption surfaces as
    /// [`GraphError::Interrupted`]; use [`execute_with_result`](Self::execute_with_result)
    /// to get the paused state instead.
    #[tracing::instrument(skip(self, input, config), fields(entry = %self.entry_point))]
    pub async fn invoke_with_config(
        &self,
        input: Value,
        config: Option<CheckpointConfig>,
    ) -> Result<Value> {
        let result = self.run(input, config, None, None).await?;

        if result.interrupted {
            let node = result.next_node.unwrap_or_default();
            return Err(GraphError::Interrupted(node));
        }
        Ok(result.state)
    }

    /// Execute and package state, history, events, and the interrupted flag
    pub async fn execute_with_result(
        &self,
        input: Value,
        config: Option<CheckpointConfig>,
        cancellation: Option<CancellationToken>,
    ) -> Result<ExecutionResult> {
        self.run(input, config, cancellation, None).await
    }

    /// Execute while streaming events into the given channel
    pub async fn execute_with_events(
        &self,
        input: Value,
        config: Option<CheckpointConfig>,
        event_tx: mpsc::UnboundedSender<ExecutionEvent>,
    ) -> Result<ExecutionResult> {
        self.run(input, config, None, Some(event_tx)).await
    }

    async fn run(
        &self,
        input: Value,
        config: Option<CheckpointConfig>,
        cancellation: Option<CancellationToken>,
        event_tx: Option<mpsc::UnboundedSender<ExecutionEvent>>,
    ) -> Result<ExecutionResult> {
        if self.max_steps == 0 {
            return Err(GraphError::Configuration(
                "max_steps must be at least 1".into(),
            ));
        }

        let token = cancellation.unwrap_or_default();
        let mut run = RunState {
            events: Vec::new(),
            event_tx,
        };

        let mut state = input;
        let mut current = self.entry_point.clone();
        let mut history: Vec<NodeRecord> = Vec::new();
        let mut steps: usize = 0;
        let mut last_checkpoint: Option<Checkpoint> = None;
        // Set when resuming so the interrupt that paused the run does not
        // immediately re-fire.
        let mut resumed_at: Option<String> = None;

        if let (Some(saver), Some(cfg)) = (&self.checkpointer, &config) {
            if let Some(checkpoint) = saver.load(cfg).await? {
                tracing::info!(
                    thread_id = %cfg.thread_id,
                    checkpoint_id = %checkpoint.id,
                    "resuming from checkpoint"
                );

                if let Some(next) = checkpoint
                    .metadata
                    .extra
                    .get(NEXT_NODE_KEY)
                    .and_then(|v| v.as_str())
                {
                    if next != END {
                        current = next.to_string();
                        resumed_at = Some(current.clone());
                    }
                }

                // Checkpointed state is the base; a non-null object input is
                // merged over it so callers can feed new values on resume.
                let mut base = checkpoint.state.clone();
                if let (Some(base_map), Some(input_map)) = (base.as_object_mut(), state.as_object())
                {
                    for (key, value) in input_map {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
                state = base;
                last_checkpoint = Some(checkpoint);
            }
        }

        run.emit(ExecutionEvent::GraphStart {
            entry: current.clone(),
        });

        loop {
            if token.is_cancelled() {
                return Err(GraphError::Cancelled);
            }

            if current == END {
                break;
            }

            steps += 1;
            if steps > self.max_steps {
                return Err(GraphError::MaxSteps(self.max_steps));
            }

            // Interrupt check, skipped once for the node we resumed at.
            if self.interrupt_nodes.contains(&current) && resumed_at.as_deref() != Some(current.as_str()) {
                run.emit(ExecutionEvent::Interrupted {
                    node: current.clone(),
                });

                self.save_checkpoint(&config, &mut last_checkpoint, &state, &current, steps)
                    .await?;

                return Ok(ExecutionResult {
                    state,
                    history,
                    events: run.events,
                    interrupted: true,
                    next_node: Some(current),
                    steps: steps - 1,
                });
            }
            resumed_at = None;

            let spec = self.nodes.get(&current).ok_or_else(|| {
                GraphError::node_execution(&current, "node missing from compiled graph")
            })?;

            run.emit(ExecutionEvent::NodeStart {
                node: current.clone(),
                step: steps,
            });

            let started_at = Utc::now();
            let timer = std::time::Instant::now();
            let output = (spec.func)(state.clone()).await;
            let duration = timer.elapsed();

            match output {
                Ok(new_state) => {
                    history.push(NodeRecord {
                        node: current.clone(),
                        started_at,
                        duration,
                        error: None,
                    });
                    run.emit(ExecutionEvent::NodeEnd {
                        node: current.clone(),
                        duration,
                    });
                    state = new_state;
                }
                Err(error) => {
                    let message = error.to_string();
                    history.push(NodeRecord {
                        node: current.clone(),
                        started_at,
                        duration,
                        error: Some(message.clone()),
                    });
                    run.emit(ExecutionEvent::NodeError {
                        node: current.clone(),
                        error: message.clone(),
                    });
                    tracing::error!(node = %current, error = %message, "node failed");
                    return Err(GraphError::node_execution(&current, message));
                }
            }

            let next = self.route(&current, &state)?;

            self.save_checkpoint(&config, &mut last_checkpoint, &state, &next, steps)
                .await?;

            current = next;
        }

        run.emit(ExecutionEvent::GraphEnd { steps });
        tracing::debug!(steps, "graph run completed");

        Ok(ExecutionResult {
            state,
            history,
            events: run.events,
            interrupted: false,
            next_node: None,
            steps,
        })
    }

    /// Decide the node after `current`
    fn route(&self, current: &str, state: &Value) -> Result<String> {
        if let Some(conditional) = self.conditionals.get(current) {
            let path = (conditional.path)(state);
            return conditional
                .path_map
                .get(&path)
                .cloned()
                .ok_or_else(|| GraphError::UnknownRoute {
                    node: current.to_string(),
                    route: path,
                });
        }

        match self.successors(current).first() {
            Some(next) => Ok(next.clone()),
            None => Err(GraphError::NoNextNode(current.to_string())),
        }
    }

    async fn save_checkpoint(
        &self,
        config: &Option<CheckpointConfig>,
        last: &mut Option<Checkpoint>,
        state: &Value,
        next_node: &str,
        step: usize,
    ) -> Result<()> {
        let (saver, cfg) = match (&self.checkpointer, config) {
            (Some(saver), Some(cfg)) => (saver, cfg),
            _ => return Ok(()),
        };

        let mut checkpoint = match last.as_ref() {
            Some(prev) => prev.child(state.clone()),
            None => Checkpoint::new(cfg.thread_id.clone(), state.clone())
                .with_namespace(cfg.namespace.clone()),
        };
        checkpoint.metadata = CheckpointMetadata::new()
            .with_source(CheckpointSource::Loop)
            .with_step(step as i64)
            .with_extra(NEXT_NODE_KEY, json!(next_node));

        saver.save(checkpoint.clone()).await?;
        *last = Some(checkpoint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::StateGraph;
    use crate::graph::START;
    use agentflow_checkpoint::{CheckpointSaver, InMemorySaver};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn linear_graph() -> StateGraph {
        let mut graph = StateGraph::new();
        graph
            .add_node("double", |state: Value| async move {
                let n = state["n"].as_i64().unwrap_or(0);
                Ok(json!({"n": n * 2}))
            })
            .unwrap();
        graph
            .add_node("add_one", |state: Value| async move {
                let n = state["n"].as_i64().unwrap_or(0);
                Ok(json!({"n": n + 1}))
            })
            .unwrap();
        graph.add_edge(START, "double");
        graph.add_edge("double", "add_one");
        graph.add_edge("add_one", END);
        graph
    }

    #[tokio::test]
    async fn test_linear_execution() {
        let compiled = linear_graph().compile().unwrap();
        let result = compiled.invoke(json!({"n": 5})).await.unwrap();
        assert_eq!(result, json!({"n": 11}));
    }

    #[tokio::test]
    async fn test_history_matches_execution_order() {
        let compiled = linear_graph().compile().unwrap();
        let result = compiled
            .execute_with_result(json!({"n": 1}), None, None)
            .await
            .unwrap();

        let executed: Vec<&str> = result.history.iter().map(|r| r.node.as_str()).collect();
        assert_eq!(executed, ["double", "add_one"]);
        assert_eq!(result.steps, 2);
        assert!(result.history.iter().all(|r| r.error.is_none()));
    }

    #[tokio::test]
    async fn test_events_in_execution_order() {
        let compiled = linear_graph().compile().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = compiled
            .execute_with_events(json!({"n": 1}), None, tx)
            .await
            .unwrap();
        assert!(!result.interrupted);

        let mut received = Vec::new();
        while let Ok(event) = rx.try_recv() {
            received.push(event);
        }

        assert_eq!(received.len(), result.events.len());
        assert!(matches!(received[0], ExecutionEvent::GraphStart { .. }));
        assert!(matches!(
            received[1],
            ExecutionEvent::NodeStart { ref node, step: 1 } if node == "double"
        ));
        assert!(matches!(
            received.last().unwrap(),
            ExecutionEvent::GraphEnd { steps: 2 }
        ));
    }

    #[tokio::test]
    async fn test_conditional_routing() {
        let mut graph = StateGraph::new();
        graph
            .add_node("classify", |state: Value| async move { Ok(state) })
            .unwrap();
        graph
            .add_node("positive", |_| async move { Ok(json!({"sign": "+"})) })
            .unwrap();
        graph
            .add_node("negative", |_| async move { Ok(json!({"sign": "-"})) })
            .unwrap();

        graph.add_edge(START, "classify");
        graph
            .add_conditional_edges(
                "classify",
                |state: &Value| {
                    if state["value"].as_i64().unwrap_or(0) >= 0 {
                        "pos".to_string()
                    } else {
                        "neg".to_string()
                    }
                },
                HashMap::from([
                    ("pos".to_string(), "positive".to_string()),
                    ("neg".to_string(), "negative".to_string()),
                ]),
            )
            .unwrap();
        graph.add_edge("positive", END);
        graph.add_edge("negative", END);

        let compiled = graph.compile().unwrap();

        let result = compiled.invoke(json!({"value": 3})).await.unwrap();
        assert_eq!(result, json!({"sign": "+"}));

        let result = compiled.invoke(json!({"value": -3})).await.unwrap();
        assert_eq!(result, json!({"sign": "-"}));
    }

    #[tokio::test]
    async fn test_unknown_route_errors() {
        let mut graph = StateGraph::new();
        graph.add_node("r", |state: Value| async move { Ok(state) }).unwrap();
        graph.add_edge(START, "r");
        graph
            .add_conditional_edges(
                "r",
                |_: &Value| "nowhere".to_string(),
                HashMap::from([("somewhere".to_string(), END.to_string())]),
            )
            .unwrap();

        let compiled = graph.compile().unwrap();
        let err = compiled.invoke(json!({})).await.unwrap_err();
        assert!(matches!(err, GraphError::UnknownRoute { .. }));
    }

    #[tokio::test]
    async fn test_cycle_hits_step_budget() {
        let mut graph = StateGraph::new();
        graph
            .add_node("spin", |state: Value| async move {
                let n = state["n"].as_i64().unwrap_or(0);
                Ok(json!({"n": n + 1}))
            })
            .unwrap();
        graph.add_edge(START, "spin");
        graph.add_edge("spin", "spin");

        let compiled = graph.compile().unwrap().with_max_steps(5);
        let err = compiled.invoke(json!({"n": 0})).await.unwrap_err();
        assert!(matches!(err, GraphError::MaxSteps(5)));
    }

    #[tokio::test]
    async fn test_zero_max_steps_is_configuration_error() {
        let compiled = linear_graph().compile().unwrap().with_max_steps(0);
        let err = compiled.invoke(json!({})).await.unwrap_err();
        assert!(matches!(err, GraphError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_no_next_node() {
        let mut graph = StateGraph::new();
        graph.add_node("stub", |state: Value| async move { Ok(state) }).unwrap();
        graph.add_edge(START, "stub");

        let compiled = graph.compile().unwrap();
        let err = compiled.invoke(json!({})).await.unwrap_err();
        assert!(matches!(err, GraphError::NoNextNode(_)));
    }

    #[tokio::test]
    async fn test_node_error_recorded_and_surfaced() {
        let mut graph = StateGraph::new();
        graph
            .add_node("boom", |_| async move {
                Err(GraphError::node_execution("boom", "exploded"))
            })
            .unwrap();
        graph.add_edge(START, "boom");
        graph.add_edge("boom", END);

        let compiled = graph.compile().unwrap();
        let err = compiled.invoke(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("exploded"));
    }

    #[tokio::test]
    async fn test_cancellation_checked_at_step_boundary() {
        let token = CancellationToken::new();
        token.cancel();

        let compiled = linear_graph().compile().unwrap();
        let err = compiled
            .execute_with_result(json!({"n": 1}), None, Some(token))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Cancelled));
    }

    #[tokio::test]
    async fn test_interrupt_pauses_and_resume_continues() {
        let saver = Arc::new(InMemorySaver::new());
        let mut graph = StateGraph::new();
        graph
            .add_node("prepare", |state: Value| async move {
                let mut s = state;
                s["prepared"] = json!(true);
                Ok(s)
            })
            .unwrap();
        graph
            .add_node("approve", |state: Value| async move {
                let mut s = state;
                s["approved"] = json!(true);
                Ok(s)
            })
            .unwrap();
        graph.add_edge(START, "prepare");
        graph.add_edge("prepare", "approve");
        graph.add_edge("approve", END);

        let compiled = graph
            .compile()
            .unwrap()
            .with_checkpointer(saver.clone())
            .with_interrupt_before(["approve"]);

        let config = Some(CheckpointConfig::for_thread("review-1"));

        let paused = compiled
            .execute_with_result(json!({}), config.clone(), None)
            .await
            .unwrap();
        assert!(paused.interrupted);
        assert_eq!(paused.next_node.as_deref(), Some("approve"));
        assert_eq!(paused.state["prepared"], json!(true));
        assert!(paused.state.get("approved").is_none());

        // Resume: picks up at the interrupt point and runs through.
        let resumed = compiled
            .execute_with_result(Value::Null, config, None)
            .await
            .unwrap();
        assert!(!resumed.interrupted);
        assert_eq!(resumed.state["approved"], json!(true));
    }

    #[tokio::test]
    async fn test_checkpoints_written_after_each_node() {
        let saver = Arc::new(InMemorySaver::new());
        let compiled = linear_graph()
            .compile()
            .unwrap()
            .with_checkpointer(saver.clone());

        compiled
            .invoke_with_config(json!({"n": 1}), Some(CheckpointConfig::for_thread("t")))
            .await
            .unwrap();

        let checkpoints = saver.list("t").await.unwrap();
        assert_eq!(checkpoints.len(), 2);
        assert_eq!(checkpoints.last().unwrap().state, json!({"n": 3}));
    }

    #[tokio::test]
    async fn test_resume_merges_new_input_over_checkpoint_state() {
        let saver = Arc::new(InMemorySaver::new());
        let compiled = linear_graph()
            .compile()
            .unwrap()
            .with_checkpointer(saver.clone())
            .with_interrupt_before(["add_one"]);

        let config = Some(CheckpointConfig::for_thread("merge-t"));
        let paused = compiled
            .execute_with_result(json!({"n": 4}), config.clone(), None)
            .await
            .unwrap();
        assert!(paused.interrupted);
        assert_eq!(paused.state, json!({"n": 8}));

        // Override n on resume.
        let resumed = compiled
            .execute_with_result(json!({"n": 100}), config, None)
            .await
            .unwrap();
        assert_eq!(resumed.state, json!({"n": 101}));
    }
}
