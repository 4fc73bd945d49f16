//! Embedding agents as graph nodes
//!
//! An [`AgentExecutor`] can serve as a node function inside a compiled state
//! graph: the node reads `state["input"]`, runs the agent to completion, and
//! writes `output`, `agent_success`, and the step log back into the state.

use crate::executor::AgentExecutor;
use agentflow_graph::{node_fn, GraphError, NodeFn};
use serde_json::{json, Value};
use std::sync::Arc;

impl AgentExecutor {
    /// Adapt this executor into a graph node function
    ///
    /// The node fails only when the executor itself errors (configuration,
    /// cancellation); an unsuccessful run is recorded in the state via
    /// `agent_success` so conditional edges can route on it.
    pub fn into_node(self: Arc<Self>) -> NodeFn {
        node_fn(move |mut state: Value| {
            let executor = self.clone();
            async move {
                let input = state
                    .get("input")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();

                let result = executor
                    .execute(&input)
                    .await
                    .map_err(|e| GraphError::node_execution("agent", e.to_string()))?;

                if let Some(map) = state.as_object_mut() {
                    map.insert("output".to_string(), json!(result.output));
                    map.insert("agent_success".to_string(), json!(result.success));
                    map.insert("steps".to_string(), serde_json::to_value(&result.steps)?);
                    Ok(state)
                } else {
                    Ok(json!({
                        "input": input,
                        "output": result.output,
                        "agent_success": result.success,
                        "steps": serde_json::to_value(&result.steps)?,
                    }))
                }
            }
        })
    }
}
