//! Logging middleware with a pluggable sink

use crate::error::Result;
use crate::middleware::{AgentMiddleware, PlanContext};
use crate::step::{AgentAction, AgentResult};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Where log lines go; defaults to `tracing::info!`
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Logs every model and tool interaction of a run
pub struct LoggingMiddleware {
    sink: LogSink,
}

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self {
            sink: Arc::new(|line| tracing::info!("{}", line)),
        }
    }

    /// Redirect output, e.g. into a buffer for tests
    pub fn with_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.sink = Arc::new(sink);
        self
    }

    fn log(&self, line: String) {
        (self.sink)(&line);
    }
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentMiddleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn before_model(&self, ctx: &mut PlanContext) -> Result<()> {
        self.log(format!(
            "step {}: planning (history: {} steps)",
            ctx.step, ctx.history_len
        ));
        Ok(())
    }

    async fn after_model(&self, ctx: &PlanContext, action: &mut AgentAction) -> Result<()> {
        let summary = match action {
            AgentAction::ToolCall { tool, .. } => format!("tool call: {}", tool),
            AgentAction::Finish { .. } => "finish".to_string(),
            AgentAction::Error { message } => format!("error: {}", message),
        };
        self.log(format!("step {}: planner decided {}", ctx.step, summary));
        Ok(())
    }

    async fn before_tool_call(&self, tool: &str, input: &mut Value) -> Result<()> {
        self.log(format!("invoking tool '{}' with {}", tool, input));
        Ok(())
    }

    async fn after_tool_call(
        &self,
        tool: &str,
        _input: &Value,
        output: Result<Value>,
    ) -> Result<Value> {
        match &output {
            Ok(_) => self.log(format!("tool '{}' succeeded", tool)),
            Err(e) => self.log(format!("tool '{}' failed: {}", tool, e)),
        }
        output
    }

    async fn on_complete(&self, result: &AgentResult) -> Result<()> {
        self.log(format!(
            "run finished: success={} steps={}",
            result.success, result.total_steps
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_sink_receives_all_hooks() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink_lines = lines.clone();
        let middleware =
            LoggingMiddleware::new().with_sink(move |line| sink_lines.lock().unwrap().push(line.to_string()));

        let mut ctx = PlanContext::new(0, "q", 0);
        middleware.before_model(&mut ctx).await.unwrap();

        let mut action = AgentAction::tool_call("search", serde_json::json!({"q": "x"}));
        middleware.after_model(&ctx, &mut action).await.unwrap();

        let mut input = serde_json::json!({"q": "x"});
        middleware.before_tool_call("search", &mut input).await.unwrap();
        middleware
            .after_tool_call("search", &input, Ok(serde_json::json!("found")))
            .await
            .unwrap();

        let result = AgentResult::completed("done", vec![], 1);
        middleware.on_complete(&result).await.unwrap();

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 5);
        assert!(lines[1].contains("tool call: search"));
        assert!(lines[4].contains("success=true"));
    }
}
