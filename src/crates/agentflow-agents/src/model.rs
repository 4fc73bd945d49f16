//! Chat model abstraction
//!
//! agentflow is an orchestration framework, not an LLM client: the core
//! consumes the [`ChatModel`] trait and users implement it for their
//! provider. The trait is deliberately small - invoke, stream, tool binding,
//! structured output - and every planner works against it.
//!
//! [`ScriptedModel`] is the in-tree implementation: a deterministic model
//! that replays canned responses, used throughout the test suites.

use crate::error::{AgentError, Result};
use crate::tool::ToolSpec;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model
///
/// `arguments` is the raw JSON string as produced by the model; use
/// [`ToolCall::parsed_arguments`] to decode it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Build a call from an already-structured argument value
    pub fn from_value(id: impl Into<String>, name: impl Into<String>, arguments: &Value) -> Self {
        Self::new(id, name, arguments.to_string())
    }

    /// Decode the argument string
    ///
    /// Non-JSON arguments come back wrapped as `{"input": <raw>}` so tools
    /// always receive an object.
    pub fn parsed_arguments(&self) -> Value {
        serde_json::from_str(&self.arguments)
            .unwrap_or_else(|_| serde_json::json!({ "input": self.arguments }))
    }
}

/// One turn of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// For tool messages: the call this message answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        let mut message = Self::new(MessageRole::Tool, content);
        message.tool_call_id = Some(tool_call_id.into());
        message
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = Some(tool_calls);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls
            .as_ref()
            .map(|calls| !calls.is_empty())
            .unwrap_or(false)
    }

    pub fn is_assistant(&self) -> bool {
        self.role == MessageRole::Assistant
    }
}

/// Options forwarded to the underlying model call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvokeOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
}

/// A streamed fragment of an assistant message
#[derive(Debug, Clone, PartialEq)]
pub struct MessageChunk {
    pub content: String,
    pub done: bool,
}

/// Stream of message fragments
pub type MessageStream = BoxStream<'static, Result<MessageChunk>>;

/// Provider-agnostic chat model
///
/// Implementations must be `Send + Sync`; share them as
/// `Arc<dyn ChatModel>`. `bind_tools` and `with_structured_output` return a
/// derived model; the defaults return an unchanged clone for providers
/// without native support.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Produce one complete assistant message
    async fn invoke(&self, messages: &[Message], options: &InvokeOptions) -> Result<Message>;

    /// Stream the response fragment by fragment
    ///
    /// The default implementation degrades to a single-chunk stream over
    /// [`invoke`](Self::invoke).
    async fn stream(&self, messages: &[Message], options: &InvokeOptions) -> Result<MessageStream> {
        let message = self.invoke(messages, options).await?;
        let chunks = vec![Ok(MessageChunk {
            content: message.content,
            done: true,
        })];
        Ok(futures::stream::iter(chunks).boxed())
    }

    /// Derive a model with tool schemas attached
    fn bind_tools(&self, _tools: Vec<ToolSpec>) -> Box<dyn ChatModel> {
        self.clone_box()
    }

    /// Derive a model constrained to emit the given output schema
    fn with_structured_output(&self, _schema: Value) -> Box<dyn ChatModel> {
        self.clone_box()
    }

    /// Clone into a boxed trait object
    fn clone_box(&self) -> Box<dyn ChatModel>;
}

impl Clone for Box<dyn ChatModel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Deterministic model replaying a queue of canned responses
///
/// Each `invoke` pops the next scripted message; when the queue runs dry the
/// call fails with [`AgentError::Model`]. The prompts seen by the model and
/// any tools bound to it are recorded for assertions.
#[derive(Clone)]
pub struct ScriptedModel {
    responses: Arc<Mutex<VecDeque<Message>>>,
    fallback: Arc<Mutex<Option<Message>>>,
    calls: Arc<Mutex<Vec<Vec<Message>>>>,
    bound_tools: Arc<Mutex<Vec<ToolSpec>>>,
}

impl ScriptedModel {
    pub fn new(responses: impl IntoIterator<Item = Message>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into_iter().collect())),
            fallback: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(Vec::new())),
            bound_tools: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A model that always answers with the same text
    pub fn always(content: impl Into<String>) -> Self {
        let model = Self::new([]);
        *model.fallback.lock().unwrap() = Some(Message::assistant(content.into()));
        model
    }

    /// Number of invocations so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// The message lists passed to each invocation
    pub fn recorded_calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }

    /// Tools bound via [`ChatModel::bind_tools`]
    pub fn bound_tools(&self) -> Vec<ToolSpec> {
        self.bound_tools.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn invoke(&self, messages: &[Message], _options: &InvokeOptions) -> Result<Message> {
        self.calls.lock().unwrap().push(messages.to_vec());

        if let Some(message) = self.responses.lock().unwrap().pop_front() {
            return Ok(message);
        }
        self.fallback
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AgentError::Model("scripted model has no responses left".into()))
    }

    fn bind_tools(&self, tools: Vec<ToolSpec>) -> Box<dyn ChatModel> {
        let bound = self.clone();
        *bound.bound_tools.lock().unwrap() = tools;
        Box::new(bound)
    }

    fn clone_box(&self) -> Box<dyn ChatModel> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_constructors() {
        let msg = Message::user("hello").with_name("alice");
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.name.as_deref(), Some("alice"));

        let tool_msg = Message::tool("42", "call_1");
        assert_eq!(tool_msg.role, MessageRole::Tool);
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_tool_call_argument_parsing() {
        let call = ToolCall::new("c1", "calc", r#"{"a": 2, "b": 3}"#);
        assert_eq!(call.parsed_arguments(), json!({"a": 2, "b": 3}));

        let sloppy = ToolCall::new("c2", "search", "plain text query");
        assert_eq!(
            sloppy.parsed_arguments(),
            json!({"input": "plain text query"})
        );
    }

    #[test]
    fn test_has_tool_calls() {
        let plain = Message::assistant("done");
        assert!(!plain.has_tool_calls());

        let with_calls = Message::assistant("calling").with_tool_calls(vec![ToolCall::new(
            "c1",
            "calc",
            "{}",
        )]);
        assert!(with_calls.has_tool_calls());
    }

    #[tokio::test]
    async fn test_scripted_model_replays_in_order() {
        let model = ScriptedModel::new([
            Message::assistant("first"),
            Message::assistant("second"),
        ]);

        let opts = InvokeOptions::default();
        assert_eq!(
            model.invoke(&[Message::user("q")], &opts).await.unwrap().content,
            "first"
        );
        assert_eq!(
            model.invoke(&[Message::user("q")], &opts).await.unwrap().content,
            "second"
        );
        assert!(model.invoke(&[Message::user("q")], &opts).await.is_err());
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn test_default_stream_is_single_chunk() {
        let model = ScriptedModel::new([Message::assistant("streamed")]);
        let mut stream = model
            .stream(&[Message::user("q")], &InvokeOptions::default())
            .await
            .unwrap();

        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(chunk.content, "streamed");
        assert!(chunk.done);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_bind_tools_records_specs() {
        let model = ScriptedModel::new([Message::assistant("ok")]);
        let bound = model.bind_tools(vec![ToolSpec {
            name: "calc".into(),
            description: "arithmetic".into(),
            parameters: json!({"type": "object"}),
        }]);

        // The scripted model shares state with its bound clone.
        assert_eq!(model.bound_tools().len(), 1);
        let reply = bound
            .invoke(&[Message::user("q")], &InvokeOptions::default())
            .await
            .unwrap();
        assert_eq!(reply.content, "ok");
    }
}
