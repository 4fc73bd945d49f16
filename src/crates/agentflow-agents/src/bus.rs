//! In-process multi-agent message bus
//!
//! One bounded queue, one (or more) dispatch loops. Ordering is defined at
//! the bus: messages are delivered in the order they were enqueued, and
//! broadcast is an explicit fan-out at delivery time, not a queue-level
//! multicast. There are deliberately no per-agent mailboxes.
//!
//! `send` blocks while the queue is full; cancellation lifts the block. An
//! agent's reply (returned from [`BusAgent::receive_message`]) is re-enqueued
//! by the dispatcher, so conversations flow through the same queue.

use crate::error::{AgentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Recipient meaning "every registered agent"
pub const BROADCAST: &str = "*";

/// Highest admissible priority
pub const MAX_PRIORITY: u8 = 10;

/// What a message means to its recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Task,
    Result,
    Query,
    Broadcast,
    Error,
    Ack,
}

/// A message between agents
///
/// Immutable once constructed; shared by reference. An empty `to` (or
/// [`BROADCAST`]) fans out to every registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub kind: MessageKind,
    pub content: Value,

    /// The earlier message this one answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// 0..=10; clamped on construction
    pub priority: u8,

    pub timestamp: DateTime<Utc>,
    pub requires_ack: bool,
}

impl AgentMessage {
    pub fn new(
        kind: MessageKind,
        from: impl Into<String>,
        to: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            kind,
            content,
            parent_id: None,
            priority: 5,
            timestamp: Utc::now(),
            requires_ack: false,
        }
    }

    pub fn task(from: impl Into<String>, to: impl Into<String>, content: Value) -> Self {
        Self::new(MessageKind::Task, from, to, content)
    }

    pub fn result(from: impl Into<String>, to: impl Into<String>, content: Value) -> Self {
        Self::new(MessageKind::Result, from, to, content)
    }

    pub fn error(from: impl Into<String>, to: impl Into<String>, content: Value) -> Self {
        Self::new(MessageKind::Error, from, to, content)
    }

    pub fn broadcast(from: impl Into<String>, content: Value) -> Self {
        Self::new(MessageKind::Broadcast, from, BROADCAST, content)
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_PRIORITY);
        self
    }

    pub fn with_ack_required(mut self) -> Self {
        self.requires_ack = true;
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.to.is_empty() || self.to == BROADCAST
    }
}

/// An agent reachable through the bus
#[async_trait]
pub trait BusAgent: Send + Sync {
    fn id(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Handle one message; an optional reply is re-enqueued by the
    /// dispatcher
    async fn receive_message(&self, message: AgentMessage) -> Result<Option<AgentMessage>>;
}

/// Cloneable handle for producing onto the bus queue
#[derive(Clone)]
pub struct BusSender {
    tx: mpsc::Sender<AgentMessage>,
}

impl BusSender {
    /// Enqueue a message; blocks while the queue is full
    pub async fn send(&self, message: AgentMessage) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| AgentError::Bus("message queue is closed".into()))
    }

    /// Enqueue, giving up when the token fires first
    pub async fn send_with_cancellation(
        &self,
        message: AgentMessage,
        token: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            sent = self.tx.send(message) => {
                sent.map_err(|_| AgentError::Bus("message queue is closed".into()))
            }
            _ = token.cancelled() => Err(AgentError::Cancelled),
        }
    }
}

/// Bounded pub/sub bus with point-to-point and broadcast delivery
pub struct MessageBus {
    tx: mpsc::Sender<AgentMessage>,
    rx: Mutex<mpsc::Receiver<AgentMessage>>,
    agents: RwLock<HashMap<String, Arc<dyn BusAgent>>>,
}

impl MessageBus {
    /// Create a bus whose queue holds at most `queue_size` messages
    pub fn new(queue_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Handle for producers (agents, coordinators)
    pub fn sender(&self) -> BusSender {
        BusSender {
            tx: self.tx.clone(),
        }
    }

    /// Register an agent under its id
    pub async fn register(&self, agent: Arc<dyn BusAgent>) -> Result<()> {
        let id = agent.id().to_string();
        let mut agents = self.agents.write().await;

        if agents.contains_key(&id) {
            return Err(AgentError::Bus(format!(
                "agent '{}' is already registered",
                id
            )));
        }
        agents.insert(id, agent);
        Ok(())
    }

    pub async fn unregister(&self, id: &str) -> Result<()> {
        self.agents
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AgentError::AgentNotFound(id.to_string()))
    }

    pub async fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Enqueue a message; blocks while the queue is full
    pub async fn send(&self, message: AgentMessage) -> Result<()> {
        self.sender().send(message).await
    }

    /// Enqueue with cancellation
    pub async fn send_with_cancellation(
        &self,
        message: AgentMessage,
        token: &CancellationToken,
    ) -> Result<()> {
        self.sender().send_with_cancellation(message, token).await
    }

    /// Deliver a message directly, bypassing the queue
    ///
    /// Broadcasts fan out to every registered agent; a point-to-point
    /// message to an unknown recipient is an error. Returns the replies.
    pub async fn route(&self, message: AgentMessage) -> Result<Vec<AgentMessage>> {
        let targets: Vec<Arc<dyn BusAgent>> = {
            let agents = self.agents.read().await;

            if message.is_broadcast() {
                let mut all: Vec<_> = agents.values().cloned().collect();
                all.sort_by(|a, b| a.id().cmp(b.id()));
                all
            } else {
                vec![agents
                    .get(&message.to)
                    .cloned()
                    .ok_or_else(|| AgentError::AgentNotFound(message.to.clone()))?]
            }
        };

        let mut replies = Vec::new();
        for agent in targets {
            tracing::trace!(agent = agent.id(), kind = ?message.kind, "delivering message");
            if let Some(reply) = agent.receive_message(message.clone()).await? {
                replies.push(reply);
            }
        }
        Ok(replies)
    }

    /// Pull one message off the queue and route it
    ///
    /// Replies are re-enqueued. Returns `false` once the queue is closed and
    /// drained.
    pub async fn dispatch_next(&self) -> Result<bool> {
        let message = { self.rx.lock().await.recv().await };

        let message = match message {
            Some(message) => message,
            None => return Ok(false),
        };

        for reply in self.route(message).await? {
            self.send(reply).await?;
        }
        Ok(true)
    }

    /// Dispatch until the token fires or the queue closes
    pub async fn run_dispatch(&self, token: CancellationToken) -> Result<()> {
        loop {
            let message = {
                let mut rx = self.rx.lock().await;
                tokio::select! {
                    received = rx.recv() => received,
                    _ = token.cancelled() => return Ok(()),
                }
            };

            let message = match message {
                Some(message) => message,
                None => return Ok(()),
            };

            match self.route(message).await {
                Ok(replies) => {
                    for reply in replies {
                        self.send_with_cancellation(reply, &token).await?;
                    }
                }
                Err(error) => {
                    // Undeliverable messages are dropped, not fatal to the
                    // dispatcher.
                    tracing::warn!(%error, "failed to route message");
                }
            }
        }
    }
}
