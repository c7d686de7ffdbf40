//! Named action handlers answering inbound requests.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// A request as seen by the handler that answers it.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Correlation id of the request.
    pub id: String,
    /// Action name the request was addressed to.
    pub action: String,
    /// Session id of the requester.
    pub sender: String,
    /// Request payload.
    pub data: Value,
}

/// The single answer a requester receives.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    /// Action the request named.
    pub action: String,
    /// Session id of the answering peer.
    pub sender: String,
    /// Payload produced by the handler.
    pub data: Value,
    /// Set when the request never reached a handler.
    pub error: Option<String>,
}

impl Answer {
    /// The error carried by this answer, either at top level or inside `data`.
    pub fn error_text(&self) -> Option<String> {
        if let Some(e) = &self.error {
            return Some(e.clone());
        }
        match self.data.get("error") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

/// Handler for one action. Every call must produce an answer payload;
/// failures are expressed as `{"error": ...}`.
#[async_trait]
pub trait ActionHandler: Send + Sync + 'static {
    async fn handle(&self, msg: InboundMessage) -> Value;
}

/// Registry of action handlers, keyed by action name.
#[derive(Default)]
pub struct ActionTable {
    handlers: DashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `action`, replacing any previous handler.
    pub fn register(&self, action: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(action.into(), handler);
    }

    /// Remove the handler for `action`. Returns whether one was registered.
    pub fn remove(&self, action: &str) -> bool {
        self.handlers.remove(action).is_some()
    }

    /// Check whether a handler is registered for `action`.
    pub fn contains(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    /// Names of all registered actions, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Run the handler for `msg` and wrap its payload into an answer from
    /// `responder`. Unknown actions are answered with a top-level error.
    pub async fn dispatch(&self, msg: InboundMessage, responder: &str) -> Answer {
        let action = msg.action.clone();
        // Clone out of the map so no shard lock is held across the await.
        let handler = self.handlers.get(&action).map(|h| Arc::clone(h.value()));
        match handler {
            Some(handler) => {
                debug!(action = %action, sender = %msg.sender, "Dispatching action");
                let data = handler.handle(msg).await;
                Answer {
                    action,
                    sender: responder.to_string(),
                    data,
                    error: None,
                }
            }
            None => {
                warn!(action = %action, sender = %msg.sender, "No handler for action");
                Answer {
                    error: Some(format!("unknown action {action}")),
                    action,
                    sender: responder.to_string(),
                    data: Value::Null,
                }
            }
        }
    }
}
