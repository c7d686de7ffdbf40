//! Subscriber registry and the client side of (un)subscribing.

use crate::services::actions;
use chrono::{DateTime, Utc};
use l2l_session::Session;
use l2l_types::error::{L2lError, L2lResult};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

/// Outcome of an add request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeStatus {
    Subscribed,
    AlreadySubscribed,
}

impl SubscribeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribed => "subscribed",
            Self::AlreadySubscribed => "already subscribed",
        }
    }
}

/// Outcome of a remove request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeStatus {
    Unsubscribed,
    NotSubscribed,
}

impl UnsubscribeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsubscribed => "unsubscribed",
            Self::NotSubscribed => "not subscribed",
        }
    }
}

/// A remote session receiving this system's module events.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub session_id: String,
    pub since: DateTime<Utc>,
}

/// Set of sessions subscribed to one module system.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<String, Subscriber>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session_id: &str) -> SubscribeStatus {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        if subs.contains_key(session_id) {
            return SubscribeStatus::AlreadySubscribed;
        }
        subs.insert(
            session_id.to_string(),
            Subscriber {
                session_id: session_id.to_string(),
                since: Utc::now(),
            },
        );
        info!(session = %session_id, "Subscriber added");
        SubscribeStatus::Subscribed
    }

    pub fn remove(&self, session_id: &str) -> UnsubscribeStatus {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        match subs.remove(session_id) {
            Some(_) => {
                info!(session = %session_id, "Subscriber removed");
                UnsubscribeStatus::Unsubscribed
            }
            None => UnsubscribeStatus::NotSubscribed,
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        subs.contains_key(session_id)
    }

    /// Subscribed session ids, sorted.
    pub fn session_ids(&self) -> Vec<String> {
        let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = subs.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get(&self, session_id: &str) -> Option<Subscriber> {
        let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        subs.get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ask `remote` to relay its module events to this session.
///
/// `system` selects a named module system on the remote side.
pub async fn subscribe_remote(
    session: &dyn Session,
    remote: &str,
    system: Option<&str>,
) -> L2lResult<String> {
    request_status(session, remote, actions::ADD_SUBSCRIBER, system).await
}

/// Ask `remote` to stop relaying module events to this session.
pub async fn unsubscribe_remote(
    session: &dyn Session,
    remote: &str,
    system: Option<&str>,
) -> L2lResult<String> {
    request_status(session, remote, actions::REMOVE_SUBSCRIBER, system).await
}

async fn request_status(
    session: &dyn Session,
    remote: &str,
    action: &str,
    system: Option<&str>,
) -> L2lResult<String> {
    let mut data = json!({});
    if let Some(name) = system {
        data["System"] = Value::from(name);
    }
    let answer = session.send_to(remote, action, data).await?;
    if let Some(err) = answer.error_text() {
        return Err(L2lError::Remote(err));
    }
    answer
        .data
        .get("status")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| L2lError::Remote(format!("{action} answer carries no status")))
}
