//! In-process sessions connected through a shared hub.
//!
//! Each [`MemorySession`] registers its action table with a [`SessionHub`].
//! Requests are dispatched on a fresh task, so handlers run concurrently with
//! the requester just as they would on a remote peer.

use crate::action::{ActionTable, Answer, InboundMessage};
use crate::error::SessionError;
use crate::session::Session;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Shared directory of in-process sessions.
#[derive(Clone, Default)]
pub struct SessionHub {
    sessions: Arc<DashMap<String, Arc<ActionTable>>>,
}

impl SessionHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session registered under `session_id`. It starts online.
    pub fn join(&self, session_id: impl Into<String>) -> MemorySession {
        let session_id = session_id.into();
        let actions = Arc::new(ActionTable::new());
        self.sessions.insert(session_id.clone(), Arc::clone(&actions));
        let (online, _) = watch::channel(true);
        debug!(session = %session_id, "Session joined hub");
        MemorySession {
            session_id,
            hub: self.clone(),
            actions,
            online,
        }
    }

    /// Whether a session with this id is registered.
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    fn table(&self, session_id: &str) -> Option<Arc<ActionTable>> {
        self.sessions.get(session_id).map(|t| Arc::clone(t.value()))
    }
}

/// A session living in the same process as its peers.
pub struct MemorySession {
    session_id: String,
    hub: SessionHub,
    actions: Arc<ActionTable>,
    online: watch::Sender<bool>,
}

impl MemorySession {
    /// Flip the online state, e.g. to simulate a dropped tracker connection.
    pub fn set_online(&self, up: bool) {
        self.online.send_replace(up);
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.hub
            .sessions
            .remove_if(&self.session_id, |_, t| Arc::ptr_eq(t, &self.actions));
    }
}

#[async_trait]
impl Session for MemorySession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn online(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    fn actions(&self) -> &ActionTable {
        &self.actions
    }

    async fn send_to(
        &self,
        target: &str,
        action: &str,
        data: Value,
    ) -> Result<Answer, SessionError> {
        let table = self
            .hub
            .table(target)
            .ok_or_else(|| SessionError::UnknownPeer(target.to_string()))?;
        let msg = InboundMessage {
            id: uuid::Uuid::new_v4().to_string(),
            action: action.to_string(),
            sender: self.session_id.clone(),
            data,
        };
        let responder = target.to_string();
        tokio::spawn(async move { table.dispatch(msg, &responder).await })
            .await
            .map_err(|_| SessionError::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionHandler;
    use crate::session::wait_online;
    use serde_json::json;
    use std::time::{Duration, Instant};

    struct Whoami;

    #[async_trait]
    impl ActionHandler for Whoami {
        async fn handle(&self, msg: InboundMessage) -> Value {
            json!({"sender": msg.sender})
        }
    }

    #[tokio::test]
    async fn test_send_between_sessions() {
        let hub = SessionHub::new();
        let a = hub.join("tracker:a");
        let b = hub.join("tracker:b");
        b.actions().register("whoami", Arc::new(Whoami));

        let answer = a.send_to("tracker:b", "whoami", json!({})).await.unwrap();
        assert_eq!(answer.sender, "tracker:b");
        assert_eq!(answer.data["sender"], "tracker:a");
    }

    #[tokio::test]
    async fn test_self_addressed_send() {
        let hub = SessionHub::new();
        let a = hub.join("a");
        a.actions().register("whoami", Arc::new(Whoami));
        let answer = a.send_to("a", "whoami", json!({})).await.unwrap();
        assert_eq!(answer.data["sender"], "a");
    }

    #[tokio::test]
    async fn test_unknown_peer() {
        let hub = SessionHub::new();
        let a = hub.join("a");
        let err = a.send_to("ghost", "whoami", json!({})).await.unwrap_err();
        assert!(matches!(err, SessionError::UnknownPeer(_)));
    }

    #[tokio::test]
    async fn test_drop_leaves_hub() {
        let hub = SessionHub::new();
        let a = hub.join("a");
        assert!(hub.contains("a"));
        drop(a);
        assert!(!hub.contains("a"));
    }

    #[tokio::test]
    async fn test_wait_online_times_out() {
        let hub = SessionHub::new();
        let a = hub.join("a");
        a.set_online(false);
        let started = Instant::now();
        let err = wait_online(&a, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, SessionError::Offline { timeout_ms: 50 }));
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_wait_online_wakes_up() {
        let hub = SessionHub::new();
        let a = Arc::new(hub.join("a"));
        a.set_online(false);
        let flip = Arc::clone(&a);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flip.set_online(true);
        });
        wait_online(a.as_ref(), Duration::from_secs(2)).await.unwrap();
    }
}
