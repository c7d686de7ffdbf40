//! The session interface the module protocol is written against.

use crate::action::{ActionTable, Answer};
use crate::error::SessionError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;

/// A peer-addressed messaging session.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// This session's id; other peers address it by this value.
    fn session_id(&self) -> &str;

    /// Online state; `true` once requests can be sent.
    fn online(&self) -> watch::Receiver<bool>;

    /// Actions this session answers.
    fn actions(&self) -> &ActionTable;

    /// Send one request to `target` and await its single answer.
    ///
    /// There is no timeout: a peer that never answers keeps the future
    /// pending until the connection to it drops.
    async fn send_to(&self, target: &str, action: &str, data: Value)
        -> Result<Answer, SessionError>;
}

/// Wait until `session` reports online, for at most `timeout`.
pub async fn wait_online(session: &dyn Session, timeout: Duration) -> Result<(), SessionError> {
    let mut online = session.online();
    let offline = SessionError::Offline {
        timeout_ms: timeout.as_millis() as u64,
    };
    let outcome = match tokio::time::timeout(timeout, online.wait_for(|up| *up)).await {
        Ok(Ok(_)) => Ok(()),
        // Sender dropped: the session is gone and will never come online.
        Ok(Err(_)) => Err(offline),
        Err(_) => Err(offline),
    };
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SessionHub;

    #[tokio::test]
    async fn test_wait_online_when_already_online() {
        let hub = SessionHub::new();
        let session = hub.join("a");
        assert!(wait_online(&session, Duration::from_millis(10)).await.is_ok());
        // Repeated waits borrow a fresh receiver each time.
        assert!(wait_online(&session, Duration::from_millis(10)).await.is_ok());
    }
}
