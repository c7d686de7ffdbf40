//! Errors from the session transport layer.

use l2l_types::error::L2lError;
use thiserror::Error;

/// Errors from the session transport layer.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },
    #[error("Protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch { local: u32, remote: u32 },
    #[error("Unknown session: {0}")]
    UnknownPeer(String),
    #[error("Session not online after {timeout_ms}ms")]
    Offline { timeout_ms: u64 },
}

impl From<SessionError> for L2lError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Offline { timeout_ms } => L2lError::Offline { timeout_ms },
            other => L2lError::Transport(other.to_string()),
        }
    }
}
