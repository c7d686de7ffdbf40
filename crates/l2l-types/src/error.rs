//! Shared error types for the l2l module protocol.

use thiserror::Error;

/// Top-level error type for remote module operations.
#[derive(Error, Debug)]
pub enum L2lError {
    /// The string is not an `l2l://<session>/<path>` address.
    #[error("Not a l2l url: {0}")]
    InvalidAddress(String),

    /// The local session did not come online within the wait bound.
    #[error("lively-2-lively not online (waited {timeout_ms}ms)")]
    Offline {
        /// How long we waited, in milliseconds.
        timeout_ms: u64,
    },

    /// The fs bridge does not know this method.
    #[error("unknown l2l fs request method {0}")]
    UnsupportedOperation(String),

    /// Request options are not a JSON object.
    #[error("invalid request options: {0}")]
    InvalidOptions(String),

    /// A request payload lacks a required key.
    #[error("message data for {action} does not have required property {field}")]
    MissingField {
        /// The missing key.
        field: String,
        /// The action whose payload was checked.
        action: String,
    },

    /// A served fetch resolved to a module owned by another peer.
    #[error("{0} is not local, only local modules are served")]
    NotLocal(String),

    /// A request named a module system this peer does not host.
    #[error("No module system named {0}")]
    UnknownSystem(String),

    /// The peer answered with an error payload.
    #[error("Remote error: {0}")]
    Remote(String),

    /// A filesystem primitive failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The session transport failed to deliver a request or its answer.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Alias for Result with L2lError.
pub type L2lResult<T> = Result<T, L2lError>;
