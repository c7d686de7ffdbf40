//! Wire protocol message types.
//!
//! Peers exchange JSON-framed messages over TCP. Each message is prefixed
//! with a 4-byte big-endian length header. A response carries the id of the
//! request it answers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A wire protocol message (envelope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    /// Unique message ID. Responses reuse the request's id.
    pub id: String,
    /// Message variant.
    #[serde(flatten)]
    pub kind: WireMessageKind,
}

/// The different kinds of wire messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessageKind {
    /// First message on a connection: announce our session id.
    #[serde(rename = "hello")]
    Hello {
        session_id: String,
        protocol_version: u32,
    },
    /// Reply to `Hello`.
    #[serde(rename = "hello_ack")]
    HelloAck {
        session_id: String,
        protocol_version: u32,
    },
    /// Action request from one session to another.
    #[serde(rename = "request")]
    Request(WireRequest),
    /// Answer to a request.
    #[serde(rename = "response")]
    Response(WireResponse),
}

/// An action request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    /// Name of the action to run on the target, e.g. `modules.fetch`.
    pub action: String,
    /// Session id of the requester.
    pub sender: String,
    /// Session id of the addressee.
    pub target: String,
    /// Action payload.
    #[serde(default)]
    pub data: Value,
}

/// An answer to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    /// Action the answered request named.
    pub action: String,
    /// Session id of the answering peer.
    pub sender: String,
    /// Answer payload produced by the action handler.
    #[serde(default)]
    pub data: Value,
    /// Transport-level failure (e.g. no such action).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Encode a wire message to bytes (4-byte big-endian length + JSON).
pub fn encode_message(msg: &WireMessage) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    let len = json.len() as u32;
    let mut bytes = Vec::with_capacity(4 + json.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Parse a JSON body into a WireMessage.
pub fn decode_message(body: &[u8]) -> Result<WireMessage, serde_json::Error> {
    serde_json::from_slice(body)
}
