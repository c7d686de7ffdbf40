//! Session messaging transport ("l2l").
//!
//! Peers are addressed by session id. A request names an action; the
//! receiving peer dispatches it to the handler registered under that name and
//! sends exactly one answer back.
//!
//! ## Architecture
//!
//! - **Session**: trait the module protocol talks to (send, online state, actions)
//! - **ActionTable**: named handlers answering inbound requests
//! - **MemorySession / SessionHub**: in-process sessions, used by tests and embedders
//! - **SessionNode**: TCP session with JSON-framed messages
//! - **PeerRegistry**: peers a node is connected to

pub mod action;
pub mod error;
pub mod memory;
pub mod message;
pub mod node;
pub mod registry;
pub mod session;

pub use action::{ActionHandler, ActionTable, Answer, InboundMessage};
pub use error::SessionError;
pub use memory::{MemorySession, SessionHub};
pub use message::{WireMessage, WireMessageKind, WireRequest, WireResponse};
pub use node::{NodeConfig, SessionNode};
pub use registry::{PeerEntry, PeerRegistry, PeerState};
pub use session::{wait_online, Session};
