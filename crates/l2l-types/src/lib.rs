//! Core types for the l2l remote module protocol.
//!
//! This crate defines the data structures shared by the session transport,
//! the module protocol, and the CLI. It contains no business logic.

pub mod config;
pub mod error;
pub mod event;
