//! Protocol module for hub communication
//!
//! Defines the message types and serialization for the hub WebSocket API.
//! The protocol is JSON over WebSocket: commands carry a numeric id and
//! are answered by a `result` frame with the same id.

mod commands;
mod messages;

pub use commands::*;
pub use messages::*;
