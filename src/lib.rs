//! Chat Relay
//!
//! Bridges chat channels to remote task engines. A coordinator accepts
//! WebSocket connections from relay clients, elects one of them as leader,
//! forwards chat input and control commands to it, and streams the leader's
//! task events back to the right channel.

pub mod chat;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod relay;
pub mod version;

pub use error::{CommandError, Error, ErrorCode, Result};
