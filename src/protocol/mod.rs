//! Protocol module for coordinator/relay-client communication
//!
//! Defines the message types and serialization for the relay transport.
//! The protocol uses flat JSON objects over WebSocket.

mod messages;

pub use messages::*;
