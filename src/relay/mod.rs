//! Relay client side
//!
//! Bridges a task engine to the coordinator over WebSocket.

pub mod client;
pub mod engine;
pub mod identity;
pub mod reconnect;

pub use client::{ClientEvent, ClientStatus, RelayClient, RelayClientConfig};
pub use engine::{EchoConfig, EchoEngine, EngineEvent, TaskEngine};
pub use reconnect::{ConnectionState, ReconnectManager, ReconnectPolicy};
