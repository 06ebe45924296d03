//! Client registry and leader election
//!
//! Tracks connected relay clients in connection order. The leader is always
//! the head of that order; every membership change re-runs the election and
//! pushes `{isActive}` to every live client before returning.

use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::Message;

// ─────────────────────────────────────────────────────────────────
// Client Handle
// ─────────────────────────────────────────────────────────────────

/// What the coordinator can ask a connection's writer to do
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Write one protocol message
    Frame(Message),
    /// Close the transport
    Close,
}

/// Sending half of one client connection
#[derive(Debug, Clone)]
pub struct ClientHandle {
    client_id: String,
    seq: u64,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ClientHandle {
    /// Create a handle plus the receiver its writer task drains
    pub fn new(client_id: impl Into<String>, seq: u64) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            client_id: client_id.into(),
            seq,
            tx,
        };
        (handle, rx)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Connection sequence number, unique per accepted transport
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Queue a message; fails once the writer has gone away
    pub fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(Outbound::Frame(message))
            .map_err(|_| Error::TransportClosed {
                client_id: self.client_id.clone(),
            })
    }

    /// Ask the writer to close the transport
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ─────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct RelayClient {
    handle: ClientHandle,
    registered_at: Instant,
}

/// Result of one election round
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Election {
    /// Leader after the round, if anyone is left
    pub leader: Option<String>,
    /// Whether leadership moved to a different client
    pub changed: bool,
    /// Clients dropped because their transport failed during notification
    pub evicted: Vec<String>,
}

/// Insertion-ordered set of live relay clients
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Vec<RelayClient>,
    leader: Option<String>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client at the end of connection order and re-elect.
    ///
    /// A client id that is already present is treated as the same client
    /// returning: its old transport is closed and removed first.
    pub fn register(&mut self, handle: ClientHandle) -> Election {
        if let Some(pos) = self.position(handle.client_id()) {
            let old = self.clients.remove(pos);
            info!(
                client_id = %handle.client_id(),
                old_seq = old.handle.seq(),
                new_seq = handle.seq(),
                "Client re-registered, closing superseded transport"
            );
            old.handle.close();
        }

        debug!(client_id = %handle.client_id(), seq = handle.seq(), "Client registered");
        self.clients.push(RelayClient {
            handle,
            registered_at: Instant::now(),
        });
        self.elect()
    }

    /// Remove a client by id and re-elect. Returns `None` if it was not registered.
    pub fn unregister(&mut self, client_id: &str) -> Option<Election> {
        let pos = self.position(client_id)?;
        let removed = self.clients.remove(pos);
        removed.handle.close();
        debug!(
            client_id = %client_id,
            connected_for_ms = removed.registered_at.elapsed().as_millis() as u64,
            "Client unregistered"
        );
        Some(self.elect())
    }

    /// Remove a client only if `seq` is still its live connection.
    ///
    /// A close from a transport that was already superseded by a newer
    /// connection with the same id must not evict the newer one.
    pub fn unregister_connection(&mut self, client_id: &str, seq: u64) -> Option<Election> {
        let pos = self.position(client_id)?;
        if self.clients[pos].handle.seq() != seq {
            debug!(client_id = %client_id, seq, "Ignoring close of superseded connection");
            return None;
        }
        self.unregister(client_id)
    }

    pub fn current_leader(&self) -> Option<&str> {
        self.leader.as_deref()
    }

    pub fn leader_handle(&self) -> Option<&ClientHandle> {
        let leader = self.leader.as_deref()?;
        self.clients
            .iter()
            .find(|c| c.handle.client_id() == leader)
            .map(|c| &c.handle)
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.position(client_id).is_some()
    }

    /// Client ids in connection order
    pub fn client_ids(&self) -> Vec<String> {
        self.clients
            .iter()
            .map(|c| c.handle.client_id().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Close every transport and forget all clients
    pub fn close_all(&mut self) {
        for client in self.clients.drain(..) {
            client.handle.close();
        }
        self.leader = None;
    }

    /// Recompute the leader as the head of connection order and notify everyone.
    ///
    /// Any client whose transport fails during notification is removed and
    /// the round is repeated, so the loop converges before returning.
    pub fn elect(&mut self) -> Election {
        let previous = self.leader.take();
        let mut evicted = Vec::new();

        loop {
            let leader = self.clients.first().map(|c| c.handle.client_id().to_string());

            let failed: Vec<String> = self
                .clients
                .iter()
                .enumerate()
                .filter_map(|(i, c)| {
                    c.handle
                        .send(Message::connection(i == 0))
                        .err()
                        .map(|_| c.handle.client_id().to_string())
                })
                .collect();

            if failed.is_empty() {
                self.leader = leader;
                break;
            }

            for client_id in failed {
                warn!(client_id = %client_id, "Status push failed, dropping client");
                if let Some(pos) = self.position(&client_id) {
                    self.clients.remove(pos).handle.close();
                }
                evicted.push(client_id);
            }
        }

        let changed = previous != self.leader;
        if changed {
            match &self.leader {
                Some(id) => info!(leader = %id, clients = self.clients.len(), "Leader elected"),
                None => info!("No relay clients left, leadership vacant"),
            }
        }

        Election {
            leader: self.leader.clone(),
            changed,
            evicted,
        }
    }

    fn position(&self, client_id: &str) -> Option<usize> {
        self.clients.iter().position(|c| c.handle.client_id() == client_id)
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
