//! Cancellable keyed timers for the coordinator loop
//!
//! A timer is a spawned sleep that posts its key and generation to a queue
//! owned by [`Timers`]; the coordinator loop drains it with
//! [`Timers::next_fired`]. Timers never hold a sender into the coordinator's
//! event queue, so dropping every handle still ends the loop. Arming a key
//! aborts its previous timer, and each fire carries a generation so a fire
//! that was already queued when the key was cancelled or re-armed is
//! recognised as stale.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::{ChannelId, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Acknowledgement deadline for a channel
    Ack(ChannelId),
    /// Quiet-window flush for a task's stream buffer
    Flush(TaskId),
}

struct Armed {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct Timers {
    armed: HashMap<TimerKey, Armed>,
    next_generation: u64,
    fired_tx: mpsc::UnboundedSender<(TimerKey, u64)>,
    fired_rx: mpsc::UnboundedReceiver<(TimerKey, u64)>,
}

impl Timers {
    pub fn new() -> Self {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        Self {
            armed: HashMap::new(),
            next_generation: 0,
            fired_tx,
            fired_rx,
        }
    }

    /// Next `(key, generation)` that elapsed. Check it with [`Timers::take_fired`].
    pub async fn next_fired(&mut self) -> Option<(TimerKey, u64)> {
        self.fired_rx.recv().await
    }

    /// Arm `key` to fire after `delay`, replacing any timer already armed for it
    pub fn arm(&mut self, key: TimerKey, delay: Duration) {
        self.cancel(&key);

        self.next_generation += 1;
        let generation = self.next_generation;
        let fired_tx = self.fired_tx.clone();
        let fired_key = key.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fired_tx.send((fired_key, generation));
        });

        self.armed.insert(key, Armed { generation, handle });
    }

    /// Cancel `key`; returns whether a timer was armed
    pub fn cancel(&mut self, key: &TimerKey) -> bool {
        match self.armed.remove(key) {
            Some(armed) => {
                armed.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Accept a fire if it belongs to the currently armed generation.
    ///
    /// Consumes the entry, so a key fires at most once per arm.
    pub fn take_fired(&mut self, key: &TimerKey, generation: u64) -> bool {
        match self.armed.get(key) {
            Some(armed) if armed.generation == generation => {
                self.armed.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, key: &TimerKey) -> bool {
        self.armed.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    pub fn cancel_all(&mut self) {
        for (_, armed) in self.armed.drain() {
            armed.handle.abort();
        }
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
