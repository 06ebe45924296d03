//! Duplicate suppression for outbound chat text
//!
//! Delivery to the chat side is at-least-once: a flushed update can be
//! re-sent after a reconnect or a leader change. Recently delivered content
//! is remembered by SHA-256 fingerprint for a short window, bounded both in
//! time and in entry count.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

/// Fingerprint of `(channel, content)`
pub fn fingerprint(channel_id: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(channel_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Time-windowed set with a hard capacity
#[derive(Debug)]
pub struct DedupCache {
    window: Duration,
    capacity: usize,
    seen: HashMap<String, Instant>,
    order: VecDeque<(String, Instant)>,
}

impl DedupCache {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Record `key` and return `true` if it was not seen inside the window
    pub fn insert_if_new(&mut self, key: &str, now: Instant) -> bool {
        self.evict_expired(now);

        if let Some(at) = self.seen.get(key) {
            if now.saturating_duration_since(*at) < self.window {
                return false;
            }
        }

        while self.seen.len() >= self.capacity {
            let Some((oldest, at)) = self.order.pop_front() else {
                break;
            };
            // Only drop the map entry if it still refers to this insertion
            if self.seen.get(&oldest) == Some(&at) {
                self.seen.remove(&oldest);
            }
        }

        self.seen.insert(key.to_string(), now);
        self.order.push_back((key.to_string(), now));
        true
    }

    /// Drop entries older than the window
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let mut evicted = 0;
        while let Some((key, at)) = self.order.front() {
            if now.saturating_duration_since(*at) < self.window {
                break;
            }
            if self.seen.get(key) == Some(at) {
                self.seen.remove(key);
                evicted += 1;
            }
            self.order.pop_front();
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
