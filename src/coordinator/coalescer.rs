//! Streaming event coalescer
//!
//! Backends emit partial updates far faster than a chat platform accepts
//! them. Partials for a task overwrite each other in a one-slot buffer and
//! are flushed once the stream goes quiet; finals and terminal events go
//! out at once. Timer handling is left to the caller, which gets a
//! [`TimerAction`] back from every ingest.

use std::collections::HashMap;

use crate::protocol::{EventMessage, EventName, TaskId};

/// What the caller must do with the flush timer for the ingested key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// (Re)arm the quiet-window timer, cancelling any armed one
    Arm,
    /// Cancel any armed timer
    Cancel,
    /// Leave the timer alone
    Keep,
}

/// Outcome of one ingest
#[derive(Debug, Clone, PartialEq)]
pub struct CoalesceStep {
    pub timer: TimerAction,
    /// Event to deliver downstream right now
    pub deliver: Option<EventMessage>,
}

/// How an event relates to the stream buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    /// More output for the same message is coming
    Partial,
    /// Last word on the current message
    Final,
    /// Conversation over; stale partials must not surface
    Terminal,
    /// Lifecycle notice unrelated to streamed content
    Lifecycle,
}

pub fn classify(event: &EventMessage) -> EventClass {
    match event.event_name {
        EventName::TaskCompleted | EventName::TaskAborted => EventClass::Terminal,
        EventName::Message if event.is_partial() => EventClass::Partial,
        EventName::Message => EventClass::Final,
        _ => EventClass::Lifecycle,
    }
}

/// One-slot buffers per task
#[derive(Debug, Default)]
pub struct StreamCoalescer {
    buffers: HashMap<TaskId, EventMessage>,
}

impl StreamCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, key: &str, event: EventMessage) -> CoalesceStep {
        match classify(&event) {
            EventClass::Partial => {
                self.buffers.insert(key.to_string(), event);
                CoalesceStep {
                    timer: TimerAction::Arm,
                    deliver: None,
                }
            }
            // The final supersedes whatever partial was buffered, so the
            // immediate flush carries the final itself.
            EventClass::Final => {
                self.buffers.remove(key);
                CoalesceStep {
                    timer: TimerAction::Cancel,
                    deliver: Some(event),
                }
            }
            EventClass::Terminal => {
                self.buffers.remove(key);
                CoalesceStep {
                    timer: TimerAction::Cancel,
                    deliver: Some(event),
                }
            }
            EventClass::Lifecycle => CoalesceStep {
                timer: TimerAction::Keep,
                deliver: Some(event),
            },
        }
    }

    /// Quiet window elapsed: take the latest buffered event
    pub fn flush(&mut self, key: &str) -> Option<EventMessage> {
        self.buffers.remove(key)
    }

    /// Discard the buffer without delivering it
    pub fn clear(&mut self, key: &str) -> bool {
        self.buffers.remove(key).is_some()
    }

    pub fn buffered(&self, key: &str) -> Option<&EventMessage> {
        self.buffers.get(key)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
