//! Pending acknowledgement table for control commands
//!
//! One entry per channel: `Issued -> WaitingAck -> {Acked | TimedOut}`.
//! The deadline timer itself lives with the coordinator; this table only
//! decides who gets resolved and how.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::error::CommandError;
use crate::protocol::{AckMessage, AckStatus, ChannelId, ControlCommand};

/// Default acknowledgement budget
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the issuer of a command waits for its outcome
pub type AckWaiter = oneshot::Sender<Result<AckMessage, CommandError>>;

struct PendingAck {
    command: ControlCommand,
    waiter: AckWaiter,
    issued_at: Instant,
}

/// Outstanding commands keyed by channel
pub struct PendingAcks {
    pending: HashMap<ChannelId, PendingAck>,
    timeout: Duration,
}

impl PendingAcks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_pending(&self, channel_id: &str) -> bool {
        self.pending.contains_key(channel_id)
    }

    /// Record a dispatched command.
    ///
    /// A second command for a channel that still has one outstanding is
    /// refused: the waiter is resolved with [`CommandError::Pending`] and
    /// `false` is returned.
    pub fn issue(&mut self, channel_id: &str, command: ControlCommand, waiter: AckWaiter) -> bool {
        if let Some(existing) = self.pending.get(channel_id) {
            let _ = waiter.send(Err(CommandError::Pending {
                command: existing.command.to_string(),
                channel_id: channel_id.to_string(),
            }));
            return false;
        }

        self.pending.insert(
            channel_id.to_string(),
            PendingAck {
                command,
                waiter,
                issued_at: Instant::now(),
            },
        );
        true
    }

    /// Resolve the waiter matching an incoming ack.
    ///
    /// Returns `false` for acks nobody is waiting for, which covers late
    /// acks after a timeout as well as acks for a different command.
    pub fn resolve(&mut self, ack: AckMessage) -> bool {
        match self.pending.get(&ack.channel_id) {
            Some(p) if p.command == ack.command => {}
            _ => return false,
        }
        let Some(pending) = self.pending.remove(&ack.channel_id) else {
            return false;
        };

        debug!(
            channel_id = %ack.channel_id,
            command = %ack.command,
            status = ?ack.status,
            elapsed_ms = pending.issued_at.elapsed().as_millis() as u64,
            "Command acknowledged"
        );

        let outcome = match ack.status {
            AckStatus::Ok | AckStatus::Noop => Ok(ack),
            AckStatus::Failed => Err(CommandError::Rejected {
                reason: ack.note.unwrap_or_else(|| "unspecified".to_string()),
            }),
        };
        let _ = pending.waiter.send(outcome);
        true
    }

    /// The deadline for `channel_id` fired; resolve its waiter as timed out
    pub fn expire(&mut self, channel_id: &str) -> bool {
        let Some(pending) = self.pending.remove(channel_id) else {
            return false;
        };
        let _ = pending.waiter.send(Err(CommandError::Timeout {
            command: pending.command.to_string(),
            channel_id: channel_id.to_string(),
            after: self.timeout,
        }));
        true
    }

    /// Fail everything still outstanding, e.g. on shutdown
    pub fn fail_all(&mut self, error: CommandError) {
        for (_, pending) in self.pending.drain() {
            let _ = pending.waiter.send(Err(error.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for PendingAcks {
    fn default() -> Self {
        Self::new(DEFAULT_ACK_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiter() -> (AckWaiter, oneshot::Receiver<Result<AckMessage, CommandError>>) {
        oneshot::channel()
    }

    #[test]
    fn test_matching_ack_resolves_with_payload() {
        let mut acks = PendingAcks::default();
        let (tx, mut rx) = waiter();
        assert!(acks.issue("42", ControlCommand::Reset, tx));

        let ack = AckMessage::ok(ControlCommand::Reset, "42").with_status(AckStatus::Noop, "No active task");
        assert!(acks.resolve(ack.clone()));

        assert_eq!(rx.try_recv().unwrap(), Ok(ack));
        assert!(acks.is_empty());
    }

    #[test]
    fn test_failed_status_is_a_rejection() {
        let mut acks = PendingAcks::default();
        let (tx, mut rx) = waiter();
        acks.issue("42", ControlCommand::New, tx);

        acks.resolve(AckMessage::ok(ControlCommand::New, "42").with_status(AckStatus::Failed, "engine down"));

        assert_eq!(
            rx.try_recv().unwrap(),
            Err(CommandError::Rejected {
                reason: "engine down".into()
            })
        );
    }

    #[test]
    fn test_second_command_is_refused_while_pending() {
        let mut acks = PendingAcks::default();
        let (tx1, _rx1) = waiter();
        let (tx2, mut rx2) = waiter();

        assert!(acks.issue("42", ControlCommand::Reset, tx1));
        assert!(!acks.issue("42", ControlCommand::Stop, tx2));

        assert!(matches!(rx2.try_recv().unwrap(), Err(CommandError::Pending { .. })));
        assert_eq!(acks.len(), 1);

        // Other channels are independent
        let (tx3, _rx3) = waiter();
        assert!(acks.issue("7", ControlCommand::Stop, tx3));
    }

    #[test]
    fn test_expire_then_late_ack_is_ignored() {
        let mut acks = PendingAcks::new(Duration::from_millis(250));
        let (tx, mut rx) = waiter();
        acks.issue("42", ControlCommand::Stop, tx);

        assert!(acks.expire("42"));
        assert!(!acks.resolve(AckMessage::ok(ControlCommand::Stop, "42")));

        match rx.try_recv().unwrap() {
            Err(CommandError::Timeout { after, command, .. }) => {
                assert_eq!(after, Duration::from_millis(250));
                assert_eq!(command, "stop");
            }
            other => panic!("Expected timeout, got {:?}", other),
        }
        assert!(!acks.expire("42"));
    }

    #[test]
    fn test_ack_for_other_command_does_not_resolve() {
        let mut acks = PendingAcks::default();
        let (tx, mut rx) = waiter();
        acks.issue("42", ControlCommand::New, tx);

        assert!(!acks.resolve(AckMessage::ok(ControlCommand::Reset, "42")));
        assert!(acks.is_pending("42"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fail_all() {
        let mut acks = PendingAcks::default();
        let (tx1, mut rx1) = waiter();
        let (tx2, mut rx2) = waiter();
        acks.issue("1", ControlCommand::Reset, tx1);
        acks.issue("2", ControlCommand::Reset, tx2);

        acks.fail_all(CommandError::Shutdown);

        assert_eq!(rx1.try_recv().unwrap(), Err(CommandError::Shutdown));
        assert_eq!(rx2.try_recv().unwrap(), Err(CommandError::Shutdown));
        assert!(acks.is_empty());
    }
}
