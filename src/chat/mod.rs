//! Chat-facing surface
//!
//! Everything the chat platform side sees of the relay:
//! - `ChatCommand` parsing for `/reset`, `/new`, `/stop`, `/approve`, `/deny`
//! - `respond`, which routes an inbound line through the coordinator and
//!   turns the outcome into user-facing feedback
//! - `split` and `format` for outbound text
//! - `console`, a line-oriented adapter used by the binary

pub mod console;
pub mod format;
pub mod split;

use crate::coordinator::CoordinatorHandle;
use crate::error::CommandError;
use crate::protocol::{AckMessage, AckStatus, ChannelId, ControlCommand};

pub use console::ConsoleChat;
pub use format::render_event;
pub use split::split_message;

/// Text bound for one channel on the chat platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOutbound {
    pub channel_id: ChannelId,
    pub content: String,
}

/// Slash commands understood on the chat side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Reset,
    New(Option<String>),
    Stop,
    Approve(Option<String>),
    Deny(Option<String>),
}

impl ChatCommand {
    /// Parse `/name [args]`. Returns `None` for non-commands and unknown names.
    pub fn parse(input: &str) -> Option<Self> {
        let rest = input.trim().strip_prefix('/')?;
        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };
        let args = (!args.is_empty()).then(|| args.to_string());

        match name.to_ascii_lowercase().as_str() {
            "reset" => Some(ChatCommand::Reset),
            "new" => Some(ChatCommand::New(args)),
            "stop" => Some(ChatCommand::Stop),
            "approve" | "yes" => Some(ChatCommand::Approve(args)),
            "deny" | "no" => Some(ChatCommand::Deny(args)),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChatCommand::Reset => "reset",
            ChatCommand::New(_) => "new",
            ChatCommand::Stop => "stop",
            ChatCommand::Approve(_) => "approve",
            ChatCommand::Deny(_) => "deny",
        }
    }
}

/// One inbound item from the chat platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInbound {
    Message { channel_id: ChannelId, content: String },
    Command { channel_id: ChannelId, command: ChatCommand },
}

impl ChatInbound {
    /// Slash-prefixed text becomes a command, anything else a plain message
    pub fn from_text(channel_id: impl Into<ChannelId>, text: &str) -> Result<Self, String> {
        let channel_id = channel_id.into();
        if text.trim_start().starts_with('/') {
            return ChatCommand::parse(text)
                .map(|command| ChatInbound::Command {
                    channel_id,
                    command,
                })
                .ok_or_else(|| format!("Unknown command: {}", text.trim()));
        }
        Ok(ChatInbound::Message {
            channel_id,
            content: text.to_string(),
        })
    }

    pub fn channel_id(&self) -> &str {
        match self {
            ChatInbound::Message { channel_id, .. } | ChatInbound::Command { channel_id, .. } => channel_id,
        }
    }
}

/// Route one inbound item and return the feedback to show in its channel.
///
/// Plain messages that reach the leader produce no feedback; the reply
/// arrives later as backend events.
pub async fn respond(coordinator: &CoordinatorHandle, inbound: ChatInbound) -> Option<String> {
    match inbound {
        ChatInbound::Message { channel_id, content } => coordinator
            .forward_message(&channel_id, &content)
            .await
            .err()
            .map(|e| describe_failure("message", &e)),

        ChatInbound::Command { channel_id, command } => {
            let outcome = match &command {
                ChatCommand::Reset => coordinator.send_command(&channel_id, ControlCommand::Reset, None).await,
                ChatCommand::Stop => coordinator.send_command(&channel_id, ControlCommand::Stop, None).await,
                ChatCommand::New(text) => {
                    coordinator
                        .send_command(&channel_id, ControlCommand::New, text.clone())
                        .await
                }
                ChatCommand::Approve(text) | ChatCommand::Deny(text) => {
                    let approved = matches!(command, ChatCommand::Approve(_));
                    return Some(match coordinator.answer(&channel_id, approved, text.clone()).await {
                        Ok(()) if approved => "👍 Approval sent.".to_string(),
                        Ok(()) => "👎 Denial sent.".to_string(),
                        Err(e) => describe_failure(command.name(), &e),
                    });
                }
            };

            Some(match outcome {
                Ok(ack) => describe_ack(&ack),
                Err(e) => describe_failure(command.name(), &e),
            })
        }
    }
}

fn describe_ack(ack: &AckMessage) -> String {
    if ack.status == AckStatus::Noop {
        return format!("ℹ️ {}", ack.note.as_deref().unwrap_or("Nothing to do."));
    }
    match ack.command {
        ControlCommand::Reset => "✅ Conversation reset. Ready for a new one!".to_string(),
        ControlCommand::New => "🚀 New conversation started!".to_string(),
        ControlCommand::Stop => "🛑 Conversation stopped.".to_string(),
    }
}

fn describe_failure(what: &str, err: &CommandError) -> String {
    match err {
        CommandError::NoLeader => "⚠️ No relay client is connected.".to_string(),
        e if e.is_no_response() => format!("⌛ No response to {} from the relay client.", what),
        CommandError::Pending { command, .. } => {
            format!("⏳ Still waiting on the previous {} command.", command)
        }
        CommandError::Rejected { reason } => format!("❌ {} failed: {}", what, reason),
        e => format!("❌ {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ChatCommand::parse("/reset"), Some(ChatCommand::Reset));
        assert_eq!(ChatCommand::parse("/stop"), Some(ChatCommand::Stop));
        assert_eq!(ChatCommand::parse("/new"), Some(ChatCommand::New(None)));
        assert_eq!(
            ChatCommand::parse("/new  write a haiku "),
            Some(ChatCommand::New(Some("write a haiku".into())))
        );
        assert_eq!(ChatCommand::parse("/APPROVE"), Some(ChatCommand::Approve(None)));
        assert_eq!(
            ChatCommand::parse("/deny not that file"),
            Some(ChatCommand::Deny(Some("not that file".into())))
        );
    }

    #[test]
    fn test_parse_rejects_non_commands() {
        assert!(ChatCommand::parse("hello").is_none());
        assert!(ChatCommand::parse("/launch").is_none());
        assert!(ChatCommand::parse("/").is_none());
    }

    #[test]
    fn test_inbound_from_text() {
        assert_eq!(
            ChatInbound::from_text("42", "hi there").unwrap(),
            ChatInbound::Message {
                channel_id: "42".into(),
                content: "hi there".into()
            }
        );
        assert_eq!(
            ChatInbound::from_text("42", "/stop").unwrap().channel_id(),
            "42"
        );
        assert!(ChatInbound::from_text("42", "/bogus").is_err());
    }

    #[test]
    fn test_timeout_reads_as_no_response() {
        let err = CommandError::Timeout {
            command: "reset".into(),
            channel_id: "42".into(),
            after: Duration::from_secs(5),
        };
        let text = describe_failure("reset", &err);
        assert!(text.contains("No response"));
        assert!(!text.contains("failed"));

        let denied = describe_failure("reset", &CommandError::Rejected { reason: "busy".into() });
        assert!(denied.contains("failed: busy"));
    }

    #[test]
    fn test_noop_ack_is_informational() {
        let ack = AckMessage::ok(ControlCommand::Reset, "42").with_status(AckStatus::Noop, "No active task");
        assert_eq!(describe_ack(&ack), "ℹ️ No active task");
    }

    #[test]
    fn test_new_without_text_does_not_claim_a_start() {
        let ack = AckMessage::ok(ControlCommand::New, "42")
            .with_status(AckStatus::Noop, "Ready for a new conversation");
        assert_eq!(describe_ack(&ack), "ℹ️ Ready for a new conversation");

        let started = AckMessage::ok(ControlCommand::New, "42");
        assert!(describe_ack(&started).contains("New conversation started"));
    }
}
