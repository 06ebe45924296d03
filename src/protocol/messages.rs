//! Protocol message definitions
//!
//! All message types exchanged between the coordinator and relay clients.
//! Messages are JSON objects with a `type` discriminator and camelCase fields.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Chat-side conversation surface identifier
pub type ChannelId = String;

/// Opaque backend task identifier
pub type TaskId = String;

// ─────────────────────────────────────────────────────────────────
// Message Types (Discriminated Union)
// ─────────────────────────────────────────────────────────────────

/// All protocol messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    /// Coordinator -> client: leader status push
    Connection(ConnectionStatus),

    /// Coordinator -> leader: chat input for a channel
    Message(ChatMessage),

    /// Coordinator -> leader: control command awaiting an ack
    Command(CommandMessage),

    /// Client -> coordinator: command acknowledgement
    Ack(AckMessage),

    /// Client -> coordinator: backend event for display
    Event(EventMessage),

    /// Coordinator -> leader: approve/deny reply to a pending question
    AskResponse(AskReply),
}

impl Message {
    /// Get the message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Connection(_) => "connection",
            Message::Message(_) => "message",
            Message::Command(_) => "command",
            Message::Ack(_) => "ack",
            Message::Event(_) => "event",
            Message::AskResponse(_) => "askResponse",
        }
    }

    /// Messages a relay client is allowed to send to the coordinator
    pub fn is_upstream(&self) -> bool {
        matches!(self, Message::Ack(_) | Message::Event(_))
    }

    /// Channel this message concerns, if any
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            Message::Connection(_) => None,
            Message::Message(m) => Some(&m.channel_id),
            Message::Command(c) => Some(&c.channel_id),
            Message::Ack(a) => Some(&a.channel_id),
            Message::Event(e) => e.channel_id.as_deref(),
            Message::AskResponse(r) => Some(&r.channel_id),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::malformed(e.to_string()))
    }

    pub fn connection(is_active: bool) -> Self {
        Message::Connection(ConnectionStatus { is_active })
    }
}

// ─────────────────────────────────────────────────────────────────
// Coordinator -> Client
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// True only for the elected leader
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub channel_id: ChannelId,
    pub content: String,
}

/// Control commands that go through the ack protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlCommand {
    /// Cancel the channel's current conversation
    Reset,
    /// Reset, then start a fresh conversation
    New,
    /// Terminate the channel's conversation
    Stop,
}

impl ControlCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlCommand::Reset => "reset",
            ControlCommand::New => "new",
            ControlCommand::Stop => "stop",
        }
    }
}

impl std::fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMessage {
    pub command: ControlCommand,
    pub channel_id: ChannelId,
    /// Opening text for `new`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskReply {
    pub channel_id: ChannelId,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

// ─────────────────────────────────────────────────────────────────
// Client -> Coordinator
// ─────────────────────────────────────────────────────────────────

/// Outcome the leader reports with an ack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    /// The command was acted on
    #[default]
    Ok,
    /// Nothing to act on (e.g. no active task); informational
    Noop,
    /// The leader could not act
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckMessage {
    pub command: ControlCommand,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AckMessage {
    pub fn ok(command: ControlCommand, channel_id: impl Into<ChannelId>) -> Self {
        Self {
            command,
            channel_id: channel_id.into(),
            status: AckStatus::Ok,
            note: None,
        }
    }

    pub fn with_status(mut self, status: AckStatus, note: impl Into<String>) -> Self {
        self.status = status;
        self.note = Some(note.into());
        self
    }
}

/// Backend lifecycle notification names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventName {
    Message,
    TaskCreated,
    TaskStarted,
    TaskCompleted,
    TaskAborted,
    #[serde(other)]
    Unknown,
}

impl EventName {
    /// Completed or aborted: the conversation is over
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventName::TaskCompleted | EventName::TaskAborted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    /// Owning channel as the client knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    pub event_name: EventName,
    pub data: EventData,
}

impl EventMessage {
    /// Streaming fragment that a later event will supersede
    pub fn is_partial(&self) -> bool {
        self.data.partial || self.data.message.as_ref().is_some_and(|m| m.partial)
    }

    pub fn task_id(&self) -> &str {
        &self.data.task_id
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    pub task_id: TaskId,
    #[serde(default)]
    pub partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<TaskMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Ask,
    Say,
}

/// One message produced by a backend task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Ask variant, e.g. `followup` or `tool`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<String>,
    /// Say variant, e.g. `text`, `reasoning` or `completion_result`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub say: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub partial: bool,
    /// Options offered with an ask
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Choice>,
}

/// One selectable answer to an ask
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    #[serde(default)]
    pub value: String,
}

impl TaskMessage {
    pub fn say(say: impl Into<String>, text: impl Into<String>, partial: bool) -> Self {
        Self {
            kind: MessageKind::Say,
            ask: None,
            say: Some(say.into()),
            text: Some(text.into()),
            reasoning: None,
            partial,
            choices: Vec::new(),
        }
    }

    pub fn ask(ask: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Ask,
            ask: Some(ask.into()),
            say: None,
            text: Some(text.into()),
            reasoning: None,
            partial: false,
            choices: Vec::new(),
        }
    }

    pub fn with_choices(mut self, choices: Vec<Choice>) -> Self {
        self.choices = choices;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    #[serde(default)]
    pub total_tokens_in: u64,
    #[serde(default)]
    pub total_tokens_out: u64,
    #[serde(default)]
    pub total_cost: f64,
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
