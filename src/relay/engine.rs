//! Backend task engine seam
//!
//! The relay client drives a task engine through a small command surface and
//! consumes its lifecycle events. [`EchoEngine`] is an in-process engine that
//! streams its input back; the binary uses it for local runs and the tests
//! use it everywhere.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::{EventData, EventName, TaskId, TaskMessage, TokenUsage};

/// One lifecycle notification from the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineEvent {
    pub name: EventName,
    pub data: EventData,
}

impl EngineEvent {
    pub fn lifecycle(name: EventName, task_id: &str) -> Self {
        Self {
            name,
            data: EventData {
                task_id: task_id.to_string(),
                ..Default::default()
            },
        }
    }

    pub fn message(task_id: &str, message: TaskMessage) -> Self {
        Self {
            name: EventName::Message,
            data: EventData {
                task_id: task_id.to_string(),
                partial: message.partial,
                message: Some(message),
                usage: None,
            },
        }
    }

    pub fn task_id(&self) -> &str {
        &self.data.task_id
    }
}

/// Command surface of a task engine
#[async_trait]
pub trait TaskEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start a task seeded with `text` and return its id
    async fn start_task(&self, text: &str) -> Result<TaskId>;

    /// Send follow-up text to a running task
    async fn send_message(&self, task_id: &str, text: &str) -> Result<()>;

    async fn cancel_task(&self, task_id: &str) -> Result<()>;

    /// Engine configuration as reported by the engine
    async fn configuration(&self) -> Result<serde_json::Value>;

    /// Approve or deny the question a task is waiting on
    async fn answer(&self, task_id: &str, approved: bool, text: Option<&str>) -> Result<()>;

    /// Take the event stream. Only the first caller gets it.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>>;
}

// ─────────────────────────────────────────────────────────────────
// Echo Engine
// ─────────────────────────────────────────────────────────────────

/// Settings for [`EchoEngine`]
#[derive(Debug, Clone)]
pub struct EchoConfig {
    /// Pause between streamed updates
    pub step_delay: Duration,

    /// Words per streamed partial update
    pub words_per_chunk: usize,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_millis(50),
            words_per_chunk: 3,
        }
    }
}

pub struct EchoEngine {
    config: EchoConfig,
    active: Arc<Mutex<HashSet<TaskId>>>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
}

impl EchoEngine {
    pub fn new() -> Self {
        Self::with_config(EchoConfig::default())
    }

    pub fn with_config(config: EchoConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            active: Arc::new(Mutex::new(HashSet::new())),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub fn is_active(&self, task_id: &str) -> bool {
        self.active.lock().contains(task_id)
    }

    /// Stream `text` back as partial updates, a final result, then completion
    fn spawn_reply(&self, task_id: TaskId, text: String, announce: bool) {
        let config = self.config.clone();
        let active = self.active.clone();
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            let emit = |event: EngineEvent| {
                if !active.lock().contains(event.task_id()) {
                    return false;
                }
                events.send(event).is_ok()
            };

            if announce {
                if !emit(EngineEvent::lifecycle(EventName::TaskCreated, &task_id)) {
                    return;
                }
                if !emit(EngineEvent::lifecycle(EventName::TaskStarted, &task_id)) {
                    return;
                }
            }

            let words: Vec<&str> = text.split_whitespace().collect();
            let chunk = config.words_per_chunk.max(1);
            for end in (chunk..words.len()).step_by(chunk) {
                tokio::time::sleep(config.step_delay).await;
                let so_far = words[..end].join(" ");
                if !emit(EngineEvent::message(&task_id, TaskMessage::say("text", so_far, true))) {
                    return;
                }
            }

            tokio::time::sleep(config.step_delay).await;
            let result = format!("Echo: {}", words.join(" "));
            if !emit(EngineEvent::message(&task_id, TaskMessage::say("completion_result", result, false))) {
                return;
            }

            let mut done = EngineEvent::lifecycle(EventName::TaskCompleted, &task_id);
            done.data.usage = Some(TokenUsage {
                total_tokens_in: words.len() as u64,
                total_tokens_out: words.len() as u64 + 1,
                total_cost: 0.0,
            });
            emit(done);
            active.lock().remove(&task_id);
            debug!(task_id = %task_id, "Echo task completed");
        });
    }
}

impl Default for EchoEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskEngine for EchoEngine {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn start_task(&self, text: &str) -> Result<TaskId> {
        if text.trim().is_empty() {
            return Err(Error::Backend("nothing to echo".to_string()));
        }
        let task_id = format!("echo-{}", &Uuid::new_v4().simple().to_string()[..8]);
        self.active.lock().insert(task_id.clone());
        self.spawn_reply(task_id.clone(), text.to_string(), true);
        Ok(task_id)
    }

    async fn send_message(&self, task_id: &str, text: &str) -> Result<()> {
        if !self.is_active(task_id) {
            return Err(Error::UnknownTask {
                task_id: task_id.to_string(),
            });
        }
        self.spawn_reply(task_id.to_string(), text.to_string(), false);
        Ok(())
    }

    async fn cancel_task(&self, task_id: &str) -> Result<()> {
        if !self.active.lock().remove(task_id) {
            return Err(Error::NoActiveTask);
        }
        let _ = self
            .events_tx
            .send(EngineEvent::lifecycle(EventName::TaskAborted, task_id));
        Ok(())
    }

    async fn configuration(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "engine": self.name(),
            "stepDelayMs": self.config.step_delay.as_millis() as u64,
            "wordsPerChunk": self.config.words_per_chunk,
        }))
    }

    async fn answer(&self, task_id: &str, approved: bool, text: Option<&str>) -> Result<()> {
        if !self.is_active(task_id) {
            return Err(Error::UnknownTask {
                task_id: task_id.to_string(),
            });
        }
        let reply = match (approved, text) {
            (_, Some(text)) => text.to_string(),
            (true, None) => "approved".to_string(),
            (false, None) => "denied".to_string(),
        };
        self.spawn_reply(task_id.to_string(), reply, false);
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
        self.events_rx.lock().take()
    }
}
