//! Relay coordinator
//!
//! A single-owner actor: one inbound queue of typed events processed
//! sequentially by [`Coordinator::run`]. It owns:
//! - the client registry and leader election
//! - the channel/task router
//! - the pending-ack table for control commands
//! - the streaming coalescer and duplicate filter
//! - every timer, armed and cancelled through [`Timers`]
//!
//! Nothing outside the loop touches this state; the transport and the chat
//! side go through [`CoordinatorHandle`].

pub mod ack;
pub mod coalescer;
pub mod dedup;
pub mod registry;
pub mod router;
pub mod server;
pub mod timers;

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::chat::{render_event, ChatOutbound};
use crate::config::CoordinatorSettings;
use crate::error::{CommandError, Error, Result};
use crate::protocol::{
    AckMessage, AskReply, ChatMessage, CommandMessage, ControlCommand, EventMessage, EventName,
    Message,
};

use self::ack::{AckWaiter, PendingAcks};
use self::coalescer::{StreamCoalescer, TimerAction};
use self::dedup::{fingerprint, DedupCache};
use self::registry::{ClientHandle, ClientRegistry, Election};
use self::router::ChannelRouter;
use self::timers::{TimerKey, Timers};

pub use self::registry::Outbound;
pub use self::server::CoordinatorServer;

/// Reply slot for fire-and-forward requests that only fail when nobody is listening
pub type ForwardReply = oneshot::Sender<std::result::Result<(), CommandError>>;

// ─────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────

/// Everything the coordinator reacts to
#[derive(Debug)]
pub enum CoordinatorEvent {
    /// A transport finished its handshake with a client identity
    ClientConnected { handle: ClientHandle },

    /// A transport went away
    ClientDisconnected { client_id: String, seq: u64 },

    /// A decoded message arrived from a client
    TransportMessage { client_id: String, message: Message },

    /// Chat side issued reset/new/stop
    Command {
        channel_id: String,
        command: ControlCommand,
        text: Option<String>,
        reply: AckWaiter,
    },

    /// Chat side sent plain text for a channel
    ChatMessage {
        channel_id: String,
        content: String,
        reply: ForwardReply,
    },

    /// Chat side approved or denied a pending question
    AskResponse {
        channel_id: String,
        approved: bool,
        text: Option<String>,
        reply: ForwardReply,
    },

    /// Snapshot request
    Status(oneshot::Sender<CoordinatorStatus>),

    Shutdown,
}

/// Point-in-time view of coordinator state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoordinatorStatus {
    pub leader: Option<String>,
    pub clients: Vec<String>,
    pub bindings: usize,
    pub pending_acks: usize,
    pub buffered_streams: usize,
}

// ─────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────

/// Cloneable entry point into the coordinator loop
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    events: mpsc::Sender<CoordinatorEvent>,
}

impl CoordinatorHandle {
    async fn post(&self, event: CoordinatorEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| Error::ChannelClosed("coordinator".to_string()))
    }

    pub async fn client_connected(&self, handle: ClientHandle) -> Result<()> {
        self.post(CoordinatorEvent::ClientConnected { handle }).await
    }

    pub async fn client_disconnected(&self, client_id: &str, seq: u64) -> Result<()> {
        self.post(CoordinatorEvent::ClientDisconnected {
            client_id: client_id.to_string(),
            seq,
        })
        .await
    }

    pub async fn transport_message(&self, client_id: &str, message: Message) -> Result<()> {
        self.post(CoordinatorEvent::TransportMessage {
            client_id: client_id.to_string(),
            message,
        })
        .await
    }

    /// Send a control command to the leader and wait for its ack or the deadline
    pub async fn send_command(
        &self,
        channel_id: &str,
        command: ControlCommand,
        text: Option<String>,
    ) -> std::result::Result<AckMessage, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.post(CoordinatorEvent::Command {
            channel_id: channel_id.to_string(),
            command,
            text,
            reply,
        })
        .await
        .map_err(|_| CommandError::Shutdown)?;
        rx.await.unwrap_or(Err(CommandError::Shutdown))
    }

    /// Forward chat text to the leader
    pub async fn forward_message(&self, channel_id: &str, content: &str) -> std::result::Result<(), CommandError> {
        let (reply, rx) = oneshot::channel();
        self.post(CoordinatorEvent::ChatMessage {
            channel_id: channel_id.to_string(),
            content: content.to_string(),
            reply,
        })
        .await
        .map_err(|_| CommandError::Shutdown)?;
        rx.await.unwrap_or(Err(CommandError::Shutdown))
    }

    /// Forward an approve/deny reply to the leader
    pub async fn answer(
        &self,
        channel_id: &str,
        approved: bool,
        text: Option<String>,
    ) -> std::result::Result<(), CommandError> {
        let (reply, rx) = oneshot::channel();
        self.post(CoordinatorEvent::AskResponse {
            channel_id: channel_id.to_string(),
            approved,
            text,
            reply,
        })
        .await
        .map_err(|_| CommandError::Shutdown)?;
        rx.await.unwrap_or(Err(CommandError::Shutdown))
    }

    pub async fn status(&self) -> Result<CoordinatorStatus> {
        let (tx, rx) = oneshot::channel();
        self.post(CoordinatorEvent::Status(tx)).await?;
        rx.await
            .map_err(|_| Error::ChannelClosed("coordinator status".to_string()))
    }

    pub async fn current_leader(&self) -> Result<Option<String>> {
        Ok(self.status().await?.leader)
    }

    /// Ask the loop to stop; a loop that already stopped is fine
    pub async fn shutdown(&self) {
        let _ = self.events.send(CoordinatorEvent::Shutdown).await;
    }
}

// ─────────────────────────────────────────────────────────────────
// Coordinator
// ─────────────────────────────────────────────────────────────────

pub struct Coordinator {
    quiet_window: Duration,
    sweep_interval: Duration,
    registry: ClientRegistry,
    router: ChannelRouter,
    acks: PendingAcks,
    coalescer: StreamCoalescer,
    dedup: DedupCache,
    timers: Timers,
    events_rx: mpsc::Receiver<CoordinatorEvent>,
    chat_tx: mpsc::UnboundedSender<ChatOutbound>,
}

impl Coordinator {
    /// Build a coordinator that delivers rendered text to `chat_tx`
    pub fn new(
        settings: &CoordinatorSettings,
        chat_tx: mpsc::UnboundedSender<ChatOutbound>,
    ) -> (Self, CoordinatorHandle) {
        let (events_tx, events_rx) = mpsc::channel(settings.event_queue_size.max(1));

        let coordinator = Self {
            quiet_window: settings.quiet_window(),
            sweep_interval: settings.sweep_interval(),
            registry: ClientRegistry::new(),
            router: ChannelRouter::new(),
            acks: PendingAcks::new(settings.ack_timeout()),
            coalescer: StreamCoalescer::new(),
            dedup: DedupCache::new(settings.dedup_window(), settings.dedup_capacity),
            timers: Timers::new(),
            events_rx,
            chat_tx,
        };

        (coordinator, CoordinatorHandle { events: events_tx })
    }

    /// Process events until shutdown
    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        sweep.tick().await;

        info!("Coordinator running");

        loop {
            tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(CoordinatorEvent::Shutdown) => break,
                    Some(event) => self.handle_event(event),
                    None => {
                        info!("Every coordinator handle dropped");
                        break;
                    }
                },
                Some((key, generation)) = self.timers.next_fired() => self.handle_timer(key, generation),
                _ = sweep.tick() => {
                    let evicted = self.dedup.evict_expired(now());
                    if evicted > 0 {
                        debug!(evicted, remaining = self.dedup.len(), "Swept duplicate cache");
                    }
                }
            }
        }

        self.acks.fail_all(CommandError::Shutdown);
        self.timers.cancel_all();
        self.registry.close_all();
        info!("Coordinator stopped");
    }

    fn handle_event(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::ClientConnected { handle } => {
                info!(client_id = %handle.client_id(), seq = handle.seq(), "Relay client connected");
                let election = self.registry.register(handle);
                self.after_election(election);
            }

            CoordinatorEvent::ClientDisconnected { client_id, seq } => {
                if let Some(election) = self.registry.unregister_connection(&client_id, seq) {
                    info!(client_id = %client_id, seq, "Relay client disconnected");
                    self.after_election(election);
                }
            }

            CoordinatorEvent::TransportMessage { client_id, message } => {
                self.handle_transport_message(&client_id, message);
            }

            CoordinatorEvent::Command {
                channel_id,
                command,
                text,
                reply,
            } => self.issue_command(channel_id, command, text, reply),

            CoordinatorEvent::ChatMessage {
                channel_id,
                content,
                reply,
            } => {
                let message = Message::Message(ChatMessage { channel_id, content });
                let _ = reply.send(self.send_to_leader(message).map(|_| ()));
            }

            CoordinatorEvent::AskResponse {
                channel_id,
                approved,
                text,
                reply,
            } => {
                let message = Message::AskResponse(AskReply {
                    channel_id,
                    approved,
                    text,
                });
                let _ = reply.send(self.send_to_leader(message).map(|_| ()));
            }

            CoordinatorEvent::Status(reply) => {
                let _ = reply.send(CoordinatorStatus {
                    leader: self.registry.current_leader().map(str::to_string),
                    clients: self.registry.client_ids(),
                    bindings: self.router.len(),
                    pending_acks: self.acks.len(),
                    buffered_streams: self.coalescer.len(),
                });
            }

            CoordinatorEvent::Shutdown => {}
        }
    }

    fn after_election(&mut self, election: Election) {
        for client_id in &election.evicted {
            warn!(client_id = %client_id, "Evicted relay client with a broken transport");
        }
        if election.changed && election.leader.is_none() && !self.acks.is_empty() {
            debug!(pending = self.acks.len(), "Leader lost with commands outstanding");
        }
    }

    /// Send to the current leader, failing over on broken transports
    fn send_to_leader(&mut self, message: Message) -> std::result::Result<String, CommandError> {
        loop {
            let Some(leader) = self.registry.leader_handle().cloned() else {
                debug!(message_type = message.type_name(), "No leader to send to");
                return Err(CommandError::NoLeader);
            };

            match leader.send(message.clone()) {
                Ok(()) => return Ok(leader.client_id().to_string()),
                Err(e) => {
                    warn!(client_id = %leader.client_id(), error = %e, "Send to leader failed");
                    if let Some(election) = self.registry.unregister(leader.client_id()) {
                        self.after_election(election);
                    }
                }
            }
        }
    }

    fn issue_command(
        &mut self,
        channel_id: String,
        command: ControlCommand,
        text: Option<String>,
        reply: AckWaiter,
    ) {
        if self.acks.is_pending(&channel_id) {
            self.acks.issue(&channel_id, command, reply);
            return;
        }

        let message = Message::Command(CommandMessage {
            command,
            channel_id: channel_id.clone(),
            message: text,
        });
        let leader = match self.send_to_leader(message) {
            Ok(leader) => leader,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        self.acks.issue(&channel_id, command, reply);
        self.timers
            .arm(TimerKey::Ack(channel_id.clone()), self.acks.timeout());

        // The channel's current conversation ends from the chat side's point
        // of view the moment the command is issued.
        if let Some(task_id) = self.router.unbind_channel(&channel_id) {
            self.drop_stream(&task_id);
        }

        info!(channel_id = %channel_id, command = %command, leader = %leader, "Command issued");
    }

    fn handle_transport_message(&mut self, client_id: &str, message: Message) {
        match message {
            Message::Ack(ack) => self.handle_ack(client_id, ack),
            Message::Event(event) => self.route_event(client_id, event),
            other => {
                warn!(
                    client_id = %client_id,
                    message_type = other.type_name(),
                    "Dropping unexpected message from relay client"
                );
            }
        }
    }

    fn handle_ack(&mut self, client_id: &str, ack: AckMessage) {
        let channel_id = ack.channel_id.clone();
        let command = ack.command;
        if self.acks.resolve(ack) {
            self.timers.cancel(&TimerKey::Ack(channel_id));
        } else {
            debug!(
                client_id = %client_id,
                channel_id = %channel_id,
                command = %command,
                "Ignoring ack nobody is waiting for"
            );
        }
    }

    fn route_event(&mut self, client_id: &str, event: EventMessage) {
        let task_id = event.task_id().to_string();
        if task_id.is_empty() {
            warn!(client_id = %client_id, "Dropping event without a task id");
            return;
        }

        if matches!(event.event_name, EventName::TaskCreated | EventName::TaskStarted) {
            if let Some(channel_id) = event.channel_id.as_deref() {
                self.bind(channel_id, &task_id);
            }
        }

        let Some(channel_id) = self.router.channel_for(&task_id).map(str::to_string) else {
            debug!(
                client_id = %client_id,
                task_id = %task_id,
                event = ?event.event_name,
                "No channel for task, dropping event"
            );
            return;
        };

        let terminal = event.event_name.is_terminal();
        let step = self.coalescer.ingest(&task_id, event);
        match step.timer {
            TimerAction::Arm => self
                .timers
                .arm(TimerKey::Flush(task_id.clone()), self.quiet_window),
            TimerAction::Cancel => {
                self.timers.cancel(&TimerKey::Flush(task_id.clone()));
            }
            TimerAction::Keep => {}
        }

        if let Some(event) = step.deliver {
            self.deliver(&channel_id, &event);
        }

        if terminal {
            self.router.unbind(&task_id);
            info!(channel_id = %channel_id, task_id = %task_id, "Task finished, channel unbound");
        }
    }

    fn bind(&mut self, channel_id: &str, task_id: &str) {
        if self.router.channel_for(task_id) == Some(channel_id) {
            return;
        }
        if let Some(previous) = self.router.bind(channel_id, task_id) {
            self.drop_stream(&previous);
            debug!(channel_id = %channel_id, previous_task = %previous, "Replaced channel binding");
        }
        info!(channel_id = %channel_id, task_id = %task_id, "Channel bound to task");
    }

    fn drop_stream(&mut self, task_id: &str) {
        self.coalescer.clear(task_id);
        self.timers.cancel(&TimerKey::Flush(task_id.to_string()));
    }

    fn handle_timer(&mut self, key: TimerKey, generation: u64) {
        if !self.timers.take_fired(&key, generation) {
            debug!(?key, generation, "Ignoring stale timer");
            return;
        }

        match key {
            TimerKey::Ack(channel_id) => {
                if self.acks.expire(&channel_id) {
                    warn!(
                        channel_id = %channel_id,
                        timeout_ms = self.acks.timeout().as_millis() as u64,
                        "Command timed out waiting for ack"
                    );
                }
            }
            TimerKey::Flush(task_id) => {
                let Some(event) = self.coalescer.flush(&task_id) else {
                    return;
                };
                match self.router.channel_for(&task_id).map(str::to_string) {
                    Some(channel_id) => self.deliver(&channel_id, &event),
                    None => debug!(task_id = %task_id, "Flushed stream has no channel any more"),
                }
            }
        }
    }

    fn deliver(&mut self, channel_id: &str, event: &EventMessage) {
        let Some(content) = render_event(event) else {
            return;
        };

        if !self.dedup.insert_if_new(&fingerprint(channel_id, &content), now()) {
            debug!(channel_id = %channel_id, "Suppressed duplicate chat update");
            return;
        }

        let outbound = ChatOutbound {
            channel_id: channel_id.to_string(),
            content,
        };
        if self.chat_tx.send(outbound).is_err() {
            warn!(channel_id = %channel_id, "Chat sink is gone, dropping update");
        }
    }
}

/// Wall-clock instant that follows tokio's clock, so paused tests stay consistent
fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
