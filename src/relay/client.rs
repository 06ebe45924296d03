//! WebSocket relay client
//!
//! Connects a task engine to the coordinator:
//! - Automatic reconnection through [`ReconnectManager`]
//! - Leader tracking from `connection` pushes
//! - Chat messages, commands and approvals turned into engine calls
//! - Engine events forwarded upstream tagged with their channel

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};
use url::Url;

use super::engine::{EngineEvent, TaskEngine};
use super::reconnect::{ConnectionState, ReconnectManager, ReconnectPolicy};
use crate::config::ClientSettings;
use crate::coordinator::router::ChannelRouter;
use crate::error::{Error, Result};
use crate::protocol::{
    AckMessage, AckStatus, AskReply, ChatMessage, CommandMessage, ControlCommand, EventMessage,
    Message,
};

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RelayClientConfig {
    /// Coordinator WebSocket URL, without the identity parameter
    pub url: String,

    /// Identity presented on every connection
    pub client_id: String,

    pub connect_timeout: Duration,

    pub reconnect: ReconnectPolicy,

    /// Capacity of the [`ClientEvent`] queue; overflow is dropped
    pub event_queue_size: usize,
}

impl RelayClientConfig {
    pub fn from_settings(settings: &ClientSettings, client_id: impl Into<String>) -> Self {
        Self {
            url: settings.url.clone(),
            client_id: client_id.into(),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            reconnect: ReconnectPolicy::from_settings(settings),
            event_queue_size: settings.message_queue_size.max(1),
        }
    }

    /// URL with the `clientId` query parameter appended
    pub fn connect_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url).map_err(|e| Error::ConnectionFailed {
            url: self.url.clone(),
            message: format!("invalid URL: {}", e),
        })?;
        url.query_pairs_mut()
            .append_pair(crate::coordinator::server::CLIENT_ID_PARAM, &self.client_id);
        Ok(url)
    }
}

// ─────────────────────────────────────────────────────────────────
// State & Events
// ─────────────────────────────────────────────────────────────────

/// Snapshot of the client as seen from outside the loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientStatus {
    pub connection_state: ConnectionState,
    pub is_leader: bool,
    pub reconnect_attempts: u32,
    pub connected_since: Option<DateTime<Utc>>,
}

/// Notifications from the client loop
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected { reason: String },
    LeaderChanged { is_leader: bool },
    Reconnecting { attempt: u32, delay: Duration },
    Error { message: String, fatal: bool },
}

// ─────────────────────────────────────────────────────────────────
// Relay Client
// ─────────────────────────────────────────────────────────────────

pub struct RelayClient {
    config: RelayClientConfig,
    engine: Arc<dyn TaskEngine>,
    status: Arc<RwLock<ClientStatus>>,
    event_tx: mpsc::Sender<ClientEvent>,
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    stopped: bool,
}

impl RelayClient {
    pub fn new(config: RelayClientConfig, engine: Arc<dyn TaskEngine>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_queue_size.max(1));
        Self {
            config,
            engine,
            status: Arc::new(RwLock::new(ClientStatus::default())),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
            task: None,
            stopped: false,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// Take the event receiver. Only the first caller gets it.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    pub fn status(&self) -> ClientStatus {
        self.status.read().clone()
    }

    pub fn is_leader(&self) -> bool {
        self.status.read().is_leader
    }

    /// Start the connection loop.
    ///
    /// Returns `false` without doing anything when the loop is already
    /// running or the client was disconnected for good.
    pub fn connect(&mut self) -> Result<bool> {
        if self.stopped {
            warn!(client_id = %self.config.client_id, "Client was disconnected; not reconnecting");
            return Ok(false);
        }
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!(client_id = %self.config.client_id, "Connect requested while already running");
            return Ok(false);
        }

        let engine_rx = self.engine.take_events().ok_or_else(|| {
            Error::Internal("task engine event stream already taken".to_string())
        })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let session = Session {
            config: self.config.clone(),
            engine: self.engine.clone(),
            status: self.status.clone(),
            events: self.event_tx.clone(),
            routes: ChannelRouter::new(),
        };
        self.task = Some(tokio::spawn(run_client_loop(session, engine_rx, shutdown_rx)));
        Ok(true)
    }

    /// Stop for good: cancel any pending retry and close the live link
    pub async fn disconnect(&mut self) {
        self.stopped = true;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Client loop ended abnormally");
            }
        }
        let mut status = self.status.write();
        status.connection_state = ConnectionState::Disconnected;
        status.is_leader = false;
    }
}

// ─────────────────────────────────────────────────────────────────
// Client Loop
// ─────────────────────────────────────────────────────────────────

/// Everything the loop owns across connections
struct Session {
    config: RelayClientConfig,
    engine: Arc<dyn TaskEngine>,
    status: Arc<RwLock<ClientStatus>>,
    events: mpsc::Sender<ClientEvent>,
    /// Local channel/task bindings; tasks outlive a dropped link
    routes: ChannelRouter,
}

/// Why a live connection ended
enum LinkEnd {
    Closed(String),
    Shutdown,
}

impl Session {
    fn emit(&self, event: ClientEvent) {
        if self.events.try_send(event).is_err() {
            debug!("Client event queue full or closed, dropping event");
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let mut status = self.status.write();
        status.connection_state = state;
        match state {
            ConnectionState::Connected => status.connected_since = Some(Utc::now()),
            ConnectionState::Disconnected => {
                status.connected_since = None;
                status.is_leader = false;
            }
            ConnectionState::Connecting => {}
        }
    }

    fn set_leader(&self, is_leader: bool) {
        let changed = {
            let mut status = self.status.write();
            let changed = status.is_leader != is_leader;
            status.is_leader = is_leader;
            changed
        };
        if changed {
            info!(client_id = %self.config.client_id, is_leader, "Leader status changed");
            self.emit(ClientEvent::LeaderChanged { is_leader });
        }
    }

    fn is_leader(&self) -> bool {
        self.status.read().is_leader
    }

    /// React to one coordinator message; the return value is sent back
    async fn dispatch(&mut self, message: Message) -> Option<Message> {
        match message {
            Message::Connection(status) => {
                self.set_leader(status.is_active);
                None
            }
            Message::Message(chat) => {
                self.warn_if_follower("message");
                self.handle_chat(chat).await;
                None
            }
            Message::Command(command) => {
                self.warn_if_follower("command");
                Some(Message::Ack(self.handle_command(command).await))
            }
            Message::AskResponse(reply) => {
                self.warn_if_follower("askResponse");
                self.handle_ask_response(reply).await;
                None
            }
            Message::Ack(_) | Message::Event(_) => {
                debug!(message_type = message.type_name(), "Ignoring message meant for the coordinator");
                None
            }
        }
    }

    fn warn_if_follower(&self, what: &str) {
        if !self.is_leader() {
            warn!(message_type = what, "Received work while not the leader; handling anyway");
        }
    }

    async fn handle_chat(&mut self, chat: ChatMessage) {
        if let Some(task_id) = self.routes.task_for(&chat.channel_id).map(str::to_string) {
            match self.engine.send_message(&task_id, &chat.content).await {
                Ok(()) => {
                    debug!(channel_id = %chat.channel_id, task_id = %task_id, "Sent message to active task");
                    return;
                }
                Err(e) => {
                    info!(
                        channel_id = %chat.channel_id,
                        task_id = %task_id,
                        error = %e,
                        "Active task unavailable, starting a new one"
                    );
                    self.routes.unbind(&task_id);
                }
            }
        }

        match self.engine.start_task(&chat.content).await {
            Ok(task_id) => {
                info!(channel_id = %chat.channel_id, task_id = %task_id, "Started task for channel");
                self.routes.bind(chat.channel_id, task_id);
            }
            Err(e) => {
                error!(channel_id = %chat.channel_id, error = %e, "Failed to start task");
            }
        }
    }

    async fn handle_command(&mut self, command: CommandMessage) -> AckMessage {
        let CommandMessage {
            command,
            channel_id,
            message,
        } = command;
        info!(channel_id = %channel_id, command = %command, "Processing command");

        let ack = AckMessage::ok(command, channel_id.clone());
        let cancelled = self.cancel_channel_task(&channel_id).await;

        match command {
            ControlCommand::Reset | ControlCommand::Stop if !cancelled => {
                ack.with_status(AckStatus::Noop, Error::NoActiveTask.to_string())
            }
            ControlCommand::Reset | ControlCommand::Stop => ack,
            ControlCommand::New => {
                // Without text the next chat message starts the task
                let Some(text) = message.filter(|t| !t.trim().is_empty()) else {
                    return ack.with_status(AckStatus::Noop, "Ready for a new conversation");
                };
                match self.engine.start_task(&text).await {
                    Ok(task_id) => {
                        info!(channel_id = %channel_id, task_id = %task_id, "Started fresh task");
                        self.routes.bind(channel_id, task_id);
                        ack
                    }
                    Err(e) => ack.with_status(AckStatus::Failed, e.to_string()),
                }
            }
        }
    }

    /// Cancel and unbind the channel's task; `false` if it had none
    async fn cancel_channel_task(&mut self, channel_id: &str) -> bool {
        let Some(task_id) = self.routes.unbind_channel(channel_id) else {
            return false;
        };
        match self.engine.cancel_task(&task_id).await {
            Ok(()) => {}
            Err(e) if e.is_informational() => {
                debug!(task_id = %task_id, error = %e, "Task already gone");
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e.format_for_log(), "Cancel failed");
            }
        }
        true
    }

    async fn handle_ask_response(&mut self, reply: AskReply) {
        let Some(task_id) = self.routes.task_for(&reply.channel_id).map(str::to_string) else {
            warn!(channel_id = %reply.channel_id, "No active task to answer");
            return;
        };
        if let Err(e) = self
            .engine
            .answer(&task_id, reply.approved, reply.text.as_deref())
            .await
        {
            warn!(task_id = %task_id, error = %e, "Engine rejected the answer");
        }
    }

    /// Tag an engine event with its channel for the coordinator
    fn translate(&mut self, event: EngineEvent) -> Message {
        let task_id = event.task_id().to_string();
        let channel_id = self.routes.channel_for(&task_id).map(str::to_string);
        if event.name.is_terminal() {
            self.routes.unbind(&task_id);
        }
        Message::Event(EventMessage {
            channel_id,
            event_name: event.name,
            data: event.data,
        })
    }
}

/// Main client loop with reconnection logic
async fn run_client_loop(
    mut session: Session,
    mut engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let url = match session.config.connect_url() {
        Ok(url) => url,
        Err(e) => {
            error!(url = %session.config.url, error = %e, "Invalid coordinator URL");
            session.emit(ClientEvent::Error {
                message: e.to_string(),
                fatal: true,
            });
            return;
        }
    };

    let mut manager = ReconnectManager::new(session.config.reconnect);

    'outer: loop {
        if !manager.begin_connect() {
            break;
        }
        session.set_state(ConnectionState::Connecting);
        info!(url = %session.config.url, client_id = %session.config.client_id, "Connecting to coordinator");

        let timeout = session.config.connect_timeout;
        let attempt = tokio::select! {
            attempt = tokio::time::timeout(timeout, connect_async(url.as_str())) => attempt,
            _ = &mut shutdown_rx => {
                manager.shutdown();
                break 'outer;
            }
        };
        match attempt {
            Ok(Ok((ws_stream, _response))) => {
                info!("WebSocket connection established");
                manager.on_open();
                session.set_state(ConnectionState::Connected);
                session.status.write().reconnect_attempts = 0;
                session.emit(ClientEvent::Connected);

                let (write, read) = ws_stream.split();
                match handle_connection(&mut session, &mut engine_rx, &mut shutdown_rx, write, read).await {
                    Ok(LinkEnd::Shutdown) => {
                        manager.shutdown();
                        break 'outer;
                    }
                    Ok(LinkEnd::Closed(reason)) => {
                        info!(reason = %reason, "Connection closed");
                        session.emit(ClientEvent::Disconnected { reason });
                    }
                    Err(e) => {
                        warn!(error = %e, "Connection error");
                        session.emit(ClientEvent::Disconnected { reason: e.to_string() });
                    }
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to connect to coordinator");
                session.emit(ClientEvent::Error {
                    message: format!("Connection failed: {}", e),
                    fatal: false,
                });
            }
            Err(_) => {
                let e = Error::ConnectionTimeout {
                    url: session.config.url.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                };
                warn!(error = %e, "Connection attempt timed out");
                session.emit(ClientEvent::Error {
                    message: e.to_string(),
                    fatal: false,
                });
            }
        }

        session.set_state(ConnectionState::Disconnected);
        let Some(delay) = manager.on_closed() else {
            break;
        };
        let attempt = manager.attempts();
        session.status.write().reconnect_attempts = attempt;
        session.emit(ClientEvent::Reconnecting { attempt, delay });
        info!(delay_ms = delay.as_millis() as u64, attempt, "Waiting before reconnection");

        // Wait before reconnecting; engine output has nowhere to go meanwhile.
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                _ = &mut shutdown_rx => {
                    manager.shutdown();
                    break 'outer;
                }
                Some(event) = engine_rx.recv() => {
                    warn!(
                        task_id = %event.task_id(),
                        event = ?event.name,
                        "Not connected, dropping engine event"
                    );
                    if event.name.is_terminal() {
                        session.routes.unbind(event.task_id());
                    }
                }
            }
        }
    }

    session.set_state(ConnectionState::Disconnected);
    info!("Client loop terminated");
}

/// Handle an active WebSocket connection
async fn handle_connection<S, R>(
    session: &mut Session,
    engine_rx: &mut mpsc::UnboundedReceiver<EngineEvent>,
    shutdown_rx: &mut oneshot::Receiver<()>,
    mut write: S,
    mut read: R,
) -> Result<LinkEnd>
where
    S: SinkExt<WsMessage, Error = WsError> + Unpin,
    R: StreamExt<Item = std::result::Result<WsMessage, WsError>> + Unpin,
{
    loop {
        tokio::select! {
            // Incoming message from the coordinator
            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        match Message::from_json(&text) {
                            Ok(message) => {
                                debug!(message_type = message.type_name(), "Received message");
                                if let Some(reply) = session.dispatch(message).await {
                                    send_message(&mut write, &reply).await?;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "Failed to parse message");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        write.send(WsMessage::Pong(data)).await?;
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(frame = ?frame, "Received close frame");
                        return Ok(LinkEnd::Closed("closed by coordinator".to_string()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(Error::ConnectionLost { message: e.to_string() });
                    }
                    None => {
                        return Ok(LinkEnd::Closed("stream ended".to_string()));
                    }
                }
            }

            // Output from the task engine
            Some(event) = engine_rx.recv() => {
                let message = session.translate(event);
                send_message(&mut write, &message).await?;
            }

            // Explicit disconnect
            _ = &mut *shutdown_rx => {
                info!("Disconnect requested");
                let _ = write.send(WsMessage::Close(None)).await;
                return Ok(LinkEnd::Shutdown);
            }
        }
    }
}

/// Send a protocol message
async fn send_message<S>(write: &mut S, msg: &Message) -> Result<()>
where
    S: SinkExt<WsMessage, Error = WsError> + Unpin,
{
    let json = msg.to_json()?;
    write
        .send(WsMessage::Text(json))
        .await
        .map_err(|e| Error::ConnectionLost { message: e.to_string() })
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ConnectionStatus, EventName};
    use crate::relay::engine::{EchoConfig, EchoEngine};

    fn session() -> (Session, mpsc::UnboundedReceiver<EngineEvent>, mpsc::Receiver<ClientEvent>) {
        let engine = EchoEngine::with_config(EchoConfig {
            step_delay: Duration::from_millis(10),
            words_per_chunk: 2,
        });
        let engine_rx = engine.take_events().unwrap();
        let (events, event_rx) = mpsc::channel(16);
        let session = Session {
            config: RelayClientConfig::from_settings(&ClientSettings::default(), "test-relay"),
            engine: Arc::new(engine),
            status: Arc::new(RwLock::new(ClientStatus::default())),
            events,
            routes: ChannelRouter::new(),
        };
        (session, engine_rx, event_rx)
    }

    fn command(command: ControlCommand, channel: &str, message: Option<&str>) -> Message {
        Message::Command(CommandMessage {
            command,
            channel_id: channel.into(),
            message: message.map(str::to_string),
        })
    }

    fn ack_of(reply: Option<Message>) -> AckMessage {
        match reply {
            Some(Message::Ack(ack)) => ack,
            other => panic!("Expected ack, got {:?}", other),
        }
    }

    #[test]
    fn test_connect_url_carries_client_id() {
        let config = RelayClientConfig::from_settings(&ClientSettings::default(), "desk 1");
        let url = config.connect_url().unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8080/?clientId=desk+1");
    }

    #[test]
    fn test_invalid_url_is_reported() {
        let mut settings = ClientSettings::default();
        settings.url = "not a url".into();
        let config = RelayClientConfig::from_settings(&settings, "x");
        assert!(matches!(config.connect_url(), Err(Error::ConnectionFailed { .. })));
    }

    #[tokio::test]
    async fn test_connection_push_sets_leader() {
        let (mut session, _engine_rx, mut events) = session();

        assert!(session.dispatch(Message::Connection(ConnectionStatus { is_active: true })).await.is_none());
        assert!(session.is_leader());
        assert_eq!(events.recv().await, Some(ClientEvent::LeaderChanged { is_leader: true }));

        // Repeated status is not a change
        session.dispatch(Message::connection(true)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reset_without_task_acks_noop() {
        let (mut session, _engine_rx, _events) = session();

        let ack = ack_of(session.dispatch(command(ControlCommand::Reset, "42", None)).await);

        assert_eq!(ack.status, AckStatus::Noop);
        assert_eq!(ack.note.as_deref(), Some("No active task"));
        assert_eq!(ack.channel_id, "42");
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_starts_task_and_events_carry_channel() {
        let (mut session, mut engine_rx, _events) = session();

        session
            .dispatch(Message::Message(ChatMessage {
                channel_id: "42".into(),
                content: "hello there".into(),
            }))
            .await;
        let task_id = session.routes.task_for("42").unwrap().to_string();

        let first = session.translate(engine_rx.recv().await.unwrap());
        assert_eq!(first.channel_id(), Some("42"));

        loop {
            let event = engine_rx.recv().await.unwrap();
            let terminal = event.name.is_terminal();
            let message = session.translate(event);
            if terminal {
                assert_eq!(message.channel_id(), Some("42"));
                break;
            }
        }
        assert!(session.routes.channel_for(&task_id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_active_task() {
        let (mut session, mut engine_rx, _events) = session();
        session
            .dispatch(Message::Message(ChatMessage {
                channel_id: "42".into(),
                content: "a long running request with many words".into(),
            }))
            .await;

        let ack = ack_of(session.dispatch(command(ControlCommand::Stop, "42", None)).await);
        assert_eq!(ack.status, AckStatus::Ok);
        assert!(session.routes.task_for("42").is_none());

        let mut saw_abort = false;
        while let Ok(event) = engine_rx.try_recv() {
            saw_abort |= event.name == EventName::TaskAborted;
        }
        assert!(saw_abort);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_replaces_task() {
        let (mut session, _engine_rx, _events) = session();
        session
            .dispatch(Message::Message(ChatMessage {
                channel_id: "42".into(),
                content: "first".into(),
            }))
            .await;
        let old = session.routes.task_for("42").unwrap().to_string();

        let ack = ack_of(session.dispatch(command(ControlCommand::New, "42", Some("second"))).await);

        assert_eq!(ack.status, AckStatus::Ok);
        let new = session.routes.task_for("42").unwrap();
        assert_ne!(new, old);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_without_text_clears_task_and_acks_noop() {
        let (mut session, _engine_rx, _events) = session();
        session
            .dispatch(Message::Message(ChatMessage {
                channel_id: "42".into(),
                content: "first".into(),
            }))
            .await;

        let ack = ack_of(session.dispatch(command(ControlCommand::New, "42", None)).await);

        assert_eq!(ack.status, AckStatus::Noop);
        assert_eq!(ack.note.as_deref(), Some("Ready for a new conversation"));
        assert!(session.routes.task_for("42").is_none());

        let ack = ack_of(session.dispatch(command(ControlCommand::New, "42", Some("  "))).await);
        assert_eq!(ack.status, AckStatus::Noop);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_and_disconnect_final() {
        let mut settings = ClientSettings::default();
        // Nothing listens here; the loop just keeps retrying
        settings.url = "ws://127.0.0.1:9".into();
        let config = RelayClientConfig::from_settings(&settings, "idem");
        let mut client = RelayClient::new(config, Arc::new(EchoEngine::new()));

        assert!(client.connect().unwrap());
        assert!(!client.connect().unwrap());

        client.disconnect().await;
        assert_eq!(client.status().connection_state, ConnectionState::Disconnected);
        assert!(!client.connect().unwrap());
    }
}
