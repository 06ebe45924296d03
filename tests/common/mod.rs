//! Common test utilities and fixtures
//!
//! Starts a real coordinator on an ephemeral port and provides a thin
//! WebSocket client for speaking the protocol by hand.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use chat_relay::chat::ChatOutbound;
use chat_relay::config::CoordinatorSettings;
use chat_relay::coordinator::{Coordinator, CoordinatorHandle, CoordinatorServer};
use chat_relay::protocol::Message;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound for any single wait in these tests
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Await `future`, failing the test if it takes longer than [`STEP_TIMEOUT`]
pub async fn within<F: Future>(what: &str, future: F) -> F::Output {
    tokio::time::timeout(STEP_TIMEOUT, future)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

/// Settings with short timings so tests finish quickly
pub fn fast_settings() -> CoordinatorSettings {
    CoordinatorSettings {
        listen_addr: "127.0.0.1:0".to_string(),
        ack_timeout_ms: 500,
        quiet_window_ms: 50,
        ..CoordinatorSettings::default()
    }
}

/// A coordinator plus its listener, running on an ephemeral port
pub struct TestCoordinator {
    pub addr: SocketAddr,
    pub handle: CoordinatorHandle,
    pub chat_rx: mpsc::UnboundedReceiver<ChatOutbound>,
    stop_tx: Option<oneshot::Sender<()>>,
    server_task: Option<JoinHandle<()>>,
    coordinator_task: Option<JoinHandle<()>>,
}

impl TestCoordinator {
    pub async fn start() -> Self {
        Self::start_with(fast_settings()).await
    }

    pub async fn start_with(settings: CoordinatorSettings) -> Self {
        Self::start_on(&settings.listen_addr.clone(), settings).await
    }

    /// Start on a specific address, used to bring a coordinator back on the same port
    pub async fn start_on(addr: &str, settings: CoordinatorSettings) -> Self {
        let (chat_tx, chat_rx) = mpsc::unbounded_channel();
        let (coordinator, handle) = Coordinator::new(&settings, chat_tx);
        let coordinator_task = tokio::spawn(coordinator.run());

        let server = CoordinatorServer::bind(addr, handle.clone()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server_task = tokio::spawn(async move {
            let _ = server
                .run(async {
                    let _ = stop_rx.await;
                })
                .await;
        });

        Self {
            addr,
            handle,
            chat_rx,
            stop_tx: Some(stop_tx),
            server_task: Some(server_task),
            coordinator_task: Some(coordinator_task),
        }
    }

    /// Base WebSocket URL without a client identity
    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    pub fn client_url(&self, client_id: &str) -> String {
        format!("ws://{}/?clientId={}", self.addr, client_id)
    }

    /// Connect a raw protocol client
    pub async fn connect(&self, client_id: &str) -> WsClient {
        let (ws, _) = within("websocket connect", connect_async(self.client_url(client_id)))
            .await
            .unwrap();
        ws
    }

    /// Poll the coordinator until `predicate` holds for its leader
    pub async fn wait_for_leader(&self, expected: Option<&str>) {
        within("leader change", async {
            loop {
                let leader = self.handle.current_leader().await.unwrap();
                if leader.as_deref() == expected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
    }

    /// Next chat delivery
    pub async fn next_chat(&mut self) -> ChatOutbound {
        within("chat delivery", self.chat_rx.recv()).await.unwrap()
    }

    /// Stop the listener and the coordinator, closing every client transport
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.handle.shutdown().await;
        if let Some(task) = self.coordinator_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.server_task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestCoordinator {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.coordinator_task.take() {
            task.abort();
        }
    }
}

/// Read frames until the next protocol message; `None` once the socket closes
pub async fn recv_message(ws: &mut WsClient) -> Option<Message> {
    within("protocol message", async {
        while let Some(frame) = ws.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => return Some(Message::from_json(&text).unwrap()),
                Ok(WsMessage::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
        None
    })
    .await
}

/// Next `connection` push, returning its `isActive` flag
pub async fn recv_status(ws: &mut WsClient) -> bool {
    match recv_message(ws).await {
        Some(Message::Connection(status)) => status.is_active,
        other => panic!("expected connection status, got {:?}", other),
    }
}

pub async fn send_message(ws: &mut WsClient, message: &Message) {
    ws.send(WsMessage::Text(message.to_json().unwrap())).await.unwrap();
}
