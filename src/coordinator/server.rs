//! WebSocket endpoint relay clients connect to
//!
//! Clients connect to `ws://<listen_addr>/?clientId=<id>`. Connections
//! without an identity are refused during the handshake with HTTP 400.
//! Each accepted socket gets a writer task draining its [`ClientHandle`]
//! queue and a reader feeding decoded frames into the coordinator.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use super::registry::{ClientHandle, Outbound};
use super::CoordinatorHandle;
use crate::error::{Error, Result};
use crate::protocol::Message;

/// Query parameter carrying the client identity
pub const CLIENT_ID_PARAM: &str = "clientId";

pub struct CoordinatorServer {
    listener: TcpListener,
    coordinator: CoordinatorHandle,
    next_seq: AtomicU64,
}

impl CoordinatorServer {
    pub async fn bind(addr: &str, coordinator: CoordinatorHandle) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| Error::ConnectionFailed {
            url: addr.to_string(),
            message: format!("bind failed: {}", e),
        })?;

        Ok(Self {
            listener,
            coordinator,
            next_seq: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!(addr = %addr, "Coordinator listening");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                        let coordinator = self.coordinator.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_socket(stream, peer, seq, coordinator).await {
                                debug!(peer = %peer, error = %e, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
                _ = &mut shutdown => {
                    info!("Coordinator listener stopping");
                    return Ok(());
                }
            }
        }
    }
}

/// Pull the client identity out of a request query string
pub fn client_id_from_query(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == CLIENT_ID_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|id| !id.is_empty())
}

fn bad_request(reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}

async fn handle_socket(
    stream: TcpStream,
    peer: SocketAddr,
    seq: u64,
    coordinator: CoordinatorHandle,
) -> Result<()> {
    let mut client_id = None;
    let ws_stream = accept_hdr_async(stream, |request: &Request, response: Response| {
        match client_id_from_query(request.uri().query()) {
            Some(id) => {
                client_id = Some(id);
                Ok(response)
            }
            None => Err(bad_request("missing clientId")),
        }
    })
    .await;

    let ws_stream = match ws_stream {
        Ok(ws) => ws,
        Err(e) => {
            warn!(peer = %peer, error = %e, "Rejected relay client handshake");
            return Err(e.into());
        }
    };
    let client_id = client_id.ok_or(Error::MissingClientId)?;

    let (handle, mut outbound_rx) = ClientHandle::new(client_id.clone(), seq);
    coordinator.client_connected(handle).await?;

    let (mut write, mut read) = ws_stream.split();

    let writer_id = client_id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            match outbound {
                Outbound::Frame(message) => {
                    let json = match message.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            error!(client_id = %writer_id, error = %e, "Failed to encode frame");
                            continue;
                        }
                    };
                    if let Err(e) = write.send(WsMessage::Text(json)).await {
                        debug!(client_id = %writer_id, error = %e, "Write failed");
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    handle_frame(&coordinator, &client_id, &text).await?;
                }
                Some(Ok(WsMessage::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => handle_frame(&coordinator, &client_id, text).await?,
                    Err(_) => warn!(client_id = %client_id, "Dropping non-UTF-8 binary frame"),
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!(client_id = %client_id, frame = ?frame, "Received close frame");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(client_id = %client_id, error = %e, "Read failed");
                    break;
                }
                None => break,
            },
            _ = &mut writer => break,
        }
    }

    writer.abort();
    coordinator.client_disconnected(&client_id, seq).await?;
    Ok(())
}

async fn handle_frame(coordinator: &CoordinatorHandle, client_id: &str, text: &str) -> Result<()> {
    match decode_upstream(text) {
        Ok(message) => coordinator.transport_message(client_id, message).await,
        Err(e) => {
            warn!(client_id = %client_id, error = %e.format_for_log(), "Dropping inbound frame");
            Ok(())
        }
    }
}

/// Decode a client frame, refusing message types only the coordinator sends
fn decode_upstream(text: &str) -> Result<Message> {
    let message = Message::from_json(text)?;
    if !message.is_upstream() {
        return Err(Error::ProtocolUnexpected {
            message_type: message.type_name().to_string(),
        });
    }
    Ok(message)
}
