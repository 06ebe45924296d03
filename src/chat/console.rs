//! Line-oriented chat adapter
//!
//! Input lines look like `<channel> <text>`; output is written as
//! `[<channel>] <text>`, split to the configured message length. Used by the
//! binary so the relay can be driven from a terminal or a pipe.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{respond, split_message, ChatInbound, ChatOutbound};
use crate::config::ChatSettings;
use crate::coordinator::CoordinatorHandle;
use crate::error::{Error, Result};

pub struct ConsoleChat {
    coordinator: CoordinatorHandle,
    settings: ChatSettings,
    outbound_tx: mpsc::UnboundedSender<ChatOutbound>,
    outbound_rx: mpsc::UnboundedReceiver<ChatOutbound>,
}

impl ConsoleChat {
    /// `outbound_tx` must feed `outbound_rx`; the coordinator holds another clone
    pub fn new(
        coordinator: CoordinatorHandle,
        settings: ChatSettings,
        outbound_tx: mpsc::UnboundedSender<ChatOutbound>,
        outbound_rx: mpsc::UnboundedReceiver<ChatOutbound>,
    ) -> Self {
        Self {
            coordinator,
            settings,
            outbound_tx,
            outbound_rx,
        }
    }

    /// Drive stdin/stdout
    pub async fn run(self) -> Result<()> {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        self.run_with(stdin, tokio::io::stdout()).await
    }

    /// Serve until the outbound side closes. Input EOF only stops reading.
    pub async fn run_with<R, W>(mut self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut input_open = true;

        loop {
            tokio::select! {
                line = lines.next_line(), if input_open => match line {
                    Ok(Some(line)) => self.handle_line(&line),
                    Ok(None) => {
                        info!("Chat input closed");
                        input_open = false;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read chat input");
                        input_open = false;
                    }
                },
                outbound = self.outbound_rx.recv() => match outbound {
                    Some(outbound) => self.write_outbound(&mut output, &outbound).await?,
                    None => return Ok(()),
                },
            }
        }
    }

    fn handle_line(&self, line: &str) {
        let Some((channel_id, text)) = parse_line(line) else {
            if !line.trim().is_empty() {
                warn!(line = %line.trim(), "Expected '<channel> <text>'");
            }
            return;
        };

        if !self.channel_allowed(channel_id) {
            warn!(channel_id = %channel_id, "Ignoring input from channel not on the allow list");
            return;
        }

        let inbound = match ChatInbound::from_text(channel_id, text) {
            Ok(inbound) => inbound,
            Err(feedback) => {
                let _ = self.outbound_tx.send(ChatOutbound {
                    channel_id: channel_id.to_string(),
                    content: format!("❓ {}", feedback),
                });
                return;
            }
        };

        // Commands wait up to the ack deadline; do not hold up the console.
        let coordinator = self.coordinator.clone();
        let outbound_tx = self.outbound_tx.clone();
        tokio::spawn(async move {
            let channel_id = inbound.channel_id().to_string();
            if let Some(content) = respond(&coordinator, inbound).await {
                let _ = outbound_tx.send(ChatOutbound { channel_id, content });
            }
        });
    }

    fn channel_allowed(&self, channel_id: &str) -> bool {
        self.settings.allowed_channels.is_empty()
            || self.settings.allowed_channels.iter().any(|c| c == channel_id)
    }

    async fn write_outbound<W>(&self, output: &mut W, outbound: &ChatOutbound) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let parts = split_message(&outbound.content, self.settings.max_message_len);
        let count = parts.len();
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 && self.settings.part_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.settings.part_delay_ms)).await;
            }
            let line = format!("[{}] {}\n", outbound.channel_id, part);
            output.write_all(line.as_bytes()).await.map_err(write_error)?;
        }
        output.flush().await.map_err(write_error)?;

        if count > 1 {
            debug!(channel_id = %outbound.channel_id, parts = count, "Sent split message");
        }
        Ok(())
    }
}

fn write_error(e: std::io::Error) -> Error {
    Error::IoWrite {
        path: "<stdout>".into(),
        source: e,
    }
}

/// Split `<channel> <text>` at the first whitespace
pub fn parse_line(line: &str) -> Option<(&str, &str)> {
    let (channel, text) = line.trim().split_once(char::is_whitespace)?;
    let text = text.trim();
    (!channel.is_empty() && !text.is_empty()).then_some((channel, text))
}
