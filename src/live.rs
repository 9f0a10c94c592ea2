//! Gemini Live: a bidirectional websocket carrying PCM audio and tool calls.

use crate::types::live::{ClientMessage, ServerMessage, Setup};
use anyhow::Context;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

mod config;
mod consts;
mod utils;

pub use config::{Config as LiveConfig, ConfigBuilder as LiveConfigBuilder};

pub type ClientTx = mpsc::Sender<ClientMessage>;
pub type ServerRx = mpsc::Receiver<LiveEvent>;

const DEFAULT_CAPACITY: usize = 1024;

/// What the receive side of a session yields.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    Message(ServerMessage),
    /// The server closed the socket, or the stream ended.
    Closed(Option<String>),
    /// Reading from the socket failed. Nothing follows.
    Error(String),
}

pub struct Connection {
    // Ends on its own, closing the socket, once every ClientTx is gone.
    _send_handle: tokio::task::JoinHandle<()>,
    recv_handle: tokio::task::JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.recv_handle.abort();
    }
}

/// An open session. Dropping it tears down the socket tasks.
pub struct LiveChannels {
    pub client_tx: ClientTx,
    pub server_rx: ServerRx,
    connection: Option<Connection>,
}

impl LiveChannels {
    /// Channels with no socket behind them, for in-process transports.
    pub fn detached(client_tx: ClientTx, server_rx: ServerRx) -> Self {
        Self {
            client_tx,
            server_rx,
            connection: None,
        }
    }

    /// Splits the session; keep the `Connection` alive as long as the channels are used.
    pub fn into_parts(self) -> (ClientTx, ServerRx, Option<Connection>) {
        (self.client_tx, self.server_rx, self.connection)
    }
}

/// Opens Live sessions. The setup message is always the first frame sent.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self, setup: Setup) -> anyhow::Result<LiveChannels>;
}

pub struct GeminiLive {
    capacity: usize,
    config: LiveConfig,
}

impl GeminiLive {
    pub fn new(config: LiveConfig) -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            config,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }
}

#[async_trait]
impl LiveConnector for GeminiLive {
    async fn connect(&self, setup: Setup) -> anyhow::Result<LiveChannels> {
        let request = utils::build_request(&self.config).context("Failed to build Live request")?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .context("Failed to connect to Gemini Live")?;
        tracing::info!("Connected to Gemini Live, model={}", setup.model());

        let (mut write, mut read) = ws_stream.split();

        let (c_tx, mut c_rx) = mpsc::channel::<ClientMessage>(self.capacity);
        let (s_tx, s_rx) = mpsc::channel::<LiveEvent>(self.capacity);

        let send_handle = tokio::spawn(async move {
            while let Some(message) = c_rx.recv().await {
                match serde_json::to_string(&message) {
                    Ok(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::error!("failed to send message: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("failed to serialize message: {}", e);
                    }
                }
            }
            if let Err(e) = write.close().await {
                tracing::debug!("failed to close live socket: {}", e);
            }
        });

        let recv_handle = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let message = match message {
                    Err(e) => {
                        tracing::error!("failed to read message: {}", e);
                        let _ = s_tx.send(LiveEvent::Error(e.to_string())).await;
                        return;
                    }
                    Ok(message) => message,
                };
                let payload = match message {
                    Message::Text(text) => text.into_bytes(),
                    Message::Binary(bin) => bin,
                    Message::Close(frame) => {
                        tracing::info!("connection closed: {:?}", frame);
                        let reason = frame.map(|f| f.reason.to_string());
                        let _ = s_tx.send(LiveEvent::Closed(reason)).await;
                        return;
                    }
                    _ => continue,
                };
                match utils::decode_server_message(&payload) {
                    Ok(message) => {
                        tracing::debug!("received message: {:?}", utils::message_kinds(&message));
                        if s_tx.send(LiveEvent::Message(message)).await.is_err() {
                            tracing::debug!("live receiver dropped");
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            "failed to deserialize message: {}, text=> {:?}",
                            e,
                            String::from_utf8_lossy(&payload)
                        );
                    }
                }
            }
            let _ = s_tx.send(LiveEvent::Closed(None)).await;
        });

        c_tx.send(ClientMessage::Setup(setup))
            .await
            .context("Failed to send setup message")?;

        Ok(LiveChannels {
            client_tx: c_tx,
            server_rx: s_rx,
            connection: Some(Connection {
                _send_handle: send_handle,
                recv_handle,
            }),
        })
    }
}
