//! WebSocket JSON session used by streaming quote providers
//!
//! Wraps a `tokio-tungstenite` connection with typed send/receive helpers. Text
//! and binary frames both carry JSON; ping/pong frames are handled transparently.

use futures_util::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::CloseFrame, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket session errors
#[derive(Error, Debug)]
pub enum WsError {
    #[error("WebSocket connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("WebSocket transport error: {0}")]
    Transport(String),

    #[error("Undecodable frame: {0}")]
    Decode(String),

    #[error("Failed to encode frame: {0}")]
    Encode(String),
}

/// An open JSON-over-WebSocket session
pub struct WsJsonSession {
    url: String,
    socket: Socket,
    closed: bool,
}

impl WsJsonSession {
    /// Connect to `url`; `redacted_url` is what gets logged
    pub async fn connect(url: &str, redacted_url: &str) -> Result<Self, WsError> {
        info!(target: "streaming", url = %redacted_url, "Connecting to WebSocket");

        let (socket, _response) = connect_async(url).await.map_err(|e| WsError::Connect {
            url: redacted_url.to_string(),
            reason: e.to_string(),
        })?;

        info!(target: "streaming", url = %redacted_url, "WebSocket connected successfully");
        Ok(Self {
            url: redacted_url.to_string(),
            socket,
            closed: false,
        })
    }

    pub async fn send_json<T: Serialize>(&mut self, message: &T) -> Result<(), WsError> {
        let text = serde_json::to_string(message).map_err(|e| WsError::Encode(e.to_string()))?;
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|e| WsError::Transport(e.to_string()))
    }

    /// Next JSON frame; `None` when the peer closed the connection
    pub async fn next_json<T: DeserializeOwned>(&mut self) -> Option<Result<T, WsError>> {
        loop {
            let frame = match self.socket.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(WsError::Transport(e.to_string()))),
            };
            let decoded = match frame {
                Message::Text(text) => serde_json::from_str(&text),
                Message::Binary(bytes) => serde_json::from_slice(&bytes),
                Message::Ping(payload) => {
                    if let Err(e) = self.socket.send(Message::Pong(payload)).await {
                        return Some(Err(WsError::Transport(e.to_string())));
                    }
                    continue;
                }
                Message::Pong(_) | Message::Frame(_) => continue,
                Message::Close(_) => {
                    debug!(target: "streaming", url = %self.url, "Peer closed WebSocket");
                    self.closed = true;
                    return None;
                }
            };
            return Some(decoded.map_err(|e| WsError::Decode(e.to_string())));
        }
    }

    /// Send a normal close frame; errors are logged, never returned
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let frame = CloseFrame {
            code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal,
            reason: "done".into(),
        };
        if let Err(e) = self.socket.close(Some(frame)).await {
            warn!(target: "streaming", url = %self.url, error = %e, "WebSocket close failed");
        }
    }
}

/// Strip query parameters (which may carry credentials) from a URL for logging
pub fn redact_url(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{}?<redacted>", base),
        None => url.to_string(),
    }
}
