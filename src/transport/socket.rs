//! WebSocket dialing and the shared write half.
//!
//! Every multiplexing component owns exactly one WebSocket. Reads happen on a
//! single dedicated loop that owns the [`WsReader`]; every writer goes through
//! a [`SharedSink`], which serializes writes behind one async mutex so frames
//! from concurrent sessions never interleave.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// Client WebSocket over plain TCP or TLS.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Read half, owned by the single inbound loop.
pub type WsReader = SplitStream<WsStream>;

/// Raw write half.
type WsWriter = SplitSink<WsStream, Message>;

// ============================================================================
// Dialing
// ============================================================================

/// Dials `url`, optionally sending `Authorization: Bearer <token>`.
///
/// # Errors
///
/// - [`Error::Config`] if the URL or token cannot form a valid request
/// - [`Error::Connection`] if the handshake fails
pub async fn dial(url: &Url, bearer_token: Option<&str>) -> Result<WsStream> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::config(format!("invalid WebSocket URL: {e}")))?;

    if let Some(token) = bearer_token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::config(format!("invalid token: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let host = url.host_str().unwrap_or_default().to_string();
    let (stream, response) = connect_async(request)
        .await
        .map_err(|e| Error::connection(format!("failed to dial {host}: {e}")))?;

    debug!(%host, status = %response.status(), "WebSocket connected");

    Ok(stream)
}

/// Splits a stream into the shared writer and the single reader.
#[must_use]
pub fn split(stream: WsStream) -> (SharedSink, WsReader) {
    let (writer, reader) = stream.split();
    (SharedSink::new(writer), reader)
}

// ============================================================================
// SharedSink
// ============================================================================

/// Write half of the duplex connection guarded by an exclusive lock.
///
/// Cloning is cheap; all clones serialize on the same lock.
#[derive(Clone)]
pub struct SharedSink {
    writer: Arc<Mutex<WsWriter>>,
}

impl SharedSink {
    fn new(writer: WsWriter) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    /// Sends one message while holding the write lock.
    pub async fn send(&self, message: Message) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.send(message).await?;
        Ok(())
    }

    /// Sends a binary message.
    pub async fn send_binary(&self, data: Vec<u8>) -> Result<()> {
        trace!(len = data.len(), "Sending binary message");
        self.send(Message::binary(data)).await
    }

    /// Sends a text message.
    pub async fn send_text(&self, text: String) -> Result<()> {
        trace!(len = text.len(), "Sending text message");
        self.send(Message::text(text)).await
    }

    /// Sends a protocol-level ping.
    pub async fn ping(&self) -> Result<()> {
        self.send(Message::Ping(Vec::new().into())).await
    }

    /// Sends a close frame and flushes.
    ///
    /// Closing an already closed connection is not an error.
    pub async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
