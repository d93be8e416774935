//! Loopback WebSocket server for integration tests.

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for any single wait in a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Types
// ============================================================================

/// Server side of one accepted WebSocket.
pub type ServerSocket = WebSocketStream<TcpStream>;

/// One accepted WebSocket with its handshake details.
pub struct Accepted {
    /// Request URI including the query string.
    pub uri: String,
    /// Value of the `Authorization` header, if any.
    pub authorization: Option<String>,
    /// The WebSocket itself.
    pub ws: ServerSocket,
}

/// A mock server accepting any number of WebSockets.
pub struct MockServer {
    pub addr: SocketAddr,
    accepted: mpsc::UnboundedReceiver<Accepted>,
}

// ============================================================================
// MockServer
// ============================================================================

impl MockServer {
    /// Binds an ephemeral port and starts accepting.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
        let addr = listener.local_addr().expect("mock server addr");
        let (tx, accepted) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut uri = String::new();
                    let mut authorization = None;
                    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                        uri = request.uri().to_string();
                        authorization = request
                            .headers()
                            .get(AUTHORIZATION)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        Ok(response)
                    };
                    if let Ok(ws) = accept_hdr_async(stream, callback).await {
                        let _ = tx.send(Accepted {
                            uri,
                            authorization,
                            ws,
                        });
                    }
                });
            }
        });

        Self { addr, accepted }
    }

    /// `ws://` URL of this server with `path`.
    pub fn ws_url(&self, path: &str) -> url::Url {
        url::Url::parse(&format!("ws://{}{path}", self.addr)).expect("mock url")
    }

    /// `http://` URL of this server.
    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Waits for the next accepted WebSocket.
    pub async fn accept(&mut self) -> Accepted {
        tokio::time::timeout(TEST_TIMEOUT, self.accepted.recv())
            .await
            .expect("timed out waiting for a WebSocket")
            .expect("mock server stopped")
    }
}

// ============================================================================
// Socket Helpers
// ============================================================================

/// Next binary message, skipping control frames.
pub async fn next_binary(ws: &mut ServerSocket) -> Option<Bytes> {
    loop {
        let message = tokio::time::timeout(TEST_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a binary message")?;
        match message.ok()? {
            Message::Binary(data) => return Some(data),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

/// Next text message parsed as JSON, skipping control frames.
pub async fn next_json(ws: &mut ServerSocket) -> Option<Value> {
    loop {
        let message = tokio::time::timeout(TEST_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a text message")?;
        match message.ok()? {
            Message::Text(text) => {
                return Some(serde_json::from_str(text.as_str()).expect("request JSON"));
            }
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

/// Waits for a protocol-level ping, skipping everything else.
///
/// Returns `false` if the socket closes first.
pub async fn next_ping(ws: &mut ServerSocket) -> bool {
    loop {
        let message = tokio::time::timeout(TEST_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a ping");
        match message {
            Some(Ok(Message::Ping(_))) => return true,
            Some(Ok(Message::Close(_)) | Err(_)) | None => return false,
            Some(Ok(_)) => continue,
        }
    }
}

/// Sends a JSON value as a text message.
pub async fn send_json(ws: &mut ServerSocket, value: Value) {
    ws.send(Message::text(value.to_string()))
        .await
        .expect("send JSON");
}

/// Sends a binary message.
pub async fn send_binary(ws: &mut ServerSocket, data: Vec<u8>) {
    ws.send(Message::binary(data)).await.expect("send binary");
}

/// Installs a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
