//! One local TCP connection mapped 1:1 onto a WebSocket.
//!
//! No framing: every binary message carries the local stream's bytes
//! verbatim, split at whatever boundaries the local read produced. Used for
//! tools that open exactly one connection, such as adb.
//!
//! The upstream copy, the downstream copy and the heartbeat share one
//! cancellation token; whichever stops first unwinds the other two and both
//! the local connection and the WebSocket are closed.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::transport::heartbeat::{self, PingFailure};
use crate::transport::{SharedSink, WsReader, dial, split};

use super::multiplexed::CHUNK_SIZE;
use super::options::StreamTunnelOptions;

// ============================================================================
// Types
// ============================================================================

struct Inner {
    remote_url: Url,
    token: String,
    options: StreamTunnelOptions,
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<Result<()>>>>,
    closed: AtomicBool,
}

// ============================================================================
// StreamTunnel
// ============================================================================

/// Forwards exactly one local TCP connection over a WebSocket.
///
/// The WebSocket is dialed only after the local connection arrives.
pub struct StreamTunnel {
    inner: Arc<Inner>,
}

impl fmt::Debug for StreamTunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTunnel")
            .field("local_addr", &self.inner.local_addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl StreamTunnel {
    /// Binds the local listener. Does not dial yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the local listener cannot be bound.
    pub async fn new(
        remote_url: &Url,
        token: impl Into<String>,
        options: StreamTunnelOptions,
    ) -> Result<Self> {
        let bind_addr = options.bind_addr();
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| Error::bind(bind_addr, e))?;
        let local_addr = listener.local_addr()?;

        debug!(%local_addr, "Stream tunnel listener bound");

        Ok(Self {
            inner: Arc::new(Inner {
                remote_url: remote_url.clone(),
                token: token.into(),
                options,
                local_addr,
                listener: Mutex::new(Some(listener)),
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Starts the tunnel in the background and returns immediately.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the tunnel was closed
    /// - [`Error::Config`] if the tunnel was already started
    pub fn start(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::NotConnected);
        }

        let listener = self
            .inner
            .listener
            .lock()
            .take()
            .ok_or_else(|| Error::config("tunnel already started"))?;

        let span = self
            .inner
            .options
            .span
            .clone()
            .unwrap_or_else(|| info_span!("stream_tunnel", local = %self.inner.local_addr));
        let handle = tokio::spawn(Arc::clone(&self.inner).run(listener).instrument(span));
        *self.inner.task.lock() = Some(handle);

        Ok(())
    }

    /// Returns `127.0.0.1:<port>` (or the bound IP if it is not a wildcard).
    #[must_use]
    pub fn addr(&self) -> String {
        let local = self.inner.local_addr;
        let ip = if local.ip().is_unspecified() {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            local.ip()
        };
        SocketAddr::new(ip, local.port()).to_string()
    }

    /// Returns the address the local listener is bound to.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Returns `true` once the tunnel has stopped or is stopping.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Closes the listener, the local connection and the WebSocket.
    ///
    /// Idempotent: later calls return `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns the error of closing the WebSocket, if any.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.inner.cancel.cancel();
        drop(self.inner.listener.lock().take());

        let task = self.inner.task.lock().take();
        let result = match task {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::connection(format!("tunnel task failed: {e}"))),
            },
            None => Ok(()),
        };

        info!(local = %self.inner.local_addr, "Stream tunnel closed");
        result
    }
}

impl Drop for StreamTunnel {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

// ============================================================================
// Inner - Background Tasks
// ============================================================================

impl Inner {
    /// Accepts one connection, dials, and copies both ways until cancelled.
    async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let accepted = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted,
        };
        drop(listener);

        let (tcp, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "Failed to accept local connection");
                self.cancel.cancel();
                return Ok(());
            }
        };
        debug!(%peer, "Local connection accepted");

        let stream = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            stream = dial(&self.remote_url, Some(self.token.as_str())) => stream,
        };
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "Failed to start stream tunnel");
                self.cancel.cancel();
                return Ok(());
            }
        };

        let (sink, reader) = split(stream);
        let (tcp_read, tcp_write) = tcp.into_split();

        info!(%peer, "Stream tunnel started");

        tokio::spawn(
            heartbeat::run(
                sink.clone(),
                self.options.heartbeat_interval,
                self.cancel.clone(),
                PingFailure::Cancel,
            )
            .instrument(Span::current()),
        );

        tokio::join!(
            upstream(tcp_read, sink.clone(), self.cancel.clone()),
            downstream(reader, tcp_write, self.cancel.clone()),
        );

        sink.close().await
    }
}

/// Local → remote raw copy.
///
/// Any exit, clean local EOF included, cancels the tunnel. The remote →
/// local direction stops with it; there is no half-close.
async fn upstream(mut tcp: OwnedReadHalf, sink: SharedSink, cancel: CancellationToken) {
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = tcp.read(&mut buffer) => read,
        };

        match read {
            Ok(0) => {
                debug!("Local connection closed by client");
                break;
            }
            Ok(n) => {
                if let Err(e) = sink.send_binary(buffer[..n].to_vec()).await {
                    error!(error = %e, "Failed to write to WebSocket");
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read from local connection");
                break;
            }
        }
    }

    cancel.cancel();
}

/// Remote → local raw copy.
async fn downstream(mut reader: WsReader, mut tcp: OwnedWriteHalf, cancel: CancellationToken) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = reader.next() => message,
        };

        let written = match message {
            Some(Ok(Message::Binary(data))) if !data.is_empty() => tcp.write_all(&data).await,
            Some(Ok(Message::Text(text))) if !text.is_empty() => {
                tcp.write_all(text.as_bytes()).await
            }
            Some(Ok(Message::Close(_))) | None => {
                debug!("WebSocket closed by remote");
                break;
            }
            Some(Err(e)) => {
                error!(error = %e, "WebSocket read error");
                break;
            }
            Some(Ok(_)) => Ok(()),
        };

        if let Err(e) = written {
            warn!(error = %e, "Failed to write to local connection");
            break;
        }
    }

    cancel.cancel();
    if let Err(e) = tcp.shutdown().await {
        trace!(error = %e, "Local shutdown failed");
    }
}

// ============================================================================
// Tests
// ============================================================================
