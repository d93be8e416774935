//! Many local TCP connections over one WebSocket.
//!
//! Every accepted local connection gets a fresh [`ConnectionId`]; its bytes
//! travel as `[connection ID][payload]` binary messages (see
//! [`transport::frame`](crate::transport::frame)). The remote end opens its
//! side implicitly on the first frame with a new ID, and an empty payload
//! closes a connection in either direction.
//!
//! # Tasks
//!
//! | Task | Count | Role |
//! |------|-------|------|
//! | accept loop | 1 | assigns IDs, registers sessions |
//! | forwarder | 1 per session | local → remote |
//! | demux loop | 1 | remote → local |
//! | heartbeat | 1 | ping every 10s |
//!
//! A read error on the WebSocket cancels the whole tunnel; per-session
//! errors only close that session.
//!
//! # Example
//!
//! ```no_run
//! use device_tunnel::tunnel::{MultiplexedTunnel, TunnelOptions};
//! use url::Url;
//!
//! # async fn example() -> device_tunnel::Result<()> {
//! let remote = Url::parse("wss://instance.example.com/port-forward").unwrap();
//! let tunnel = MultiplexedTunnel::new(&remote, 8100, "token", TunnelOptions::new()).await?;
//! tunnel.start()?;
//! println!("iOS port 8100 is available at {}", tunnel.addr());
//! tunnel.close().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, ConnectionIdAllocator};
use crate::transport::heartbeat::{self, PingFailure};
use crate::transport::{Frame, SharedSink, WsReader, decode, dial, encode, split};

use super::options::TunnelOptions;

// ============================================================================
// Constants
// ============================================================================

/// Maximum bytes read from a local connection per frame.
pub const CHUNK_SIZE: usize = 32 * 1024;

// ============================================================================
// Types
// ============================================================================

/// A registered local connection.
#[derive(Clone)]
struct Session {
    /// Write half, used by the demux loop.
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    /// Stops the forwarder; child of the tunnel token.
    cancel: CancellationToken,
}

/// Shared state between the handle and the background tasks.
struct Inner {
    /// WebSocket URL including the `port` query parameter.
    remote_url: Url,
    /// Bearer token sent at dial time.
    token: String,
    /// Options the tunnel was created with.
    options: TunnelOptions,
    /// Address the local listener is bound to.
    local_addr: SocketAddr,
    /// Listener until `start` hands it to the accept loop.
    listener: Mutex<Option<TcpListener>>,
    /// Active sessions by connection ID.
    sessions: Mutex<FxHashMap<ConnectionId, Session>>,
    /// Connection ID source.
    ids: ConnectionIdAllocator,
    /// Cancels every task of this tunnel.
    cancel: CancellationToken,
    /// Background task started by `start`.
    task: Mutex<Option<JoinHandle<Result<()>>>>,
    /// Set by the first `close`.
    closed: AtomicBool,
}

// ============================================================================
// MultiplexedTunnel
// ============================================================================

/// Forwards any number of local TCP connections over one WebSocket.
///
/// The background tasks stop when the tunnel is closed or dropped.
pub struct MultiplexedTunnel {
    inner: Arc<Inner>,
}

impl fmt::Debug for MultiplexedTunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiplexedTunnel")
            .field("local_addr", &self.inner.local_addr)
            .field("sessions", &self.session_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// MultiplexedTunnel - Constructor
// ============================================================================

impl MultiplexedTunnel {
    /// Binds the local listener. Does not dial yet.
    ///
    /// `remote_port` is appended to `remote_url` as the `port` query
    /// parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the local listener cannot be bound.
    pub async fn new(
        remote_url: &Url,
        remote_port: u16,
        token: impl Into<String>,
        options: TunnelOptions,
    ) -> Result<Self> {
        let remote_url = with_port_query(remote_url, remote_port);
        let bind_addr = options.bind_addr();
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| Error::bind(bind_addr, e))?;
        let local_addr = listener.local_addr()?;

        debug!(%local_addr, remote_port, "Multiplexed tunnel listener bound");

        Ok(Self {
            inner: Arc::new(Inner {
                remote_url,
                token: token.into(),
                options,
                local_addr,
                listener: Mutex::new(Some(listener)),
                sessions: Mutex::new(FxHashMap::default()),
                ids: ConnectionIdAllocator::new(),
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }
}

// ============================================================================
// MultiplexedTunnel - Public API
// ============================================================================

impl MultiplexedTunnel {
    /// Starts the tunnel in the background and returns immediately.
    ///
    /// Dial failures are logged by the background task and stop the tunnel;
    /// they are not reported here.
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

        let span = self.inner.options.span.clone().unwrap_or_else(|| {
            info_span!("multiplexed_tunnel", local = %self.inner.local_addr)
        });
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

    /// Returns the number of registered local connections.
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Returns `true` once the tunnel has stopped or is stopping.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Closes the listener, every local connection and the WebSocket.
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

        self.inner.release_all();
        info!(local = %self.inner.local_addr, "Multiplexed tunnel closed");

        result
    }
}

impl Drop for MultiplexedTunnel {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

// ============================================================================
// Inner - Background Tasks
// ============================================================================

impl Inner {
    /// Dials, spawns the demux and heartbeat loops, then accepts until
    /// cancelled. Returns the result of closing the WebSocket.
    async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let stream = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            stream = dial(&self.remote_url, Some(self.token.as_str())) => stream,
        };

        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "Failed to start multiplexed tunnel");
                self.cancel.cancel();
                return Ok(());
            }
        };

        let (sink, reader) = split(stream);

        tokio::spawn(
            Arc::clone(&self)
                .demux_loop(reader)
                .instrument(Span::current()),
        );
        tokio::spawn(
            heartbeat::run(
                sink.clone(),
                self.options.heartbeat_interval,
                self.cancel.clone(),
                PingFailure::Log,
            )
            .instrument(Span::current()),
        );

        info!(local = %self.local_addr, "Multiplexed tunnel started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.open_session(stream, peer, &sink),
                    Err(e) => {
                        error!(error = %e, "Failed to accept local connection");
                        self.cancel.cancel();
                        break;
                    }
                },
            }
        }

        drop(listener);
        self.release_all();
        sink.close().await
    }

    /// Registers an accepted connection and spawns its forwarder.
    fn open_session(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr, sink: &SharedSink) {
        let Some(connection_id) = self.ids.next() else {
            warn!(%peer, "Connection ID space exhausted, rejecting local connection");
            return;
        };

        if let Err(e) = stream.set_nodelay(true) {
            trace!(error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let session = Session {
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            cancel: self.cancel.child_token(),
        };
        self.sessions.lock().insert(connection_id, session.clone());

        debug!(%connection_id, %peer, "Local connection accepted");

        tokio::spawn(
            Arc::clone(self)
                .forward(connection_id, reader, session, sink.clone())
                .instrument(Span::current()),
        );
    }

    /// Copies local bytes to the WebSocket until either side closes.
    async fn forward(
        self: Arc<Self>,
        connection_id: ConnectionId,
        mut reader: OwnedReadHalf,
        session: Session,
        sink: SharedSink,
    ) {
        let mut buffer = vec![0u8; CHUNK_SIZE];

        loop {
            let read = tokio::select! {
                _ = session.cancel.cancelled() => break,
                read = reader.read(&mut buffer) => read,
            };

            match read {
                Ok(0) => {
                    trace!(%connection_id, "Local connection reached end of stream");
                    break;
                }
                Ok(n) => {
                    if let Err(e) = sink.send_binary(encode(connection_id, &buffer[..n])).await {
                        error!(%connection_id, error = %e, "WebSocket write failed");
                        self.cancel.cancel();
                        break;
                    }
                }
                Err(e) => {
                    warn!(%connection_id, error = %e, "Failed to read from local connection");
                    break;
                }
            }
        }

        self.release(connection_id);
        if let Err(e) = session.writer.lock().await.shutdown().await {
            trace!(%connection_id, error = %e, "Local shutdown failed");
        }
        drop(reader);

        if !self.cancel.is_cancelled()
            && let Err(e) = sink.send_binary(Frame::close(connection_id).to_bytes()).await
        {
            debug!(%connection_id, error = %e, "Failed to send close frame");
        }

        debug!(%connection_id, "Local connection closed");
    }

    /// Routes inbound frames to local connections until the WebSocket fails.
    async fn demux_loop(self: Arc<Self>, mut reader: WsReader) {
        loop {
            let message = tokio::select! {
                _ = self.cancel.cancelled() => break,
                message = reader.next() => message,
            };

            match message {
                Some(Ok(Message::Binary(data))) => match decode(data) {
                    Ok(frame) => self.deliver(frame).await,
                    Err(e) => warn!(error = %e, "Dropping malformed frame"),
                },

                Some(Ok(Message::Text(_))) => {
                    warn!("Dropping unexpected text message");
                }

                Some(Ok(Message::Close(_))) => {
                    info!("WebSocket closed by remote");
                    break;
                }

                Some(Err(e)) => {
                    error!(error = %e, "WebSocket read error");
                    break;
                }

                None => {
                    debug!("WebSocket stream ended");
                    break;
                }

                // Ping, Pong, raw frames
                Some(Ok(_)) => {}
            }
        }

        self.cancel.cancel();
        debug!("Demux loop terminated");
    }

    /// Delivers one inbound frame to its local connection.
    async fn deliver(&self, frame: Frame) {
        let connection_id = frame.connection_id;
        let session = self.sessions.lock().get(&connection_id).cloned();

        let Some(session) = session else {
            // Both ends closing at once is expected; only lost data is noteworthy.
            if !frame.is_close() {
                warn!(
                    %connection_id,
                    len = frame.payload.len(),
                    "Received data for unknown connection"
                );
            }
            return;
        };

        if frame.is_close() {
            debug!(%connection_id, "Received close signal");
            self.release(connection_id);
            return;
        }

        let written = session.writer.lock().await.write_all(&frame.payload).await;
        if let Err(e) = written {
            warn!(%connection_id, error = %e, "Failed to write to local connection");
            self.release(connection_id);
        }
    }

    /// Deregisters a session and stops its forwarder.
    fn release(&self, connection_id: ConnectionId) {
        if let Some(session) = self.sessions.lock().remove(&connection_id) {
            session.cancel.cancel();
        }
    }

    /// Deregisters every session.
    fn release_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().drain().collect();
        let count = sessions.len();

        for (_, session) in sessions {
            session.cancel.cancel();
        }

        if count > 0 {
            debug!(count, "Released local connections");
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Returns `url` with its `port` query parameter set to `remote_port`.
fn with_port_query(url: &Url, remote_port: u16) -> Url {
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "port")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut url = url.clone();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(retained)
        .append_pair("port", &remote_port.to_string());
    url
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_query_appended() {
        let url = Url::parse("ws://10.244.1.2:8833/port-forward").expect("url");
        let url = with_port_query(&url, 8100);
        assert_eq!(url.as_str(), "ws://10.244.1.2:8833/port-forward?port=8100");
    }

    #[test]
    fn test_port_query_replaces_existing() {
        let url = Url::parse("wss://host/forward?port=1&session=abc").expect("url");
        let url = with_port_query(&url, 8100);
        assert_eq!(url.as_str(), "wss://host/forward?session=abc&port=8100");
    }

    #[test]
    fn test_chunk_size() {
        assert_eq!(CHUNK_SIZE, 32 * 1024);
    }

    #[tokio::test]
    async fn test_new_binds_ephemeral_port() {
        let url = Url::parse("ws://127.0.0.1:1/port-forward").expect("url");
        let tunnel = MultiplexedTunnel::new(&url, 8100, "token", TunnelOptions::new())
            .await
            .expect("bind");

        assert!(tunnel.local_addr().port() > 0);
        assert!(tunnel.addr().starts_with("127.0.0.1:"));
        assert_eq!(tunnel.session_count(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let url = Url::parse("ws://127.0.0.1:1/port-forward").expect("url");
        let first = MultiplexedTunnel::new(&url, 8100, "token", TunnelOptions::new())
            .await
            .expect("bind");
        let taken = first.local_addr().port();

        let second =
            MultiplexedTunnel::new(&url, 8100, "token", TunnelOptions::new().with_local_port(taken))
                .await;
        assert!(matches!(second, Err(Error::Bind { .. })));
    }

    #[tokio::test]
    async fn test_close_before_start_is_idempotent() {
        let url = Url::parse("ws://127.0.0.1:1/port-forward").expect("url");
        let tunnel = MultiplexedTunnel::new(&url, 8100, "token", TunnelOptions::new())
            .await
            .expect("bind");

        tunnel.close().await.expect("first close");
        tunnel.close().await.expect("second close");
        assert!(tunnel.is_closed());
        assert!(matches!(tunnel.start(), Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let url = Url::parse("ws://127.0.0.1:1/port-forward").expect("url");
        let tunnel = MultiplexedTunnel::new(&url, 8100, "token", TunnelOptions::new())
            .await
            .expect("bind");

        tunnel.start().expect("first start");
        assert!(matches!(tunnel.start(), Err(Error::Config { .. })));
        tunnel.close().await.expect("close");
    }
}
