//! Request/response client for an iOS instance's signaling endpoint.
//!
//! One WebSocket carries every request. Each request gets a fresh
//! [`RequestId`] and a one-shot channel registered *before* it is written, so
//! a fast response can never arrive for an unregistered ID. A single read
//! loop owns the socket's read half and routes every inbound message:
//!
//! | Message | Destination |
//! |---------|-------------|
//! | `type: "simctlStream"` | running [`Simctl`] with the same ID |
//! | any other type | pending request with the same ID |
//! | unknown ID | dropped |
//!
//! When the connection ends, for whatever reason, every pending request and
//! every running command fails with [`Error::ConnectionClosed`] exactly once.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::StreamExt;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info_span, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{RequestId, RequestIdGenerator};
use crate::protocol::{Command, Request, Response};
use crate::transport::heartbeat::{self, PingFailure};
use crate::transport::{SharedSink, WsReader, dial, split};

use super::simctl::{CommandShared, Completion, Simctl};

// ============================================================================
// Constants
// ============================================================================

/// Path appended to the API URL.
const SIGNALING_PATH: &str = "signaling";

/// Default ping period of the signaling connection.
pub const CLIENT_HEARTBEAT: Duration = Duration::from_secs(30);

// ============================================================================
// ClientOptions
// ============================================================================

/// Configuration for [`Client`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Timeout applied by [`Client::send`]. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,

    /// Ping period.
    pub heartbeat_interval: Duration,

    /// Span the background loops are instrumented with.
    pub span: Option<Span>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientOptions {
    /// Creates options with no request timeout and a 30s heartbeat.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            request_timeout: None,
            heartbeat_interval: CLIENT_HEARTBEAT,
            span: None,
        }
    }

    /// Sets the default request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the heartbeat period.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the span for background loops.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

// ============================================================================
// Types
// ============================================================================

/// Response channel of a pending request.
type ResponseTx = oneshot::Sender<Response>;

/// State shared between the client handle, its loops and its commands.
pub(crate) struct ClientInner {
    sink: SharedSink,
    pending: Mutex<FxHashMap<RequestId, ResponseTx>>,
    commands: Mutex<FxHashMap<RequestId, Arc<CommandShared>>>,
    ids: RequestIdGenerator,
    /// Set once no new work may be registered.
    closed: AtomicBool,
    /// Set once dependents have been failed.
    torn_down: AtomicBool,
    /// Set by the first [`Client::close`].
    close_called: AtomicBool,
    /// Stops the read and heartbeat loops; also observed by waiting callers.
    shutdown: CancellationToken,
    read_task: Mutex<Option<JoinHandle<()>>>,
    options: ClientOptions,
}

// ============================================================================
// Client
// ============================================================================

/// Client for one iOS instance.
///
/// Typed actions live in [`actions`](super::actions); streaming `simctl`
/// invocations are created with [`Client::simctl`].
///
/// # Example
///
/// ```no_run
/// use device_tunnel::ios::{Client, ClientOptions};
///
/// # async fn example() -> device_tunnel::Result<()> {
/// let client = Client::connect("https://instance.example.com", "token", ClientOptions::new()).await?;
/// let shot = client.screenshot().await?;
/// println!("{}x{}", shot.width, shot.height);
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("closed", &self.is_closed())
            .field("pending", &self.pending_count())
            .field("commands", &self.command_count())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Connects to `<api_url>/signaling?token=<token>`.
    ///
    /// `http` becomes `ws` and `https` becomes `wss`.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the URL cannot be rewritten
    /// - [`Error::Connection`] if the WebSocket handshake fails
    pub async fn connect(api_url: &str, token: &str, options: ClientOptions) -> Result<Self> {
        let url = signaling_url(api_url, token)?;
        let stream = dial(&url, None).await?;
        let (sink, reader) = split(stream);

        let inner = Arc::new(ClientInner {
            sink,
            pending: Mutex::new(FxHashMap::default()),
            commands: Mutex::new(FxHashMap::default()),
            ids: RequestIdGenerator::new(),
            closed: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            close_called: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            read_task: Mutex::new(None),
            options,
        });

        let span = inner
            .options
            .span
            .clone()
            .unwrap_or_else(|| info_span!("ios_client", host = url.host_str().unwrap_or_default()));

        let read_task = tokio::spawn(Arc::clone(&inner).read_loop(reader).instrument(span.clone()));
        *inner.read_task.lock() = Some(read_task);

        tokio::spawn(
            heartbeat::run(
                inner.sink.clone(),
                inner.options.heartbeat_interval,
                inner.shutdown.clone(),
                PingFailure::Log,
            )
            .instrument(span),
        );

        debug!("Signaling connection established");

        Ok(Self { inner })
    }

    /// Sends a command and waits for its response.
    ///
    /// Uses the client-wide request timeout, if one is configured.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the client is closed
    /// - [`Error::ConnectionClosed`] if the connection ends first
    /// - [`Error::RequestTimeout`] if the configured timeout elapses
    /// - [`Error::Remote`] if the server answers with an error
    pub async fn send(&self, command: Command) -> Result<Response> {
        self.roundtrip(command, self.inner.options.request_timeout, None)
            .await
    }

    /// Sends a command with an explicit timeout.
    ///
    /// # Errors
    ///
    /// See [`Client::send`].
    pub async fn send_with_timeout(&self, command: Command, timeout: Duration) -> Result<Response> {
        self.roundtrip(command, Some(timeout), None).await
    }

    /// Sends a command that gives up when `cancel` fires.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] if `cancel` fires first; otherwise see
    /// [`Client::send`].
    pub async fn send_cancellable(
        &self,
        command: Command,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        self.roundtrip(command, self.inner.options.request_timeout, Some(cancel))
            .await
    }

    /// Creates a streaming `simctl` invocation. Nothing is sent until
    /// [`Simctl::start`].
    #[must_use]
    pub fn simctl<I, S>(&self, args: I) -> Simctl
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Simctl::new(
            Arc::clone(&self.inner),
            args.into_iter().map(Into::into).collect(),
        )
    }

    /// Returns `true` once the connection is closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Returns the number of requests awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Returns the number of running streaming commands.
    #[inline]
    #[must_use]
    pub fn command_count(&self) -> usize {
        self.inner.commands.lock().len()
    }

    /// Closes the connection and fails everything outstanding.
    ///
    /// Idempotent; later calls return `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns the error of closing the WebSocket, if any.
    pub async fn close(&self) -> Result<()> {
        if self.inner.close_called.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.inner.closed.store(true, Ordering::Release);
        let result = self.inner.sink.close().await;
        self.inner.teardown().await;

        let task = self.inner.read_task.lock().take();
        if let Some(handle) = task
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Signaling read loop failed");
        }

        debug!("Signaling connection closed");
        result
    }

    /// Writes a request and waits for the matching response.
    async fn roundtrip(
        &self,
        command: Command,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(Error::NotConnected);
        }

        let id = inner.ids.generate();
        let (tx, rx) = oneshot::channel();
        inner.pending.lock().insert(id.clone(), tx);
        let _registration = PendingGuard {
            inner,
            id: id.clone(),
        };

        // Teardown may have drained the map just before the insert.
        if inner.closed.load(Ordering::Acquire) {
            return Err(Error::NotConnected);
        }

        let request = Request::new(id.clone(), command);
        trace!(id = %id, kind = request.command.type_name(), "Sending request");

        let exchange = async {
            inner.write(&request).await?;
            tokio::select! {
                biased;
                response = rx => response.map_err(|_| Error::ConnectionClosed),
                _ = inner.shutdown.cancelled() => Err(Error::ConnectionClosed),
                _ = cancelled(cancel) => Err(Error::Cancelled),
            }
        };

        let response = match timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| Error::request_timeout(id.clone(), timeout_millis(limit)))??,
            None => exchange.await?,
        };

        response.into_result()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.shutdown.cancel();
    }
}

/// Removes a pending registration however the request ends.
struct PendingGuard<'a> {
    inner: &'a ClientInner,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(&self.id);
    }
}

async fn cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => future::pending().await,
    }
}

// ============================================================================
// ClientInner - Shared Operations
// ============================================================================

impl ClientInner {
    /// Returns a fresh request ID.
    pub(crate) fn next_id(&self) -> RequestId {
        self.ids.generate()
    }

    /// Serializes and writes a request under the write lock.
    pub(crate) async fn write(&self, request: &Request) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::NotConnected);
        }

        let text = serde_json::to_string(request)?;
        self.sink.send_text(text).await.map_err(|e| match e {
            Error::WebSocket(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                Error::ConnectionClosed
            }
            other => other,
        })
    }

    /// Registers a streaming command before its start request is written.
    pub(crate) fn register_command(&self, command: Arc<CommandShared>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::NotConnected);
        }

        let id = command.id().clone();
        self.commands.lock().insert(id.clone(), command);

        if self.closed.load(Ordering::Acquire) {
            self.commands.lock().remove(&id);
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    /// Removes a streaming command.
    pub(crate) fn deregister_command(&self, id: &RequestId) {
        self.commands.lock().remove(id);
    }

    /// Fails every pending request and running command. Runs once.
    async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.closed.store(true, Ordering::Release);
        self.shutdown.cancel();

        // Dropping the senders wakes every waiter with ConnectionClosed.
        let pending = std::mem::take(&mut *self.pending.lock());
        let commands = std::mem::take(&mut *self.commands.lock());

        debug!(
            pending = pending.len(),
            commands = commands.len(),
            "Failing outstanding work"
        );
        drop(pending);

        for command in commands.into_values() {
            command.finish(Completion::ConnectionClosed).await;
        }
    }
}

// ============================================================================
// ClientInner - Read Loop
// ============================================================================

impl ClientInner {
    /// Routes inbound messages until the connection ends, then tears down.
    async fn read_loop(self: Arc<Self>, mut reader: WsReader) {
        loop {
            let message = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                message = reader.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()).await,
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => self.dispatch(text).await,
                    Err(e) => warn!(error = %e, "Dropping non-UTF-8 signaling message"),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Server closed signaling connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if !self.closed.load(Ordering::Acquire) {
                        error!(error = %e, "Signaling connection failed");
                    }
                    break;
                }
                None => break,
            }
        }

        self.teardown().await;

        if let Err(e) = self.sink.close().await {
            debug!(error = %e, "Failed to close signaling connection");
        }
    }

    async fn dispatch(&self, text: &str) {
        let response: Response = match serde_json::from_str(text) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Failed to parse signaling message");
                return;
            }
        };

        if response.is_stream() {
            self.dispatch_stream(response).await;
            return;
        }

        let sender = self.pending.lock().remove(&response.id);
        match sender {
            Some(tx) => {
                // The caller may have given up already.
                let _ = tx.send(response);
            }
            None => trace!(id = %response.id, "Dropping response for unknown request"),
        }
    }

    async fn dispatch_stream(&self, response: Response) {
        let command = self.commands.lock().get(&response.id).cloned();
        let Some(command) = command else {
            trace!(id = %response.id, "Dropping output for unknown command");
            return;
        };

        let stdout = decode_output(response.stdout.as_deref(), &response.id, "stdout");
        let stderr = decode_output(response.stderr.as_deref(), &response.id, "stderr");
        command.deliver(&stdout, &stderr).await;

        if let Some(code) = response.exit_code {
            self.deregister_command(&response.id);
            debug!(id = %response.id, code, "Command finished");
            command.finish(Completion::Exited(code)).await;
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Builds the signaling URL from an HTTP(S) or WS(S) API URL.
pub(crate) fn signaling_url(api_url: &str, token: &str) -> Result<Url> {
    let mut url =
        Url::parse(api_url).map_err(|e| Error::config(format!("invalid API URL: {e}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(Error::config(format!("unsupported API URL scheme: {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::config("cannot rewrite API URL scheme"))?;

    url.path_segments_mut()
        .map_err(|()| Error::config("API URL cannot be a base"))?
        .pop_if_empty()
        .push(SIGNALING_PATH);

    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "token")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(retained)
        .append_pair("token", token);

    Ok(url)
}

/// Milliseconds of `limit`, saturating at `u64::MAX`.
fn timeout_millis(limit: Duration) -> u64 {
    u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)
}

/// Decodes a base64 output chunk; undecodable chunks are dropped.
fn decode_output(chunk: Option<&str>, id: &RequestId, stream: &str) -> Vec<u8> {
    match chunk {
        None | Some("") => Vec::new(),
        Some(encoded) => STANDARD.decode(encoded).unwrap_or_else(|e| {
            warn!(id = %id, stream, error = %e, "Dropping undecodable command output");
            Vec::new()
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signaling_url_https() {
        let url = signaling_url("https://instance.example.com", "secret").expect("url");
        assert_eq!(url.as_str(), "wss://instance.example.com/signaling?token=secret");
    }

    #[test]
    fn test_signaling_url_http_with_path() {
        let url = signaling_url("http://127.0.0.1:8080/api/", "t").expect("url");
        assert_eq!(url.as_str(), "ws://127.0.0.1:8080/api/signaling?token=t");
    }

    #[test]
    fn test_signaling_url_replaces_token() {
        let url = signaling_url("https://host/?token=old&region=eu", "new").expect("url");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("region".to_string(), "eu".to_string()),
                ("token".to_string(), "new".to_string()),
            ]
        );
    }

    #[test]
    fn test_signaling_url_escapes_token() {
        let url = signaling_url("https://host", "a b&c").expect("url");
        let token = url
            .query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned());
        assert_eq!(token.as_deref(), Some("a b&c"));
    }

    #[test]
    fn test_signaling_url_rejects_other_schemes() {
        let err = signaling_url("ftp://host", "t").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        let err = signaling_url("not a url", "t").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_decode_output() {
        let id = RequestId::from("rs-1-1");
        assert_eq!(decode_output(Some("aGk="), &id, "stdout"), b"hi");
        assert!(decode_output(None, &id, "stdout").is_empty());
        assert!(decode_output(Some("!!"), &id, "stdout").is_empty());
    }

    #[test]
    fn test_timeout_millis_saturates() {
        assert_eq!(timeout_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(timeout_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_options_builder() {
        let options = ClientOptions::new()
            .with_request_timeout(Duration::from_secs(5))
            .with_heartbeat_interval(Duration::from_secs(1));
        assert_eq!(options.request_timeout, Some(Duration::from_secs(5)));
        assert_eq!(options.heartbeat_interval, Duration::from_secs(1));
        assert!(options.span.is_none());
    }
}
