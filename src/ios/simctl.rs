//! Streaming `simctl` invocations.
//!
//! A [`Simctl`] runs remotely but is driven like a local process: configure
//! sinks, [`start`](Simctl::start), then [`wait`](Simctl::wait). Output
//! arrives as `simctlStream` messages carrying base64 `stdout`/`stderr`
//! chunks; the message carrying `exitCode` is the last one.
//!
//! # States
//!
//! ```text
//! idle ── start ──▶ started ──▶ (output)* ──▶ exited(code)
//!                      │                          ▲
//!                      ├── kill ──▶ terminate sent ┘
//!                      └── connection lost ──▶ failed
//! ```
//!
//! Completion happens at most once; sinks are shut down right before it
//! becomes visible, so pipes see EOF and buffers are complete once
//! [`wait`](Simctl::wait) returns.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Command, Request};

use super::client::ClientInner;
use super::output::{BoxedSink, OutputBuffer, OutputPipe, pipe};

// ============================================================================
// Completion
// ============================================================================

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    /// The remote side reported an exit code.
    Exited(i32),
    /// The connection ended before an exit code arrived.
    ConnectionClosed,
}

// ============================================================================
// CommandShared
// ============================================================================

#[derive(Default)]
struct Sinks {
    stdout: Option<BoxedSink>,
    stderr: Option<BoxedSink>,
}

/// Registry entry of a started command, shared with the client read loop.
pub(crate) struct CommandShared {
    id: RequestId,
    sinks: tokio::sync::Mutex<Sinks>,
    finishing: AtomicBool,
    /// Unblocks output writes when the connection is lost.
    abort: CancellationToken,
    done: watch::Sender<Option<Completion>>,
}

impl CommandShared {
    fn new(id: RequestId, stdout: Option<BoxedSink>, stderr: Option<BoxedSink>) -> Self {
        let (done, _) = watch::channel(None);
        Self {
            id,
            sinks: tokio::sync::Mutex::new(Sinks { stdout, stderr }),
            finishing: AtomicBool::new(false),
            abort: CancellationToken::new(),
            done,
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> &RequestId {
        &self.id
    }

    #[inline]
    fn is_finished(&self) -> bool {
        self.finishing.load(Ordering::Acquire)
    }

    #[inline]
    fn completion(&self) -> Option<Completion> {
        *self.done.borrow()
    }

    /// Writes one output chunk to the configured sinks.
    pub(crate) async fn deliver(&self, stdout: &[u8], stderr: &[u8]) {
        if stdout.is_empty() && stderr.is_empty() {
            return;
        }

        let mut sinks = tokio::select! {
            biased;
            _ = self.abort.cancelled() => return,
            sinks = self.sinks.lock() => sinks,
        };

        write_chunk(&mut sinks.stdout, stdout, &self.abort, &self.id, "stdout").await;
        write_chunk(&mut sinks.stderr, stderr, &self.abort, &self.id, "stderr").await;
    }

    /// Shuts down the sinks and publishes the completion. Runs once.
    pub(crate) async fn finish(&self, completion: Completion) {
        if self.finishing.swap(true, Ordering::AcqRel) {
            return;
        }

        if completion == Completion::ConnectionClosed {
            self.abort.cancel();
        }

        let sinks = std::mem::take(&mut *self.sinks.lock().await);
        for mut sink in [sinks.stdout, sinks.stderr].into_iter().flatten() {
            if let Err(e) = sink.shutdown().await {
                debug!(id = %self.id, error = %e, "Failed to shut down output sink");
            }
        }

        self.done.send_replace(Some(completion));
    }

    /// Waits until the command has completed.
    async fn completed(&self) -> Completion {
        let mut rx = self.done.subscribe();
        let completion = match rx.wait_for(Option::is_some).await {
            Ok(completion) => *completion,
            // The sender lives as long as `self`.
            Err(_) => None,
        };
        completion.unwrap_or(Completion::ConnectionClosed)
    }

    /// Asks the remote side to terminate the command.
    async fn terminate(&self, client: &ClientInner) -> Result<()> {
        if self.is_finished() {
            return Err(Error::command_state("command already finished"));
        }

        debug!(id = %self.id, "Sending simctl terminate");
        client
            .write(&Request::new(self.id.clone(), Command::SimctlTerminate))
            .await
    }
}

/// Writes `data` unless the sink is absent; a failing sink is dropped.
async fn write_chunk(
    slot: &mut Option<BoxedSink>,
    data: &[u8],
    abort: &CancellationToken,
    id: &RequestId,
    stream: &'static str,
) {
    if data.is_empty() {
        return;
    }
    let Some(sink) = slot.as_mut() else {
        return;
    };

    let result = tokio::select! {
        biased;
        _ = abort.cancelled() => return,
        result = sink.write_all(data) => result,
    };

    if let Err(e) = result {
        warn!(id = %id, stream, error = %e, "Output sink failed; discarding further output");
        *slot = None;
    }
}

// ============================================================================
// Simctl
// ============================================================================

/// A remote `simctl` invocation.
///
/// Created by [`Client::simctl`](super::Client::simctl).
///
/// # Example
///
/// ```no_run
/// # async fn example(client: &device_tunnel::ios::Client) -> device_tunnel::Result<()> {
/// let apps = client.simctl(["listapps", "booted"]).output().await?;
/// println!("{}", String::from_utf8_lossy(&apps));
///
/// let mut log = client.simctl(["spawn", "booted", "log", "stream"]);
/// log.set_stdout(tokio::io::stdout())?;
/// log.start().await?;
/// log.kill().await?;
/// let _ = log.wait().await;
/// # Ok(())
/// # }
/// ```
pub struct Simctl {
    client: Arc<ClientInner>,
    args: Vec<String>,
    /// Sinks configured before start; moved into the command on start.
    sinks: Mutex<Sinks>,
    cancel: Option<CancellationToken>,
    command: Option<Arc<CommandShared>>,
}

impl fmt::Debug for Simctl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simctl")
            .field("args", &self.args)
            .field("id", &self.id())
            .field("exit_code", &self.exit_code())
            .finish_non_exhaustive()
    }
}

impl Simctl {
    pub(crate) fn new(client: Arc<ClientInner>, args: Vec<String>) -> Self {
        Self {
            client,
            args,
            sinks: Mutex::new(Sinks::default()),
            cancel: None,
            command: None,
        }
    }

    /// Returns the arguments after `simctl`.
    #[inline]
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the command ID once started.
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        self.command.as_deref().map(CommandShared::id)
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Sends stdout to `writer`. Without a sink stdout is discarded.
    ///
    /// # Errors
    ///
    /// [`Error::CommandState`] if started or stdout is already set.
    pub fn set_stdout<W>(&mut self, writer: W) -> Result<()>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.ensure_idle()?;
        let sinks = self.sinks.get_mut();
        if sinks.stdout.is_some() {
            return Err(Error::command_state("stdout already set"));
        }
        sinks.stdout = Some(Box::new(writer));
        Ok(())
    }

    /// Sends stderr to `writer`. Without a sink stderr is discarded.
    ///
    /// # Errors
    ///
    /// [`Error::CommandState`] if started or stderr is already set.
    pub fn set_stderr<W>(&mut self, writer: W) -> Result<()>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.ensure_idle()?;
        let sinks = self.sinks.get_mut();
        if sinks.stderr.is_some() {
            return Err(Error::command_state("stderr already set"));
        }
        sinks.stderr = Some(Box::new(writer));
        Ok(())
    }

    /// Returns a pipe that yields stdout and reaches EOF at completion.
    ///
    /// The pipe is bounded: if it is not read, output delivery for every
    /// command on the client waits for it.
    ///
    /// # Errors
    ///
    /// [`Error::CommandState`] if started or stdout is already set.
    pub fn stdout_pipe(&mut self) -> Result<OutputPipe> {
        self.ensure_idle()?;
        let sinks = self.sinks.get_mut();
        if sinks.stdout.is_some() {
            return Err(Error::command_state("stdout already set"));
        }
        let (writer, reader) = pipe();
        sinks.stdout = Some(writer);
        Ok(reader)
    }

    /// Returns a pipe that yields stderr and reaches EOF at completion.
    ///
    /// # Errors
    ///
    /// [`Error::CommandState`] if started or stderr is already set.
    pub fn stderr_pipe(&mut self) -> Result<OutputPipe> {
        self.ensure_idle()?;
        let sinks = self.sinks.get_mut();
        if sinks.stderr.is_some() {
            return Err(Error::command_state("stderr already set"));
        }
        let (writer, reader) = pipe();
        sinks.stderr = Some(writer);
        Ok(reader)
    }

    /// Kills the command if `token` fires before it completes.
    ///
    /// # Errors
    ///
    /// [`Error::CommandState`] if already started.
    pub fn cancel_on(&mut self, token: CancellationToken) -> Result<()> {
        self.ensure_idle()?;
        self.cancel = Some(token);
        Ok(())
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.command.is_some() {
            return Err(Error::command_state("already started"));
        }
        Ok(())
    }

    fn started(&self) -> Result<&Arc<CommandShared>> {
        self.command
            .as_ref()
            .ok_or_else(|| Error::command_state("not started"))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Registers the command and sends the start request.
    ///
    /// Does not wait for any output. A failed start still counts as
    /// started; [`wait`](Self::wait) then reports the failure.
    ///
    /// # Errors
    ///
    /// - [`Error::CommandState`] if already started
    /// - [`Error::NotConnected`] if the client is closed
    /// - transport errors from writing the request
    pub async fn start(&mut self) -> Result<()> {
        self.ensure_idle()?;

        let id = self.client.next_id();
        let Sinks { stdout, stderr } = std::mem::take(self.sinks.get_mut());
        let command = Arc::new(CommandShared::new(id.clone(), stdout, stderr));
        self.command = Some(Arc::clone(&command));

        debug!(id = %id, args = ?self.args, "Starting simctl");

        let sent = match self.client.register_command(Arc::clone(&command)) {
            Ok(()) => {
                let request = Request::new(
                    id.clone(),
                    Command::Simctl {
                        args: self.args.clone(),
                    },
                );
                self.client.write(&request).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = sent {
            self.client.deregister_command(&id);
            command.finish(Completion::ConnectionClosed).await;
            return Err(e);
        }

        if let Some(token) = self.cancel.clone() {
            tokio::spawn(
                kill_on_cancel(Arc::clone(&self.client), command, token).instrument(Span::current()),
            );
        }

        Ok(())
    }

    /// Waits for completion.
    ///
    /// # Errors
    ///
    /// - [`Error::CommandState`] if not started
    /// - [`Error::CommandExit`] for a non-zero exit code
    /// - [`Error::ConnectionClosed`] if the connection ended first
    pub async fn wait(&self) -> Result<()> {
        match self.started()?.completed().await {
            Completion::Exited(0) => Ok(()),
            Completion::Exited(code) => Err(Error::CommandExit {
                code,
                output: Vec::new(),
            }),
            Completion::ConnectionClosed => Err(Error::ConnectionClosed),
        }
    }

    /// Starts and waits.
    ///
    /// # Errors
    ///
    /// See [`start`](Self::start) and [`wait`](Self::wait).
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        self.wait().await
    }

    /// Requests remote termination.
    ///
    /// The command still completes through its final exit-code message.
    ///
    /// # Errors
    ///
    /// [`Error::CommandState`] if not started or already finished.
    pub async fn kill(&self) -> Result<()> {
        self.started()?.terminate(&self.client).await
    }

    /// Returns the exit code once the command has exited.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self.command.as_ref()?.completion()? {
            Completion::Exited(code) => Some(code),
            Completion::ConnectionClosed => None,
        }
    }

    // ========================================================================
    // Capture
    // ========================================================================

    /// Runs and returns stdout.
    ///
    /// # Errors
    ///
    /// [`Error::CommandState`] if stdout is already set. A non-zero exit
    /// returns [`Error::CommandExit`] carrying the captured stdout; otherwise
    /// see [`run`](Self::run).
    pub async fn output(&mut self) -> Result<Vec<u8>> {
        let buffer = OutputBuffer::new();
        self.set_stdout(buffer.clone())?;
        let result = self.run().await;
        attach_output(result, buffer)
    }

    /// Runs and returns stdout and stderr interleaved in arrival order.
    ///
    /// # Errors
    ///
    /// [`Error::CommandState`] if stdout or stderr is already set. A
    /// non-zero exit returns [`Error::CommandExit`] carrying both streams;
    /// otherwise see [`run`](Self::run).
    pub async fn combined_output(&mut self) -> Result<Vec<u8>> {
        self.ensure_idle()?;
        let sinks = self.sinks.get_mut();
        if sinks.stdout.is_some() || sinks.stderr.is_some() {
            return Err(Error::command_state("stdout or stderr already set"));
        }

        let buffer = OutputBuffer::new();
        self.set_stdout(buffer.clone())?;
        self.set_stderr(buffer.clone())?;
        let result = self.run().await;
        attach_output(result, buffer)
    }
}

/// Returns the captured bytes, or hands them to a non-zero exit error.
fn attach_output(result: Result<()>, buffer: OutputBuffer) -> Result<Vec<u8>> {
    match result {
        Ok(()) => Ok(buffer.take()),
        Err(Error::CommandExit { code, .. }) => Err(Error::CommandExit {
            code,
            output: buffer.take(),
        }),
        Err(e) => Err(e),
    }
}

async fn kill_on_cancel(client: Arc<ClientInner>, command: Arc<CommandShared>, token: CancellationToken) {
    tokio::select! {
        _ = command.completed() => {}
        _ = token.cancelled() => {
            if let Err(e) = command.terminate(&client).await {
                debug!(id = %command.id(), error = %e, "Cancellation kill not sent");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
