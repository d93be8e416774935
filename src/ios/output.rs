//! Destinations for streaming command output.
//!
//! Output arrives as network messages, so both sink types are in-memory:
//!
//! | Type | Use |
//! |------|-----|
//! | [`OutputBuffer`] | collect everything, read after completion |
//! | [`OutputPipe`] | read while the command runs; EOF at completion |

// ============================================================================
// Imports
// ============================================================================

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

// ============================================================================
// Constants
// ============================================================================

/// Bytes a pipe buffers before output delivery waits for the reader.
pub const PIPE_CAPACITY: usize = 64 * 1024;

// ============================================================================
// Types
// ============================================================================

/// Type-erased output sink.
pub(crate) type BoxedSink = Box<dyn AsyncWrite + Send + Unpin>;

// ============================================================================
// OutputBuffer
// ============================================================================

/// Growable in-memory sink.
///
/// Clones share the same buffer, so one buffer can back both stdout and
/// stderr.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    data: Arc<Mutex<Vec<u8>>>,
}

impl OutputBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the buffered bytes.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Takes the buffered bytes, leaving the buffer empty.
    #[must_use]
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.data.lock())
    }

    /// Returns the number of buffered bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Returns `true` if nothing has been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

impl AsyncWrite for OutputBuffer {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.data.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

// ============================================================================
// OutputPipe
// ============================================================================

/// Read end of a bounded in-memory pipe.
///
/// Returns EOF once the command finishes, fails, or the connection closes.
#[derive(Debug)]
pub struct OutputPipe {
    reader: DuplexStream,
}

impl AsyncRead for OutputPipe {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

/// Creates a pipe; the writer half becomes a command sink.
pub(crate) fn pipe() -> (BoxedSink, OutputPipe) {
    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    (Box::new(writer), OutputPipe { reader })
}

// ============================================================================
// Tests
// ============================================================================
