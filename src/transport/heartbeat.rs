//! Keepalive pings on the duplex connection.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::SharedSink;

// ============================================================================
// PingFailure
// ============================================================================

/// What the heartbeat does when a ping cannot be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingFailure {
    /// Log and keep going; the read loop surfaces the real failure.
    Log,
    /// Cancel the owning component.
    Cancel,
}

// ============================================================================
// Heartbeat Loop
// ============================================================================

/// Pings every `period` until `cancel` fires.
pub async fn run(
    sink: SharedSink,
    period: Duration,
    cancel: CancellationToken,
    on_failure: PingFailure,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = sink.ping().await {
                    warn!(error = %e, "Heartbeat ping failed");
                    if on_failure == PingFailure::Cancel {
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
    }

    debug!("Heartbeat stopped");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::StreamExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{WebSocketStream, accept_async};
    use url::Url;

    use crate::transport::{WsReader, dial, split};

    const PERIOD: Duration = Duration::from_millis(20);
    const WAIT: Duration = Duration::from_secs(5);

    /// Dials a loopback server and returns both ends.
    async fn connected() -> (SharedSink, WsReader, WebSocketStream<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            accept_async(stream).await.expect("handshake")
        });

        let url = Url::parse(&format!("ws://{addr}/")).expect("url");
        let (sink, reader) = split(dial(&url, None).await.expect("dial"));
        (sink, reader, server.await.expect("server task"))
    }

    #[tokio::test]
    async fn test_pings_every_period() {
        let (sink, _reader, mut server) = connected().await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(sink, PERIOD, cancel.clone(), PingFailure::Log));

        for _ in 0..2 {
            let message = tokio::time::timeout(WAIT, server.next())
                .await
                .expect("no ping")
                .expect("stream ended")
                .expect("read");
            assert!(matches!(message, Message::Ping(_)));
        }

        cancel.cancel();
        tokio::time::timeout(WAIT, task)
            .await
            .expect("heartbeat did not stop")
            .expect("heartbeat task");
    }

    #[tokio::test]
    async fn test_log_mode_survives_failed_pings() {
        let (sink, _reader, _server) = connected().await;
        sink.close().await.expect("close");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(sink, PERIOD, cancel.clone(), PingFailure::Log));

        tokio::time::sleep(PERIOD * 5).await;
        assert!(!cancel.is_cancelled());
        assert!(!task.is_finished());

        cancel.cancel();
        tokio::time::timeout(WAIT, task)
            .await
            .expect("heartbeat did not stop")
            .expect("heartbeat task");
    }

    #[tokio::test]
    async fn test_cancel_mode_cancels_owner_on_failed_ping() {
        let (sink, _reader, _server) = connected().await;
        sink.close().await.expect("close");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(sink, PERIOD, cancel.clone(), PingFailure::Cancel));

        tokio::time::timeout(WAIT, cancel.cancelled())
            .await
            .expect("owner was not cancelled");
        tokio::time::timeout(WAIT, task)
            .await
            .expect("heartbeat did not stop")
            .expect("heartbeat task");
    }

    #[tokio::test]
    async fn test_stops_before_first_tick_when_cancelled() {
        let (sink, _reader, _server) = connected().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(WAIT, run(sink, Duration::from_secs(3600), cancel, PingFailure::Log))
            .await
            .expect("heartbeat did not stop");
    }
}
