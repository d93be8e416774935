//! Single-stream tunnel registered with the local adb server.
//!
//! [`AdbTunnel::start`] starts a [`StreamTunnel`] and then runs
//! `adb connect 127.0.0.1:<port>` so the remote Android instance shows up in
//! `adb devices`. adb opens exactly one connection to the endpoint, which is
//! why no multiplexing is needed.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};

use super::options::AdbOptions;
use super::stream::StreamTunnel;

// ============================================================================
// AdbTunnel
// ============================================================================

/// Tunnel to a remote Android instance's adb daemon.
///
/// # Example
///
/// ```no_run
/// use device_tunnel::tunnel::{AdbOptions, AdbTunnel};
/// use url::Url;
///
/// # async fn example() -> device_tunnel::Result<()> {
/// let remote = Url::parse("wss://instance.example.com/adb").unwrap();
/// let tunnel = AdbTunnel::new(&remote, "token", AdbOptions::new()).await?;
/// tunnel.start().await?;
/// println!("adb device available at {}", tunnel.addr());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AdbTunnel {
    tunnel: StreamTunnel,
    adb_path: PathBuf,
}

impl AdbTunnel {
    /// Binds the local listener. Does not dial yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the local listener cannot be bound.
    pub async fn new(remote_url: &Url, token: impl Into<String>, options: AdbOptions) -> Result<Self> {
        let tunnel = StreamTunnel::new(remote_url, token, options.tunnel).await?;
        Ok(Self {
            tunnel,
            adb_path: options.adb_path,
        })
    }

    /// Starts the tunnel and registers it with adb.
    ///
    /// The tunnel keeps running in the background even if the adb
    /// invocation fails.
    ///
    /// # Errors
    ///
    /// - Errors of [`StreamTunnel::start`]
    /// - [`Error::AdbConnect`] if adb cannot be run or reports failure
    pub async fn start(&self) -> Result<()> {
        self.tunnel.start()?;
        adb_connect(&self.adb_path, &self.addr()).await?;
        info!(addr = %self.addr(), "Registered tunnel with adb");
        Ok(())
    }

    /// Returns the `host:port` adb connects to.
    #[inline]
    #[must_use]
    pub fn addr(&self) -> String {
        self.tunnel.addr()
    }

    /// Returns the underlying tunnel.
    #[inline]
    #[must_use]
    pub fn tunnel(&self) -> &StreamTunnel {
        &self.tunnel
    }

    /// Closes the tunnel. Idempotent.
    ///
    /// # Errors
    ///
    /// See [`StreamTunnel::close`].
    pub async fn close(&self) -> Result<()> {
        self.tunnel.close().await
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Runs `<adb> connect <addr>`.
async fn adb_connect(adb_path: &Path, addr: &str) -> Result<()> {
    debug!(adb = %adb_path.display(), %addr, "Running adb connect");

    let output = Command::new(adb_path)
        .arg("connect")
        .arg(addr)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::adb_connect(format!("failed to run {}: {e}", adb_path.display())))?;

    if !output.status.success() {
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(Error::adb_connect(format!(
            "{} {}",
            output.status,
            combined.trim()
        )));
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_adb_binary() {
        let err = adb_connect(Path::new("/nonexistent/adb-binary"), "127.0.0.1:5555")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AdbConnect { .. }));
        assert!(err.to_string().contains("/nonexistent/adb-binary"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_adb_reports_status() {
        let err = adb_connect(Path::new("false"), "127.0.0.1:5555")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AdbConnect { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_keeps_tunnel_running_when_adb_fails() {
        let url = Url::parse("ws://127.0.0.1:1/adb").expect("url");
        let options = AdbOptions::new().with_adb_path("/nonexistent/adb-binary");
        let tunnel = AdbTunnel::new(&url, "token", options).await.expect("bind");

        assert!(tunnel.start().await.is_err());
        assert!(!tunnel.tunnel().is_closed());
        tunnel.close().await.expect("close");
    }
}
