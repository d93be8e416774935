//! Drive an iOS simulator instance.
//!
//! Demonstrates:
//! - Connecting the signaling client
//! - Typed actions (screenshot, tap, list apps)
//! - Streaming `simctl` output through a pipe
//! - Killing a command with a cancellation token
//!
//! Usage:
//!   cargo run --example ios_client -- <api-url> <token>
//!   cargo run --example ios_client -- https://host $TOKEN --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use common::Args;
use device_tunnel::ios::{Client, ClientOptions};
use device_tunnel::{Error, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

const USAGE: &str = "ios_client <api-url> <token>";

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    common::init_logging(args.debug);

    let api_url = args.require(0, USAGE);
    let token = args.require(1, USAGE);

    run(&api_url, &token).await?;
    Ok(())
}

async fn run(api_url: &str, token: &str) -> Result<()> {
    println!("=== iOS Client ===\n");

    // ========================================================================
    // Connect
    // ========================================================================

    println!("[1] Connecting...");
    let options = ClientOptions::new().with_request_timeout(Duration::from_secs(30));
    let client = Client::connect(api_url, token, options).await?;
    println!("    ✓ Connected\n");

    // ========================================================================
    // Actions
    // ========================================================================

    println!("[2] Taking screenshot...");
    let shot = client.screenshot().await?;
    println!(
        "    ✓ {}x{} ({} base64 bytes)\n",
        shot.width,
        shot.height,
        shot.base64.len()
    );

    println!("[3] Listing apps...");
    for app in client.list_apps().await?.iter().take(5) {
        println!("    {} ({})", app.bundle_id, app.name);
    }
    println!();

    // ========================================================================
    // Streaming Command
    // ========================================================================

    println!("[4] Streaming system log for 3 seconds...");
    let cancel = CancellationToken::new();
    let mut log = client.simctl(["spawn", "booted", "log", "stream"]);
    let stdout = log.stdout_pipe()?;
    log.cancel_on(cancel.clone())?;
    log.start().await?;

    let printer = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        let mut count = 0usize;
        while let Ok(Some(line)) = lines.next_line().await {
            if count < 5 {
                println!("    {line}");
            }
            count += 1;
        }
        count
    });

    tokio::time::sleep(Duration::from_secs(3)).await;
    cancel.cancel();

    match log.wait().await {
        Ok(()) | Err(Error::CommandExit { .. }) => {}
        Err(e) => return Err(e),
    }
    let lines = printer.await.unwrap_or_default();
    println!("    ✓ {lines} lines, exit code {:?}\n", log.exit_code());

    println!("[5] Closing...");
    client.close().await?;
    println!("    ✓ Closed");

    Ok(())
}
