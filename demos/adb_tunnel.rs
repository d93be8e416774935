//! Connect a remote Android instance to the local adb server.
//!
//! Demonstrates:
//! - Starting a single-stream tunnel
//! - Registering it with `adb connect`
//!
//! Usage:
//!   cargo run --example adb_tunnel -- <ws-url> <token>
//!   cargo run --example adb_tunnel -- wss://host/adb $TOKEN --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use common::Args;
use device_tunnel::{AdbOptions, AdbTunnel, Result};
use url::Url;

// ============================================================================
// Constants
// ============================================================================

const USAGE: &str = "adb_tunnel <ws-url> <token>";

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    common::init_logging(args.debug);

    let url = Url::parse(&args.require(0, USAGE))?;
    let token = args.require(1, USAGE);

    run(&args, &url, &token).await?;
    Ok(())
}

async fn run(args: &Args, url: &Url, token: &str) -> Result<()> {
    println!("=== adb Tunnel ===\n");

    println!("[1] Binding local listener...");
    let tunnel = AdbTunnel::new(url, token, AdbOptions::new()).await?;
    println!("    ✓ Listening on {}\n", tunnel.addr());

    println!("[2] Starting tunnel and running adb connect...");
    if let Err(e) = tunnel.start().await {
        // The tunnel keeps running; adb can still be pointed at it by hand.
        println!("    ✗ {e}");
        println!("    Run `adb connect {}` manually\n", tunnel.addr());
    } else {
        println!("    ✓ Device visible in `adb devices` as {}\n", tunnel.addr());
    }

    common::wait_for_exit(args.no_wait).await;

    println!("\n[3] Closing tunnel...");
    tunnel.close().await?;
    println!("    ✓ Closed");

    Ok(())
}
