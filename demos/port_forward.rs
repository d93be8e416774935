//! Forward a remote instance port to a local port.
//!
//! Demonstrates:
//! - Binding a multiplexed tunnel on a fixed or ephemeral local port
//! - Carrying any number of local connections over one WebSocket
//! - Closing the tunnel
//!
//! Usage:
//!   cargo run --example port_forward -- <ws-url> <remote-port> <token> [local-port]
//!   cargo run --example port_forward -- wss://host/port-forward 8100 $TOKEN 8282 --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use common::Args;
use device_tunnel::{MultiplexedTunnel, Result, TunnelOptions};
use url::Url;

// ============================================================================
// Constants
// ============================================================================

const USAGE: &str = "port_forward <ws-url> <remote-port> <token> [local-port]";

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    common::init_logging(args.debug);

    let url = Url::parse(&args.require(0, USAGE))?;
    let remote_port: u16 = args.require(1, USAGE).parse()?;
    let token = args.require(2, USAGE);
    let local_port = args.positional.get(3).map(|p| p.parse::<u16>()).transpose()?;

    run(&args, &url, remote_port, &token, local_port).await?;
    Ok(())
}

async fn run(
    args: &Args,
    url: &Url,
    remote_port: u16,
    token: &str,
    local_port: Option<u16>,
) -> Result<()> {
    println!("=== Port Forward ===\n");

    // ========================================================================
    // Bind
    // ========================================================================

    println!("[1] Binding local listener...");

    let mut options = TunnelOptions::new();
    if let Some(port) = local_port {
        options = options.with_local_port(port);
    }
    let tunnel = MultiplexedTunnel::new(url, remote_port, token, options).await?;

    println!("    ✓ Listening on {}\n", tunnel.addr());

    // ========================================================================
    // Start
    // ========================================================================

    println!("[2] Starting tunnel to remote port {remote_port}...");
    tunnel.start()?;
    println!("    ✓ Connect to {} to reach the instance\n", tunnel.addr());

    common::wait_for_exit(args.no_wait).await;

    println!(
        "\n[3] Closing tunnel ({} active connections)...",
        tunnel.session_count()
    );
    tunnel.close().await?;
    println!("    ✓ Closed");

    Ok(())
}
