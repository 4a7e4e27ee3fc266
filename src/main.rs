//! Punch Arena Server
//!
//! Hosts a session: allocates a relay, prints the join code, and runs the
//! authoritative WebSocket server until interrupted.

use anyhow::Context;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use punch_arena::network::relay::{host_session, LocalRelayAllocator};
use punch_arena::network::server::{GameServer, ServerConfig};
use punch_arena::{TICK_RATE, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Punch Arena Server v{}", VERSION);
    info!("Client Sampling Rate: {} Hz", TICK_RATE);

    let config = ServerConfig::default();
    info!("Bind Address: {}", config.bind_addr);
    info!("Max Connections: {}", config.max_connections);

    // Allocation failure aborts the hosting attempt outright.
    let allocator = LocalRelayAllocator::new(config.bind_addr);
    let allocation = host_session(&allocator, config.max_connections)
        .context("Failed to allocate relay")?;
    info!("Join Code: {}", allocation.join_code);

    let server = GameServer::new(config);
    server.run().await.context("Server error")?;

    Ok(())
}
