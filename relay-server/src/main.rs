//! # Chat Relay Server
//!
//! Serve chat sessions over TCP and chat refreshes over UDP.
//!
//! ## Design Principles
//!
//! 1. **Single Responsibility**: Framing, sessions and the lifecycle live in
//!    separate modules of the library crate.
//! 2. **Async First**: Tokio runs one task per connection and per datagram.
//! 3. **Fail-Open Defaults**: Protocol errors are localized to the connection.
//! 4. **Fail-Fast Startup**: Bind or store failures exit with an error.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use relay_server::telemetry::init_tracing;
use relay_server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();
    init_tracing(config.log_file.as_deref()).context("failed to open log file")?;

    let store = config.open_store();
    let server = Server::new(config, store);

    match server.run_until_ctrl_c().await {
        Ok(addrs) => {
            info!(stream = %addrs.stream, datagram = %addrs.datagram, "relay exited");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, category = ?err.category(), "relay failed to start");
            Err(err.into())
        }
    }
}
