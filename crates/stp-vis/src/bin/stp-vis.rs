//! STP Sandbox Server
//!
//! Usage: `stp-vis [port] [speed factor]`. The speed factor scales the hello
//! and re-election timers; `0.01` makes a full election take seconds.

use std::env;

use stp_vis::{SandboxConfig, SandboxServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stp_vis=info,stp_election=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = env::args().collect();
    let config = SandboxConfig::from_args(&args);
    config.election.validate()?;

    tracing::info!(
        port = config.port,
        speed_factor = config.election.speed_factor,
        hello = ?config.election.effective_hello(),
        reelection = ?config.election.effective_reelection(),
        "Starting STP sandbox"
    );

    let port = config.port;
    SandboxServer::new(config).serve(port).await?;
    Ok(())
}
