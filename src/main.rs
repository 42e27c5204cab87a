//! chatter-server: a line-oriented TCP chat server
//!
//! Features:
//! - Greetings, echo and a small set of slash commands
//! - Per-client message logs
//! - Idle clients are disconnected after a configurable silence period
//! - Configuration via CLI arguments or TOML file

mod client_log;
mod config;
mod connection;
mod protocol;
mod server;
mod watchdog;

use config::Config;
use server::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen_addr(),
        workers = ?config.workers,
        idle_timeout_secs = config.idle_timeout.as_secs(),
        log_dir = %config.log_dir.display(),
        "Starting chatter server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = match Server::bind(&config).await {
        Ok(server) => server,
        Err(e) => {
            error!(address = %config.listen_addr(), error = %e, "Error starting server");
            return Err(e.into());
        }
    };

    server.run().await?;
    Ok(())
}
