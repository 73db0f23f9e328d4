//! identd: An RFC 1413 identification protocol responder
//!
//! Answers `<local-port> , <remote-port>` queries with the name of the
//! local user owning the matching TCP connection, as recorded in the
//! kernel connection table.
//!
//! Features:
//! - One task per connection, one query per connection
//! - 60 second query deadline, silent close on transport failures
//! - Configuration via CLI arguments or TOML file

mod config;
mod conntable;
mod identity;
mod protocol;
mod server;

use config::Config;
use server::Server;
use tracing::info;
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
        listen = %config.listen,
        table = %config.table_path.display(),
        read_timeout_secs = config.read_timeout.as_secs(),
        workers = ?config.workers,
        "Starting identd"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    runtime.block_on(async move { Server::new(config).run().await })
}
