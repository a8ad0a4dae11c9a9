mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use jobrelay::config::{Config, QueueBackend};
use jobrelay::observability::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Server(args) => jobrelay::api::server::run(config, args.address).await?,
        Commands::Worker => {
            if config.queue.backend != QueueBackend::Redis {
                return Err("the worker role requires queue.backend = \"redis\"".into());
            }
            info!(key = %config.queue.redis_key, "Starting worker");
            let cancel = jobrelay::shutdown::root_token();
            jobrelay::worker::run(config, cancel).await?;
        }
    }

    Ok(())
}
