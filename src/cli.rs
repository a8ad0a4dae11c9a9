use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "jobrelay")]
#[command(about = "Job relay between clients and a remote processing peer", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP/WebSocket server (and the worker pool with the local queue)
    Server(ServerArgs),
    /// Run a worker consuming the Redis job queue
    Worker,
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to (overrides server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_address() {
        let cli = Cli::try_parse_from(["jobrelay", "server", "--address", "127.0.0.1:9000"]).unwrap();
        match cli.command {
            Commands::Server(args) => {
                assert_eq!(args.address, Some("127.0.0.1:9000".parse().unwrap()))
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_worker() {
        let cli = Cli::try_parse_from(["jobrelay", "worker"]).unwrap();
        assert!(matches!(cli.command, Commands::Worker));
    }
}
