use std::process::ExitCode;

use clap::Parser;
use redis_fs::client::StoreClient;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Clones every key under one prefix to another prefix in the same store.
#[derive(Parser, Debug)]
#[command(name = "redisfs-snapshot", version, about)]
struct Cli {
    /// Increase logging verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Store host.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Store port.
    #[arg(long, default_value_t = 6379)]
    port: u16,

    /// Source prefix to clone from.
    #[arg(long)]
    from: String,

    /// Destination prefix to clone to.
    #[arg(long)]
    to: String,
}

fn init_tracing(debug_level: u8) {
    let default_directive = if debug_level > 0 { "redis_fs=debug" } else { "redis_fs=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut client = match StoreClient::connect(&cli.host, cli.port) {
        Ok(client) => client,
        Err(err) => {
            error!(%err, host = %cli.host, port = cli.port, "failed to connect to store");
            return ExitCode::FAILURE;
        }
    };

    info!(from = %cli.from, to = %cli.to, "starting snapshot");
    match redis_fs::snapshot::clone_keys(&mut client, &cli.from, &cli.to) {
        Ok(copied) => {
            info!(copied, "snapshot finished");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "snapshot failed");
            ExitCode::FAILURE
        }
    }
}
