use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use redis_fs::config::{default_threads, Config, DEFAULT_PREFIX, PID_FILE};
use redis_fs::{FuseDaemon, RedisFs};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Mounts a filesystem whose state lives in a RESP key-value store.
#[derive(Parser, Debug)]
#[command(name = "redisfs-mount", version, about)]
struct Cli {
    /// Increase logging verbosity; repeat for more (-d, -dd).
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Skip ATIME updates on reads and MTIME updates on offset writes.
    #[arg(long)]
    fast: bool,

    /// Store host.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Store port.
    #[arg(long, default_value_t = 6379)]
    port: u16,

    /// Directory to mount the filesystem at.
    #[arg(long)]
    mount: PathBuf,

    /// Key prefix (1-9 characters).
    #[arg(long, default_value = DEFAULT_PREFIX)]
    prefix: String,

    /// Reject every write-side operation with EPERM.
    #[arg(long)]
    read_only: bool,

    /// Number of FUSE worker threads.
    #[arg(long, default_value_t = default_threads())]
    threads: usize,

    /// Allow other users to access the mount.
    #[arg(long)]
    allow_other: bool,
}

fn init_tracing(debug_level: u8) {
    let default_directive = match debug_level {
        0 => "redis_fs=info",
        1 => "redis_fs=debug",
        _ => "redis_fs=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn write_pid_file() -> std::io::Result<()> {
    let mut file = std::fs::File::create(PID_FILE)?;
    write!(file, "{}", std::process::id())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    if let Err(err) = Config::validate_prefix(&cli.prefix) {
        error!(%err, "invalid configuration");
        return ExitCode::FAILURE;
    }

    if unsafe { libc::geteuid() } != 0 {
        error!("redisfs-mount must be run as root");
        return ExitCode::FAILURE;
    }

    match std::fs::metadata(&cli.mount) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            error!(mount = ?cli.mount, "mount point is not a directory");
            return ExitCode::FAILURE;
        }
        Err(err) => {
            error!(mount = ?cli.mount, %err, "cannot stat mount point");
            return ExitCode::FAILURE;
        }
    }

    if let Err(err) = write_pid_file() {
        error!(%err, pid_file = PID_FILE, "failed to write PID file");
        return ExitCode::FAILURE;
    }

    let config = Config {
        host: cli.host.clone(),
        port: cli.port,
        prefix: cli.prefix.clone(),
        mountpoint: cli.mount.clone(),
        fast: cli.fast,
        read_only: cli.read_only,
        debug_level: cli.debug,
        threads: cli.threads,
        allow_other: cli.allow_other,
    };

    let client = match redis_fs::client::StoreClient::connect(&config.host, config.port) {
        Ok(client) => client,
        Err(err) => {
            error!(%err, host = %config.host, port = config.port, "failed to connect to store");
            return ExitCode::FAILURE;
        }
    };

    info!(
        host = %config.host,
        port = config.port,
        prefix = %config.prefix,
        mount = ?config.mountpoint,
        fast = config.fast,
        read_only = config.read_only,
        threads = config.threads,
        "mounting redisfs"
    );

    let fs = RedisFs::new(config.clone(), client);

    let daemon = match FuseDaemon::new(fs, &config.mountpoint, config.threads, config.allow_other) {
        Ok(daemon) => daemon,
        Err(err) => {
            error!(%err, "failed to start FUSE daemon");
            return ExitCode::FAILURE;
        }
    };

    let unmount_daemon = daemon.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        info!("received interrupt, unmounting");
        if let Err(err) = unmount_daemon.unmount() {
            error!(%err, "error unmounting on interrupt");
        }
    }) {
        error!(%err, "failed to install signal handler");
    }

    daemon.wait();
    ExitCode::SUCCESS
}
