use std::net::IpAddr;
use std::path::PathBuf;
use std::process::exit;
use std::thread;

use clap::Parser;
use crossbeam::channel;
use crossbeam::select;
use log::{error, info};

use kvs::{
    KvError, KvsServer, OpenMode, ReadPolicy, Result, ServerConfig, ShutdownMode, SledKvsEngine,
    StatsSnapshot,
};

#[derive(Parser)]
#[command(name = "kvs-server", version, about = "A multi-threaded key-value server")]
struct Cli {
    /// JSON configuration file; flags below override its fields
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Interface to listen on
    #[arg(long, value_name = "IP")]
    host: Option<IpAddr>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Slots in the accepted-connection queue (at least 2)
    #[arg(long, value_name = "SLOTS")]
    queue_capacity: Option<usize>,

    /// Number of worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Path of the on-disk store
    #[arg(long, value_name = "PATH")]
    store: Option<PathBuf>,

    /// How to open the store
    #[arg(long, value_enum)]
    open_mode: Option<OpenMode>,

    /// Maximum key length in bytes
    #[arg(long, value_name = "BYTES")]
    key_max: Option<usize>,

    /// Maximum value length in bytes
    #[arg(long, value_name = "BYTES")]
    value_max: Option<usize>,

    /// Whether reads wait for in-flight writes
    #[arg(long, value_enum)]
    read_policy: Option<ReadPolicy>,

    /// What to do with pending connections on shutdown
    #[arg(long, value_enum)]
    shutdown: Option<ShutdownMode>,

    /// Upper bound on the drain phase in milliseconds
    #[arg(long, value_name = "MS")]
    drain_timeout_ms: Option<u64>,
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(snapshot) => println!("{snapshot}"),
        Err(e) => {
            error!("{}", e);
            exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<StatsSnapshot> {
    let config = resolve_config(cli)?;
    config.validate()?;

    info!("kvs-server {}", env!("CARGO_PKG_VERSION"));
    info!("Process id: {}", std::process::id());
    info!("Store: {} ({:?})", config.store_path.display(), config.open_mode);

    let engine = SledKvsEngine::open(&config.store_path, config.engine_options())?;
    let server = KvsServer::bind(config, engine)?;
    info!("Listening on {}", server.local_addr()?);
    let handle = server.shutdown_handle();

    // The signal handler only forwards; shutdown work happens on this thread.
    let (signal_tx, signal_rx) = channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = signal_tx.try_send(());
    })
    .map_err(|e| KvError::StringError(format!("failed to install signal handler: {e}")))?;

    let (done_tx, done_rx) = channel::bounded(1);
    let acceptor = thread::Builder::new()
        .name("kv-acceptor".to_owned())
        .spawn(move || {
            let _ = done_tx.send(server.run());
        })?;

    let outcome = select! {
        recv(signal_rx) -> _ => {
            info!("Termination requested, shutting down");
            handle.shutdown();
            done_rx.recv()
        }
        recv(done_rx) -> outcome => outcome,
    };
    if acceptor.join().is_err() {
        error!("Acceptor thread panicked");
    }

    outcome.map_err(|_| KvError::StringError("acceptor thread exited unexpectedly".to_owned()))?
}

/// Builds the configuration from the optional file, then applies flags.
fn resolve_config(cli: Cli) -> Result<ServerConfig> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };

    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(capacity) = cli.queue_capacity {
        config.queue_capacity = capacity;
    }
    if let Some(workers) = cli.workers {
        config.worker_count = workers;
    }
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    if let Some(mode) = cli.open_mode {
        config.open_mode = mode;
    }
    if let Some(key_max) = cli.key_max {
        config.key_max = key_max;
    }
    if let Some(value_max) = cli.value_max {
        config.value_max = value_max;
    }
    if let Some(policy) = cli.read_policy {
        config.read_policy = policy;
    }
    if let Some(mode) = cli.shutdown {
        config.shutdown_mode = mode;
    }
    if let Some(ms) = cli.drain_timeout_ms {
        config.drain_timeout_ms = ms;
    }

    Ok(config)
}
