use std::net::SocketAddr;
use std::process::exit;

use clap::{ArgGroup, Parser};
use log::error;

use kvs::{KvsClient, LoadGenerator, LoadMode, Result, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "kvs-client", version, about = "Sends requests to a kvs-server")]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["operation", "get", "put", "both"])
))]
struct Cli {
    /// Server address or hostname, optionally with a port
    #[arg(short = 'a', long = "address", value_name = "ADDRESS")]
    address: String,

    /// Server port, used when the address has none
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Send a single operation, PUT:key:value or GET:key
    #[arg(short = 'o', long, value_name = "OPERATION")]
    operation: Option<String>,

    /// Number of sweeps for -g, -p and -b
    #[arg(short = 'i', long, default_value_t = 1, value_name = "COUNT")]
    iterations: usize,

    /// Repeatedly send GET operations
    #[arg(short = 'g', long)]
    get: bool,

    /// Repeatedly send PUT operations
    #[arg(short = 'p', long)]
    put: bool,

    /// Repeatedly send both PUT and GET operations from several threads
    #[arg(short = 'b', long)]
    both: bool,

    /// Threads used by -b, split between PUT and GET
    #[arg(short = 't', long, default_value_t = 10)]
    threads: usize,
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{}", e);
        exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let client = match cli.address.parse::<SocketAddr>() {
        Ok(addr) => KvsClient::new(addr)?,
        Err(_) => KvsClient::new((cli.address.as_str(), cli.port))?,
    };

    if let Some(operation) = cli.operation {
        println!("Operation: {operation}");
        println!("Result: {}", client.send_raw(&operation)?);
        return Ok(());
    }

    let mode = if cli.get {
        LoadMode::Get
    } else if cli.put {
        LoadMode::Put
    } else {
        LoadMode::Both
    };

    let summary = LoadGenerator::new(client)
        .iterations(cli.iterations)
        .threads(cli.threads)
        .run(mode)?;

    println!(
        "sent: {}, ok: {}, rejected: {}, errors: {}",
        summary.sent, summary.ok, summary.rejected, summary.errors
    );
    if summary.errors > 0 {
        exit(1);
    }
    Ok(())
}
