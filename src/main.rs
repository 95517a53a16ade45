//! fetcher: merklefs object fetcher.
//!
//! Single binary:
//!   fetcher serve [--config <path>]              → run the object.Fetcher gRPC service
//!   fetcher fetch [--server <endpoint>] [key]    → ask a running service for one object
//!   fetcher config [--config <path>]             → print the effective configuration

mod client;
mod config;
mod endpoint;
mod logging;
mod proto;
mod server;
mod service;
mod transfer;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::logging::{LogFormat, LogLevel};
use crate::service::{FetchService, Fetcher};

// ─── Help text ────────────────────────────────────────────────────────────────

const AFTER_HELP: &str = "\
CONFIGURATION:
    The service reads a JSON file (default /etc/merklefs/config.json):

      {
        \"remote\":  \"http://origin.example/objects\",
        \"pool\":    \"/var/pool\",
        \"fetcher\": \"[::]:50051\"
      }

    remote    base address objects are fetched from (<remote>/<key>)
    pool      local directory objects are written to (<pool>/<key>)
    fetcher   listen address: host:port, [::]:port or unix:///path.sock
    transfer  optional command template, default
              [\"wget\", \"{source}\", \"-O\", \"{destination}\"]

ENVIRONMENT:
    MERKLEFS_CONFIG     Config file path when --config is not provided
    MERKLEFS_FETCHER    Server endpoint for `fetcher fetch`";

const SERVE_AFTER_HELP: &str = "\
EXAMPLES:
    fetcher serve
    fetcher serve --config ./config.json --workers 4 --log-level debug";

const FETCH_AFTER_HELP: &str = "\
EXAMPLES:
    fetcher fetch abc123
    fetcher fetch --server 127.0.0.1:50051 abc123";

// ─── CLI definition ───────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "fetcher",
    about = "fetcher: materialize merklefs objects into the local pool",
    after_help = AFTER_HELP,
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Fetcher service (foreground)
    #[command(after_help = SERVE_AFTER_HELP)]
    Serve {
        /// Path to the JSON config file
        #[arg(long, env = "MERKLEFS_CONFIG", default_value = config::DEFAULT_CONFIG_PATH)]
        config: String,
        /// Number of concurrent fetch workers
        #[arg(long, default_value_t = server::DEFAULT_WORKERS)]
        workers: usize,
        /// Log level
        #[arg(long, value_enum, ignore_case = true, default_value_t = LogLevel::Info)]
        log_level: LogLevel,
        /// Log format
        #[arg(long, value_enum, default_value_t = LogFormat::Text)]
        log_format: LogFormat,
    },

    /// Fetch one object through a running service; prints OK or BAD
    #[command(after_help = FETCH_AFTER_HELP)]
    Fetch {
        /// Service endpoint
        #[arg(long, env = "MERKLEFS_FETCHER", default_value = client::DEFAULT_SERVER)]
        server: String,
        /// Object key
        #[arg(default_value = "hello")]
        key: String,
    },

    /// Print the pool, remote and fetcher settings
    Config {
        /// Path to the JSON config file
        #[arg(long, env = "MERKLEFS_CONFIG", default_value = config::DEFAULT_CONFIG_PATH)]
        config: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// ─── Dispatch ─────────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            config,
            workers,
            log_level,
            log_format,
        } => run_serve(&config, workers, log_level, log_format),
        Commands::Fetch { server, key } => run_fetch(&server, &key),
        Commands::Config { config, json } => run_config(&config, json),
    }
}

// ─── Server mode ──────────────────────────────────────────────────────────────

fn run_serve(config_path: &str, workers: usize, log_level: LogLevel, log_format: LogFormat) -> ExitCode {
    if let Err(err) = serve(config_path, workers, log_level, log_format) {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn serve(config_path: &str, workers: usize, log_level: LogLevel, log_format: LogFormat) -> Result<()> {
    logging::init(log_level, log_format)?;

    if workers == 0 {
        bail!("--workers must be at least 1");
    }

    let config = Config::load(Path::new(config_path))?;
    let endpoint = Endpoint::parse(&config.fetcher)
        .with_context(|| format!("invalid \"fetcher\" address in {config_path}"))?;
    let transfer = config.command_transfer();
    tracing::info!(
        remote = %config.remote,
        pool = %config.pool,
        transfer = transfer.program(),
        workers,
        "starting fetcher"
    );

    let service = FetchService::new(config.service_config(), transfer)
        .with_context(|| format!("invalid config {config_path}"))?;
    let fetcher: Arc<dyn Fetcher> = Arc::new(service);

    // Fetches run on the blocking pool; its size is the worker count.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(workers)
        .build()
        .context("build tokio runtime")?;

    rt.block_on(server::run_serve(fetcher, &endpoint))
}

// ─── Client mode ──────────────────────────────────────────────────────────────

fn run_fetch(server_addr: &str, key: &str) -> ExitCode {
    if let Err(err) = logging::init(LogLevel::Warn, LogFormat::Text) {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    }

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("error: cannot build tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    let ok = rt.block_on(async {
        match client::FetcherClient::connect(server_addr).await {
            Ok(mut client) => match client.call_fetch(key).await {
                Ok(reply) => reply.ok,
                Err(err) => {
                    eprintln!("error: {err:#}");
                    false
                }
            },
            Err(err) => {
                eprintln!("error: {err:#}");
                false
            }
        }
    });

    if ok {
        println!("OK");
        ExitCode::SUCCESS
    } else {
        println!("BAD");
        ExitCode::FAILURE
    }
}

// ─── Config ───────────────────────────────────────────────────────────────────

fn run_config(config_path: &str, json: bool) -> ExitCode {
    let config = match Config::load(Path::new(config_path)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {:#}", anyhow::Error::from(err));
            return ExitCode::FAILURE;
        }
    };

    if json {
        match serde_json::to_string_pretty(&config) {
            Ok(text) => println!("{text}"),
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("pool: {}", config.pool);
        println!("remote: {}", config.remote);
        println!("fetcher: {}", config.fetcher);
    }
    ExitCode::SUCCESS
}
