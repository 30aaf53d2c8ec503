//! ctlog-s3 - command line access to a log's object storage
//!
//! Runs single backend operations against the configured bucket, with the
//! same prefixing, compression and hedging the log itself uses.

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use ctlog_s3::{Backend, Config, S3Backend, UploadOptions};
use prometheus::{Encoder, Registry, TextEncoder};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// ctlog-s3 - Hedged S3 backend for CT logs
#[derive(Parser, Debug)]
#[command(name = "ctlog-s3")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Print collected metrics in Prometheus text format when done
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file
    Put {
        key: String,
        file: PathBuf,
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        compress: bool,
        #[arg(long)]
        immutable: bool,
    },
    /// Download an object to stdout or a file
    Get {
        key: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List keys under a prefix
    Ls {
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Copy an object
    Cp { from: String, to: String },
    /// Delete an object
    Rm { key: String },
}

fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))
}

async fn run(backend: &S3Backend, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Put {
            key,
            file,
            content_type,
            compress,
            immutable,
        } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {:?}", file))?;
            let mut opts = UploadOptions::new().compress(compress).immutable(immutable);
            opts.content_type = content_type;
            backend.upload(&key, Bytes::from(data), &opts).await?;
            info!(key = %key, "uploaded");
        }
        Command::Get { key, output } => {
            let data = backend.fetch(&key).await?;
            match output {
                Some(path) => tokio::fs::write(&path, &data)
                    .await
                    .with_context(|| format!("failed to write {:?}", path))?,
                None => std::io::stdout().lock().write_all(&data)?,
            }
        }
        Command::Ls { prefix } => {
            let mut stdout = std::io::stdout().lock();
            for key in backend.list(&prefix).await? {
                writeln!(stdout, "{}", key)?;
            }
        }
        Command::Cp { from, to } => {
            backend.copy(&from, &to).await?;
            info!(from = %from, to = %to, "copied");
        }
        Command::Rm { key } => {
            backend.delete(&key).await?;
            info!(key = %key, "deleted");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load {:?}", args.config))?;

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, args.json_logs || config.logging.json)?;

    info!(
        "Starting ctlog-s3 v{} against bucket {}",
        ctlog_s3::VERSION,
        config.s3.bucket
    );

    let backend = S3Backend::new(&config.s3).await?;
    let registry = Registry::new();
    for collector in backend.metrics() {
        registry.register(collector)?;
    }

    run(&backend, args.command).await?;

    if args.metrics {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buf)?;
        std::io::stderr().write_all(&buf)?;
    }

    Ok(())
}
