//! streamup server binary

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use streamup_core::auth::PublicKey;
use streamup_core::MIN_PART_SIZE;
use streamup_engine::{Storage, StorageEngine};
use streamup_server::{Authenticator, StreamupServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "streamup-server", version, about = "Multipart object store over HTTP/2")]
struct Args {
    /// Data directory path
    #[arg(long, value_name = "PATH", default_value = "./data")]
    data_dir: PathBuf,

    /// Bind address
    #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Smallest accepted size for a non-final part, in bytes
    #[arg(long, value_name = "BYTES", default_value_t = MIN_PART_SIZE)]
    min_part_size: usize,

    /// Hex Ed25519 public key allowed to sign requests; repeatable.
    /// Without any, requests are accepted unsigned.
    #[arg(long = "authorized-key", value_name = "HEX")]
    authorized_keys: Vec<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting streamup server");
    info!("Data directory: {}", args.data_dir.display());

    if !args.data_dir.exists() {
        std::fs::create_dir_all(&args.data_dir)
            .with_context(|| format!("creating {}", args.data_dir.display()))?;
        info!("Created data directory: {}", args.data_dir.display());
    }

    let engine = StorageEngine::new(&args.data_dir)
        .context("failed to initialize storage engine")?
        .with_min_part_size(args.min_part_size);
    info!(min_part_size = engine.min_part_size(), "Storage engine initialized");

    let mut server = StreamupServer::new(Storage::new(engine));

    if !args.authorized_keys.is_empty() {
        let keys = args
            .authorized_keys
            .iter()
            .map(|k| PublicKey::from_hex(k).with_context(|| format!("invalid authorized key {}", k)))
            .collect::<anyhow::Result<Vec<_>>>()?;
        info!(keys = keys.len(), "Request signing required");
        server = server.with_authenticator(Authenticator::new(keys));
    }

    server
        .serve(args.bind)
        .await
        .with_context(|| format!("serving on {}", args.bind))
}
