//! keyline server binary.
//!
//! # Usage
//!
//! ```bash
//! # Self-signed certificate, in-memory storage (development)
//! keyline-server --bind 127.0.0.1:4433
//!
//! # TLS certificate and durable storage
//! keyline-server --bind 0.0.0.0:4433 --cert cert.pem --key key.pem --database keyline.redb
//! ```

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use keyline_crypto::PasswordParams;
use keyline_server::{
    DriverConfig, MemoryStorage, RedbStorage, Server, ServerRuntimeConfig, Storage,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// keyline authentication and mailbox server
#[derive(Parser, Debug)]
#[command(name = "keyline-server")]
#[command(about = "keyline authentication and encrypted mailbox server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<PathBuf>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<PathBuf>,

    /// Redb database file (in-memory storage if omitted)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Certificate-login challenge lifetime in seconds
    #[arg(long, default_value = "5")]
    challenge_ttl: u64,

    /// Session lifetime in minutes
    #[arg(long, default_value = "60")]
    session_ttl: u64,

    /// Argon2 memory cost in KiB
    #[arg(long, default_value = "32768")]
    argon2_memory: u32,

    /// Argon2 passes
    #[arg(long, default_value = "3")]
    argon2_iterations: u32,

    /// Argon2 lanes
    #[arg(long, default_value = "4")]
    argon2_parallelism: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("keyline server starting");
    tracing::info!("Binding to {}", args.bind);

    if args.cert.is_none() || args.key.is_none() {
        tracing::warn!("No TLS certificate provided - using self-signed certificate");
        tracing::warn!("This is NOT suitable for production use!");
    }

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        database_path: args.database,
        driver: DriverConfig {
            challenge_lifetime: Duration::from_secs(args.challenge_ttl),
            session_lifetime: Duration::from_secs(args.session_ttl * 60),
            password_params: PasswordParams {
                memory_kib: args.argon2_memory,
                iterations: args.argon2_iterations,
                parallelism: args.argon2_parallelism,
            },
            ..Default::default()
        },
        ..Default::default()
    };

    match config.database_path.clone() {
        Some(path) => {
            tracing::info!("Using redb storage at {}", path.display());
            serve(config, RedbStorage::open(path)?).await
        },
        None => {
            tracing::warn!("No database given - accounts and mailboxes are lost on restart");
            serve(config, MemoryStorage::new()).await
        },
    }
}

async fn serve<S: Storage>(
    config: ServerRuntimeConfig,
    storage: S,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::bind(config, storage)?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
