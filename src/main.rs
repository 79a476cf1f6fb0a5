use anyhow::{Context as _, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use glowd::{config::DaemonConfig, rest, storage::Storage, AppContext};

#[derive(Parser)]
#[command(
    name = "glowd",
    about = "Glow Host — backend daemon for network-connected status display devices",
    version
)]
struct Args {
    /// Bind address for the REST server (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "GLOWD_BIND")]
    bind_address: Option<String>,

    /// REST server port
    #[arg(long, env = "GLOWD_PORT")]
    port: Option<u16>,

    /// Data directory for the SQLite database and config.toml
    #[arg(long, env = "GLOWD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// HS256 signing secret for bearer tokens (required here or in config.toml)
    #[arg(long, env = "GLOWD_TOKEN_SECRET", hide_env_values = true)]
    token_secret: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "GLOWD_LOG")]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(args.log.as_deref().unwrap_or("info"))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Fails closed when no signing secret is configured.
    let config = DaemonConfig::load(args.bind_address, args.port, args.data_dir, args.token_secret)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let storage = Storage::new(&config.data_dir)
        .await
        .context("failed to open storage")?;

    info!(
        data_dir = %config.data_dir.display(),
        release = %config.release.version,
        rollout = config.release.rollout_percent,
        "glowd starting"
    );

    let ctx = Arc::new(AppContext::new(config, storage));
    rest::serve(ctx).await
}
