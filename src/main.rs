//! mini-edge CLI entry point.
//!
//! Loads the optional TOML configuration, seeds state from it and runs the
//! HTTP server.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use mini_edge_common::ConfigFile;
use mini_edge_server::{AppState, EdgeServer, ServerConfig};

/// Minimal edge worker platform.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "MINI_EDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind, overriding the configuration file.
    #[arg(short, long, env = "BIND_ADDR")]
    bind: Option<SocketAddr>,

    /// Webhook signing secret, overriding the configuration file.
    #[arg(long, env = "GITHUB_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,mini_edge=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!("Starting mini-edge");

    let (mut file, base_dir) = match &args.config {
        Some(path) => {
            let file = ConfigFile::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            let base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
            (file, base_dir)
        }
        None => (ConfigFile::default(), PathBuf::from(".")),
    };
    if args.webhook_secret.is_some() {
        file.webhook.github_secret = args.webhook_secret;
    }

    let mut server_config =
        ServerConfig::from_file(&file.server).context("Invalid [server] configuration")?;
    if let Some(bind) = args.bind {
        server_config = server_config.with_bind_addr(bind);
    }

    let state = AppState::from_config_file(&file, &base_dir)
        .await
        .context("Failed to initialize state")?;

    info!(
        bind_addr = %server_config.bind_addr,
        webhook = state.webhook_secret().is_some(),
        "Configuration loaded"
    );

    EdgeServer::new(state, server_config).run().await?;

    Ok(())
}
