//! # wa-gateway
//!
//! Gateway server binary: HTTP/WebSocket surface over per-account sessions.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wa_gateway::config::{GatewayConfig, ReconnectPolicy};
use wa_gateway::store::FileStore;
use wa_gateway::transport::LoopbackNetwork;
use wa_gateway::types::AccountId;
use wa_gateway::Gateway;

#[derive(Parser, Debug)]
#[command(name = "wa-gateway", version, about = "WhatsApp gateway server")]
struct Cli {
    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP/WebSocket server.
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Directory holding one credential file per account.
    #[arg(long, env = "SESSION_PATH", default_value = "./sesi")]
    session_path: PathBuf,

    /// Account used when a request does not name one; started on boot.
    #[arg(long, env = "WA_ACCOUNT", default_value = "default")]
    account: String,

    #[arg(long, env = "WA_MAX_RECONNECT_ATTEMPTS", default_value_t = 5)]
    max_reconnect_attempts: u32,

    /// Base reconnect delay in seconds; doubles per attempt.
    #[arg(long, env = "WA_RECONNECT_DELAY", default_value_t = 3)]
    reconnect_delay: u64,

    /// Seconds a connect attempt may take before it is retried.
    #[arg(long, env = "WA_CONNECT_TIMEOUT", default_value_t = 20)]
    connect_timeout: u64,

    /// QR code lifetime in seconds.
    #[arg(long, env = "WA_QR_TTL", default_value_t = 60)]
    qr_ttl: u64,
}

impl ServeArgs {
    fn config(&self) -> GatewayConfig {
        let reconnect = ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            base_delay: Duration::from_secs(self.reconnect_delay),
            ..ReconnectPolicy::default()
        };
        GatewayConfig::default()
            .with_listen_addr(SocketAddr::new(self.host, self.port))
            .with_session_dir(self.session_path.clone())
            .with_default_account(self.account.clone())
            .with_reconnect(reconnect)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout))
            .with_qr_ttl(Duration::from_secs(self.qr_ttl))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Serve(args) => serve(args.config()).await,
    }
}

async fn serve(config: GatewayConfig) -> Result<()> {
    std::fs::create_dir_all(&config.session_dir)
        .with_context(|| format!("failed to create session directory {}", config.session_dir.display()))?;
    let account = AccountId::new(config.default_account.clone()).context("invalid default account")?;
    let listen_addr = config.listen_addr;

    let store = Arc::new(FileStore::new(config.session_dir.clone()));
    let gateway = Arc::new(Gateway::new(config, store, Arc::new(LoopbackNetwork::new())));
    gateway.start(&account).await?;

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
        tracing::info!("shutting down");
    };
    wa_gateway::server::serve(Arc::clone(&gateway), listener, shutdown).await?;
    gateway.shutdown().await;
    Ok(())
}
