//! Switchboard Daemon - Demo RPC Server
//!
//! Serves a handful of demo commands over the switchboard transport so the
//! library can be exercised from a shell with `switchboard-call`.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (127.0.0.1:7878)
//! switchboard-daemon
//!
//! # Unix socket, one request per connection
//! switchboard-daemon --address unix:/tmp/switchboard.sock --timeout-ms -5000
//!
//! # With config file and a shared key
//! switchboard-daemon --config ./switchboard.toml --key-file ./switchboard.key
//!
//! # Create a key file and exit
//! switchboard-daemon --generate-key ./switchboard.key
//!
//! # Verbose logging
//! RUST_LOG=debug switchboard-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown (idle connections close,
//!   in-flight requests are answered)

mod server;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use switchboard_core::{
    default_config_path, load_config_from_path, AuthKey, ConfigOverrides, Server, Severity,
};

/// Switchboard Daemon - demo server for the switchboard RPC transport
#[derive(Parser, Debug)]
#[command(name = "switchboard-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Listening address: host:port, unix:PATH, or a socket path
    #[arg(short = 'a', long, value_name = "ADDR")]
    address: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "SWITCHBOARD_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Read timeout in milliseconds (0 none, negative one-shot)
    #[arg(short = 't', long, value_name = "MS", allow_hyphen_values = true)]
    timeout_ms: Option<i64>,

    /// Maximum request payload in bytes (0 unlimited)
    #[arg(long, value_name = "BYTES")]
    payload_limit: Option<u32>,

    /// Minimum notification severity (info, conn, error, fatal)
    #[arg(short = 'n', long, value_name = "LEVEL")]
    notify_level: Option<Severity>,

    /// Report peer addresses on connect
    #[arg(long)]
    log_peer: bool,

    /// Shared authentication key file
    #[arg(short = 'k', long, value_name = "FILE")]
    key_file: Option<PathBuf>,

    /// Write a new random key to FILE and exit
    #[arg(long, value_name = "FILE", conflicts_with = "key_file")]
    generate_key: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "SWITCHBOARD_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(address) = &self.address {
            overrides = overrides.with_address(address.as_str());
        }
        if let Some(ms) = self.timeout_ms {
            overrides = overrides.with_timeout_ms(ms);
        }
        if let Some(limit) = self.payload_limit {
            overrides = overrides.with_payload_limit(limit);
        }
        if let Some(level) = self.notify_level {
            overrides = overrides.with_notify_level(level);
        }
        if self.log_peer {
            overrides = overrides.with_log_peer(true);
        }
        if let Some(path) = &self.key_file {
            overrides = overrides.with_key_file(path.clone());
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "switchboard_daemon={level},switchboard_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Resolve once SIGTERM or SIGINT arrives
async fn shutdown_signal() -> Result<&'static str> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(name)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    if let Some(path) = &args.generate_key {
        let key = AuthKey::generate().context("Failed to generate key")?;
        key.write_to_file(path)
            .with_context(|| format!("Failed to write key file: {}", path.display()))?;
        info!(path = %path.display(), "Key file written");
        return Ok(());
    }

    info!("Switchboard daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config =
        load_config_from_path(config_path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    info!(
        source = ?config.source(),
        path = ?config.config_file_path,
        "Configuration loaded"
    );

    let server_config = config
        .server
        .build()
        .context("Invalid server configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let result = runtime.block_on(async move {
        let mut server = Server::bind(server_config)
            .await
            .context("Failed to start server")?;
        server::register_handlers(server.registry()).context("Failed to register handlers")?;

        let events = server
            .notifications()
            .context("Notification channel already taken")?;
        let reporter = tokio::spawn(server::report(events));

        let name = shutdown_signal().await?;
        info!("Received {name}, initiating shutdown");
        server.quit().await;

        match reporter.await {
            Ok(summary) => info!(%summary, "Session summary"),
            Err(e) => error!(error = %e, "Notification reporter failed"),
        }
        anyhow::Ok(())
    });

    match result {
        Ok(()) => {
            info!("Switchboard daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
