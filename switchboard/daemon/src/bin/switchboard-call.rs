//! Switchboard Call - Demo RPC Client
//!
//! Sends one request to a switchboard server and prints the reply payload.
//!
//! ```bash
//! switchboard-call echo hello world
//! switchboard-call --address unix:/tmp/switchboard.sock words "one 'two three'"
//! switchboard-call --ca ./ca.pem --server-name localhost reverse abc
//! ```
//!
//! Exits non-zero when the server answers with a non-success status; the
//! canned error payload is printed to stderr.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncWriteExt;

use switchboard_core::{
    default_config_path, load_config_from_path, status, Client, ClientError, ConfigOverrides,
};

/// Send one request to a switchboard server
#[derive(Parser, Debug)]
#[command(name = "switchboard-call")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address: host:port, unix:PATH, or a socket path
    #[arg(short = 'a', long, value_name = "ADDR")]
    address: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "SWITCHBOARD_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Reply timeout in milliseconds (0 waits forever)
    #[arg(short = 't', long, value_name = "MS")]
    timeout_ms: Option<u32>,

    /// Shared authentication key file
    #[arg(short = 'k', long, value_name = "FILE")]
    key_file: Option<PathBuf>,

    /// CA certificate file; enables TLS
    #[arg(long, value_name = "FILE")]
    ca: Option<PathBuf>,

    /// Name expected on the server certificate
    #[arg(long, value_name = "NAME", requires = "ca")]
    server_name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "SWITCHBOARD_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Command name
    name: String,

    /// Payload words, joined with single spaces
    payload: Vec<String>,
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("switchboard_core={level}"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let mut overrides = ConfigOverrides::new();
    if let Some(address) = &args.address {
        overrides = overrides.with_address(address.as_str());
    }
    if let Some(ms) = args.timeout_ms {
        overrides = overrides.with_timeout_ms(i64::from(ms));
    }
    if let Some(path) = &args.key_file {
        overrides = overrides.with_key_file(path.clone());
    }

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = tokio::task::spawn_blocking(move || load_config_from_path(config_path))
        .await
        .context("Configuration loader panicked")?
        .context("Failed to load configuration")?;
    overrides.apply(&mut config);
    if args.ca.is_some() {
        config.client.tls_ca.clone_from(&args.ca);
        config.client.tls_server_name.clone_from(&args.server_name);
    }

    let client_config = config
        .client
        .build()
        .context("Invalid client configuration")?;
    let endpoint = client_config.endpoint.clone();

    let mut client = Client::connect(client_config)
        .await
        .with_context(|| format!("Failed to connect to {endpoint}"))?;

    let payload = args.payload.join(" ");
    let result = client.dispatch(&args.name, payload).await;

    let outcome = match result {
        Ok(response) => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&response.payload).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
            Ok(())
        }
        Err(ClientError::Status { status: code, payload }) => Err(anyhow::anyhow!(
            "{} ({code} {})",
            String::from_utf8_lossy(&payload),
            status::text(code)
        )),
        Err(e) => Err(anyhow::Error::new(e).context("Request failed")),
    };

    client.quit().await;
    outcome
}
