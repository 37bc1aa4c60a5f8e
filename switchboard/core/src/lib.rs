//! Switchboard Core - Embeddable RPC Transport
//!
//! Exposes named command handlers over a Unix-domain, TCP, or TLS socket,
//! and provides the matching client. There is no daemon and no schema
//! compiler: a socket, a dispatch table, and a binary wire protocol.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── Server ─────────────────────────────┐
//! │                                                                 │
//! │  Listener/Acceptor ──spawn──► Connection task (one per client)  │
//! │         │                        │                              │
//! │         │                        ├─ frame::read_frame           │
//! │         │                        ├─ Registry lookup ─► Handler  │
//! │         │                        └─ frame::write_frame          │
//! │         │                        │                              │
//! │         └────────► Notifier ◄────┘  (severity filtered)         │
//! │                       │                                         │
//! └───────────────────────┼─────────────────────────────────────────┘
//!                         ▼
//!               host application (mpsc::Receiver<Msg>)
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use switchboard_core::{
//!     ArgMode, Args, Client, ClientConfig, Endpoint, HandlerError, Reply, Server, ServerConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let endpoint: Endpoint = "127.0.0.1:0".parse().map_err(anyhow::Error::msg)?;
//!     let mut server = Server::bind(ServerConfig::new(endpoint)).await?;
//!     server.register("echo", ArgMode::Whole, |args: Args| async move {
//!         Ok::<_, HandlerError>(Reply::ok(args.into_payload()))
//!     })?;
//!     let mut events = server.notifications().unwrap();
//!
//!     let mut client = Client::connect(ClientConfig::new(server.local_addr().endpoint())).await?;
//!     let reply = client.dispatch("echo", "it works!").await?;
//!     assert_eq!(reply.payload, b"it works!");
//!     client.quit().await;
//!
//!     server.quit().await;
//!     while let Some(msg) = events.recv().await {
//!         println!("{msg}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`status`]: Status codes, severities and canned replies
//! - [`frame`]: Wire codec
//! - [`auth`]: Shared-key payload tags
//! - [`dispatch`]: Handler registry
//! - [`tokenize`]: Payload word splitting
//! - [`notify`]: Notification channel
//! - [`server`]: Listener, connection state machine, shutdown
//! - [`client`]: Client connection
//! - [`config`]: TOML/environment configuration
//! - [`transport`], [`tls`]: Streams and TLS material

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod frame;
pub mod notify;
pub mod server;
pub mod status;
pub mod tls;
pub mod tokenize;
pub mod transport;

pub use auth::{AuthError, AuthKey};
pub use client::{Client, ClientError, Response, SENTINEL};
pub use config::{
    default_config_path, load_config, load_config_from_path, ClientConfig, ClientSettings,
    ConfigError, ConfigOverrides, ConfigSource, ServerConfig, ServerSettings, SwitchboardConfig,
    Timeout,
};
pub use dispatch::{
    ArgMode, Args, Handler, HandlerError, HandlerResult, Registry, RegistryError, Reply,
    PROTOCHECK, PROTOCOL_VERSION,
};
pub use frame::{CodecError, Frame, FrameDecoder};
pub use notify::{ConnectionId, Msg, Notifier};
pub use server::{Server, ServerError};
pub use status::Severity;
pub use transport::{Endpoint, LocalAddr};
