//! Server
//!
//! [`Server::bind`] opens the listening socket and starts the acceptor; the
//! returned handle registers handlers, exposes the notification channel, and
//! shuts everything down with [`Server::quit`].
//!
//! # Shutdown Order
//!
//! ```text
//! signal ─► acceptor emits 199, drops listener, exits
//!        ─► idle connections emit 199 and close; busy ones finish their request
//!        ─► live-connection count reaches zero
//!        ─► last notifier dropped: notification channel closes
//! ```
//!
//! Every connection task owns a notifier clone, so the channel cannot close
//! while any of them is still running.

mod connection;
mod listener;
mod tracker;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use crate::auth::AuthKey;
use crate::config::{ConfigError, ServerConfig, Timeout};
use crate::dispatch::{ArgMode, Handler, Registry, RegistryError};
use crate::notify::{ConnectionId, Msg, Notifier};
use crate::transport::LocalAddr;

use listener::{run_acceptor, Listener};
use tracker::Tracker;

/// Errors starting a server
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration is inconsistent
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Listening socket could not be opened
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        /// Requested endpoint
        endpoint: String,
        /// Underlying IO error
        source: std::io::Error,
    },
}

/// State shared by the acceptor and every connection task
pub(crate) struct Context {
    pub(crate) registry: Arc<Registry>,
    pub(crate) key: Option<AuthKey>,
    pub(crate) payload_limit: u32,
    pub(crate) timeout: Timeout,
    pub(crate) log_peer: bool,
    pub(crate) tls: Option<TlsAcceptor>,
    pub(crate) tracker: Tracker,
    next_id: AtomicU32,
}

impl Context {
    pub(crate) fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Resolves once the shutdown flag is set (or its sender is gone)
pub(crate) async fn signalled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// A running server
pub struct Server {
    registry: Arc<Registry>,
    notifier: Notifier,
    notifications: Option<mpsc::Receiver<Msg>>,
    shutdown: watch::Sender<bool>,
    tracker: Tracker,
    acceptor: Option<JoinHandle<()>>,
    local_addr: LocalAddr,
}

impl Server {
    /// Bind the configured endpoint and start accepting connections
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the socket cannot
    /// be bound.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let listener = Listener::bind(&config.endpoint)
            .await
            .map_err(|source| ServerError::Bind {
                endpoint: config.endpoint.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            endpoint: config.endpoint.to_string(),
            source,
        })?;

        let (notifier, notifications) =
            Notifier::channel(config.notify_capacity, config.notify_level);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let registry = Arc::new(Registry::new());
        let tracker = Tracker::new();

        let ctx = Arc::new(Context {
            registry: Arc::clone(&registry),
            key: config.key,
            payload_limit: config.payload_limit,
            timeout: config.timeout,
            log_peer: config.log_peer,
            tls: config.tls,
            tracker: tracker.clone(),
            next_id: AtomicU32::new(1),
        });

        let acceptor = tokio::spawn(run_acceptor(
            listener,
            ctx,
            notifier.clone(),
            shutdown_rx,
        ));

        tracing::info!(
            address = %local_addr,
            timeout_ms = config.timeout.as_millis(),
            payload_limit = config.payload_limit,
            "Server listening"
        );

        Ok(Self {
            registry,
            notifier,
            notifications: Some(notifications),
            shutdown,
            tracker,
            acceptor: Some(acceptor),
            local_addr,
        })
    }

    /// Register a handler
    ///
    /// # Errors
    ///
    /// See [`Registry::register`].
    pub fn register<H: Handler>(
        &self,
        name: &str,
        mode: ArgMode,
        handler: H,
    ) -> Result<(), RegistryError> {
        self.registry.register(name, mode, handler)
    }

    /// The dispatch registry
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Take the notification receiver (only the first call returns it)
    pub fn notifications(&mut self) -> Option<mpsc::Receiver<Msg>> {
        self.notifications.take()
    }

    /// Address actually bound
    #[must_use]
    pub fn local_addr(&self) -> &LocalAddr {
        &self.local_addr
    }

    /// Notifications dropped because the channel was full
    #[must_use]
    pub fn dropped_notifications(&self) -> u64 {
        self.notifier.dropped()
    }

    /// Connection tasks currently running
    #[must_use]
    pub fn live_connections(&self) -> usize {
        self.tracker.live()
    }

    /// Stop accepting, wait for every connection task, then close the
    /// notification channel
    ///
    /// Connections are not left to drain through their read timeout. One
    /// waiting for its next request ends at once with a `199` notification;
    /// one whose request is being read or handled is answered first and ends
    /// after the reply is written. No accepted request goes unanswered, and
    /// `quit` never waits on an idle peer.
    pub async fn quit(mut self) {
        tracing::info!(address = %self.local_addr, "Server shutting down");
        self.shutdown.send_replace(true);

        if let Some(acceptor) = self.acceptor.take() {
            if let Err(e) = acceptor.await {
                tracing::error!(error = %e, "Acceptor task failed");
            }
        }

        self.tracker.wait_idle().await;
        tracing::info!("Server stopped");
        // Dropping `self` releases the last notifier.
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("live_connections", &self.tracker.live())
            .finish_non_exhaustive()
    }
}
