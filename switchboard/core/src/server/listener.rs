//! Listener and acceptor task
//!
//! The acceptor owns the listening socket. It spawns one connection task per
//! accepted stream and exits when the shutdown signal is raised, emitting
//! the shutdown notification and dropping the socket (which unlinks a Unix
//! socket file).

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;
use tracing::Instrument;

use super::connection::Connection;
use super::{signalled, Context};
use crate::notify::{ConnectionId, Msg, Notifier};
use crate::status::{LISTENER_FAILURE, NETWORK_ERROR, SHUTDOWN};
use crate::transport::{BoxStream, Endpoint, LocalAddr};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound listening socket
#[derive(Debug)]
pub(crate) enum Listener {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: PathBuf },
}

impl Listener {
    /// Bind an endpoint
    ///
    /// Unix sockets get their parent directory created, any stale socket file
    /// replaced, and mode 0600.
    pub(crate) async fn bind(endpoint: &Endpoint) -> std::io::Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => Ok(Self::Tcp(TcpListener::bind(addr.as_str()).await?)),
            Endpoint::Unix(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                match tokio::fs::remove_file(path).await {
                    Ok(()) => tracing::debug!(path = %path.display(), "Removed stale socket"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }

                let listener = UnixListener::bind(path)?;
                tokio::fs::set_permissions(path, Permissions::from_mode(0o600)).await?;
                Ok(Self::Unix {
                    listener,
                    path: path.clone(),
                })
            }
        }
    }

    pub(crate) fn local_addr(&self) -> std::io::Result<LocalAddr> {
        match self {
            Self::Tcp(listener) => Ok(LocalAddr::Tcp(listener.local_addr()?)),
            Self::Unix { path, .. } => Ok(LocalAddr::Unix(path.clone())),
        }
    }

    async fn accept(&self) -> std::io::Result<(BoxStream, String)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Box::new(stream), addr.to_string()))
            }
            Self::Unix { listener, path } => {
                let (stream, addr) = listener.accept().await?;
                let peer = addr.as_pathname().map_or_else(
                    || format!("unix:{} (unnamed peer)", path.display()),
                    |p| format!("unix:{}", p.display()),
                );
                Ok((Box::new(stream), peer))
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Self::Unix { path, .. } = self {
            if let Err(e) = std::fs::remove_file(&*path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove socket file");
                }
            }
        }
    }
}

/// Accept connections until shutdown is signalled
pub(crate) async fn run_acceptor(
    listener: Listener,
    ctx: Arc<Context>,
    notifier: Notifier,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            () = signalled(&mut shutdown) => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => spawn_connection(stream, peer, &ctx, &notifier, &shutdown),
            Err(e) => {
                let stopping = *shutdown.borrow();
                if stopping {
                    break;
                }
                notifier.notify(Msg::new(ConnectionId::LISTENER, 0, LISTENER_FAILURE).with_error(e));
                tokio::select! {
                    biased;
                    () = signalled(&mut shutdown) => break,
                    () = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                }
            }
        }
    }

    notifier.notify(Msg::new(ConnectionId::LISTENER, 0, SHUTDOWN));
    drop(listener);
    tracing::debug!("Acceptor stopped");
}

fn spawn_connection(
    stream: BoxStream,
    peer: String,
    ctx: &Arc<Context>,
    notifier: &Notifier,
    shutdown: &watch::Receiver<bool>,
) {
    let id = ctx.next_id();
    let guard = ctx.tracker.enter();
    let ctx = Arc::clone(ctx);
    let notifier = notifier.clone();
    let shutdown = shutdown.clone();

    tokio::spawn(async move {
        // Declared first so the slot is released after everything else.
        let _guard = guard;

        let stream = match &ctx.tls {
            Some(acceptor) => {
                let handshake = acceptor.accept(stream);
                let result = match ctx.timeout.read_deadline() {
                    Some(limit) => tokio::time::timeout(limit, handshake)
                        .await
                        .unwrap_or_else(|_| {
                            Err(std::io::Error::new(
                                std::io::ErrorKind::TimedOut,
                                "TLS handshake timed out",
                            ))
                        }),
                    None => handshake.await,
                };
                match result {
                    Ok(tls) => Box::new(tls) as BoxStream,
                    Err(e) => {
                        notifier.notify(
                            Msg::new(id, 0, NETWORK_ERROR)
                                .with_peer(Some(peer))
                                .with_error(e),
                        );
                        return;
                    }
                }
            }
            None => stream,
        };

        Connection::new(id, stream, peer, ctx, notifier, shutdown)
            .run()
            .await;
    }
    .instrument(tracing::debug_span!("connection", conn_id = %id)));
}
