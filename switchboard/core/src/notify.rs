//! Notification Channel
//!
//! Every connection and the acceptor report lifecycle events as [`Msg`]
//! records on a bounded channel read by the host application.
//!
//! # Filtering and Back-pressure
//!
//! - Events whose severity is below the configured threshold are discarded
//!   before a record is built
//! - Delivery uses `try_send`: when the channel is full the event is dropped
//!   and counted, never blocking the data path
//! - Every delivered event is also logged through `tracing`
//!
//! The channel closes once every [`Notifier`] clone is gone. Each connection
//! task owns one, so the reader sees `None` only after all tasks have ended.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::status::{self, Severity};

/// Default notification channel capacity
pub const DEFAULT_CAPACITY: usize = 32;

/// Identifier of one accepted connection, unique per server
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    /// Id used for events not tied to a connection (e.g. the acceptor)
    pub const LISTENER: Self = Self(0);
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One notification record
#[derive(Debug)]
pub struct Msg {
    /// Connection the event belongs to
    pub conn: ConnectionId,
    /// Server-side sequence number at the time of the event
    pub seq: u32,
    /// Request name, when the event concerns a request
    pub name: Option<String>,
    /// Status code
    pub status: u16,
    /// Remote address (only on connect, when peer logging is enabled)
    pub peer: Option<String>,
    /// Underlying cause
    pub error: Option<anyhow::Error>,
}

impl Msg {
    /// Start a record for a status
    #[must_use]
    pub fn new(conn: ConnectionId, seq: u32, status: u16) -> Self {
        Self {
            conn,
            seq,
            name: None,
            status,
            peer: None,
            error: None,
        }
    }

    /// Attach the request name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach the remote address
    #[must_use]
    pub fn with_peer(mut self, peer: Option<String>) -> Self {
        self.peer = peer;
        self
    }

    /// Attach the underlying cause
    #[must_use]
    pub fn with_error(mut self, error: impl Into<anyhow::Error>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Severity of this record's status
    #[must_use]
    pub fn severity(&self) -> Severity {
        status::severity(self.status)
    }

    /// Description of this record's status
    #[must_use]
    pub fn text(&self) -> &'static str {
        status::text(self.status)
    }
}

impl fmt::Display for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[conn {} seq {}] {} {}",
            self.conn,
            self.seq,
            self.status,
            self.text()
        )?;
        if let Some(name) = &self.name {
            write!(f, " ({name})")?;
        }
        if let Some(peer) = &self.peer {
            write!(f, " from {peer}")?;
        }
        if let Some(error) = &self.error {
            write!(f, ": {error:#}")?;
        }
        Ok(())
    }
}

/// Sending side of the notification channel
#[derive(Clone, Debug)]
pub struct Notifier {
    tx: mpsc::Sender<Msg>,
    threshold: Severity,
    dropped: Arc<AtomicU64>,
}

impl Notifier {
    /// Create a channel delivering events at or above `threshold`
    ///
    /// A capacity of 0 is raised to 1.
    #[must_use]
    pub fn channel(capacity: usize, threshold: Severity) -> (Self, mpsc::Receiver<Msg>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let notifier = Self {
            tx,
            threshold,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (notifier, rx)
    }

    /// Minimum severity delivered
    #[must_use]
    pub fn threshold(&self) -> Severity {
        self.threshold
    }

    /// Whether a status passes the threshold
    #[must_use]
    pub fn enabled(&self, status: u16) -> bool {
        status::severity(status) >= self.threshold
    }

    /// Deliver an event if it passes the threshold
    pub fn notify(&self, msg: Msg) {
        let severity = msg.severity();
        if severity < self.threshold {
            return;
        }

        match severity {
            Severity::Info => tracing::debug!(
                conn_id = %msg.conn, seq = msg.seq, status = msg.status, name = ?msg.name,
                "{}", msg.text()
            ),
            Severity::Conn => tracing::info!(
                conn_id = %msg.conn, seq = msg.seq, status = msg.status, peer = ?msg.peer,
                "{}", msg.text()
            ),
            Severity::Error => tracing::warn!(
                conn_id = %msg.conn, seq = msg.seq, status = msg.status, name = ?msg.name,
                error = ?msg.error.as_ref().map(|e| format!("{e:#}")),
                "{}", msg.text()
            ),
            Severity::Fatal => tracing::error!(
                conn_id = %msg.conn, seq = msg.seq, status = msg.status,
                error = ?msg.error.as_ref().map(|e| format!("{e:#}")),
                "{}", msg.text()
            ),
        }

        if let Err(err) = self.tx.try_send(msg) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let reason = match err {
                mpsc::error::TrySendError::Full(_) => "channel full",
                mpsc::error::TrySendError::Closed(_) => "channel closed",
            };
            tracing::debug!(dropped = total, reason, "Notification dropped");
        }
    }

    /// Events dropped so far across all clones
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{
        CONNECTED, DISPATCHING, HANDLER_ERROR, LISTENER_FAILURE, SUCCESS, UNKNOWN_COMMAND,
    };

    #[test]
    fn test_below_threshold_is_discarded() {
        let (notifier, mut rx) = Notifier::channel(4, Severity::Conn);
        notifier.notify(Msg::new(ConnectionId(1), 1, DISPATCHING));
        notifier.notify(Msg::new(ConnectionId(1), 1, SUCCESS));
        notifier.notify(Msg::new(ConnectionId(1), 0, CONNECTED));

        assert_eq!(rx.try_recv().unwrap().status, CONNECTED);
        assert!(rx.try_recv().is_err());
        assert_eq!(notifier.dropped(), 0);
    }

    #[test]
    fn test_full_channel_drops_and_counts() {
        let (notifier, mut rx) = Notifier::channel(2, Severity::Info);
        for seq in 0..5 {
            notifier.notify(Msg::new(ConnectionId(1), seq, SUCCESS));
        }

        assert_eq!(rx.try_recv().unwrap().seq, 0);
        assert_eq!(rx.try_recv().unwrap().seq, 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(notifier.dropped(), 3);
        assert_eq!(notifier.clone().dropped(), 3);
    }

    #[test]
    fn test_channel_closes_with_last_notifier() {
        let (notifier, mut rx) = Notifier::channel(1, Severity::Info);
        let clone = notifier.clone();
        drop(notifier);
        assert!(!rx.is_closed());
        drop(clone);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_enabled() {
        let (notifier, _rx) = Notifier::channel(1, Severity::Error);
        assert!(notifier.enabled(HANDLER_ERROR));
        assert!(notifier.enabled(LISTENER_FAILURE));
        assert!(!notifier.enabled(UNKNOWN_COMMAND));
        assert!(!notifier.enabled(CONNECTED));
        assert_eq!(notifier.threshold(), Severity::Error);
    }

    #[test]
    fn test_msg_display() {
        let msg = Msg::new(ConnectionId(7), 3, UNKNOWN_COMMAND)
            .with_name("missing")
            .with_error(anyhow::anyhow!("no route"));
        assert_eq!(
            msg.to_string(),
            "[conn 7 seq 3] 400 unknown command (missing): no route"
        );
        assert_eq!(msg.severity(), Severity::Conn);
    }
}
