//! Live-connection tracking
//!
//! A wait-group built on `tokio::sync::watch`: every connection task holds a
//! [`TrackerGuard`], and [`Tracker::wait_idle`] resolves once the count is
//! back to zero.

use std::sync::Arc;

use tokio::sync::watch;

/// Counts live connection tasks
#[derive(Clone, Debug)]
pub(crate) struct Tracker {
    count: Arc<watch::Sender<usize>>,
}

/// Releases one tracker slot when dropped
#[derive(Debug)]
pub(crate) struct TrackerGuard {
    count: Arc<watch::Sender<usize>>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            count: Arc::new(count),
        }
    }

    /// Claim a slot for a new task
    pub(crate) fn enter(&self) -> TrackerGuard {
        self.count.send_modify(|n| *n += 1);
        TrackerGuard {
            count: Arc::clone(&self.count),
        }
    }

    pub(crate) fn live(&self) -> usize {
        *self.count.borrow()
    }

    /// Wait until no task holds a slot
    pub(crate) async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }
}
