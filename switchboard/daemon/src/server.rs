//! Demo Handlers and Notification Reporter
//!
//! The commands registered here are deliberately small; they exist to show
//! both argument modes, handler failures, and session termination:
//!
//! | Command  | Mode  | Reply                                          |
//! |----------|-------|------------------------------------------------|
//! | `echo`   | whole | the payload                                    |
//! | `reverse`| whole | the payload, bytes reversed                    |
//! | `words`  | split | one word per line (quotes group words)         |
//! | `delay`  | split | sleeps the given milliseconds, then `done`     |
//! | `bye`    | whole | `goodbye`, then the server ends the session    |

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info};

use switchboard_core::status::{self, HANDLER_TERMINATED, LISTENER_FAILURE};
use switchboard_core::{
    ArgMode, Args, ConnectionId, HandlerError, HandlerResult, Msg, Registry, RegistryError, Reply,
    Severity,
};

/// Longest sleep `delay` accepts
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Register every demo command
pub fn register_handlers(registry: &Registry) -> Result<(), RegistryError> {
    registry.register("echo", ArgMode::Whole, echo)?;
    registry.register("reverse", ArgMode::Whole, reverse)?;
    registry.register("words", ArgMode::Split, words)?;
    registry.register("delay", ArgMode::Split, delay)?;
    registry.register("bye", ArgMode::Whole, bye)?;
    Ok(())
}

async fn echo(args: Args) -> HandlerResult {
    Ok(Reply::ok(args.into_payload()))
}

async fn reverse(args: Args) -> HandlerResult {
    let mut payload = args.into_payload();
    payload.reverse();
    Ok(Reply::ok(payload))
}

async fn words(args: Args) -> HandlerResult {
    Ok(Reply::ok(args.words().join(&b'\n')))
}

async fn delay(args: Args) -> HandlerResult {
    let [ms] = args.words() else {
        return Err(HandlerError::new(anyhow::anyhow!(
            "delay takes exactly one argument"
        )));
    };
    let ms: u64 = std::str::from_utf8(ms)?.parse()?;
    let wait = Duration::from_millis(ms);
    if wait > MAX_DELAY {
        return Err(HandlerError::new(anyhow::anyhow!(
            "delay of {ms}ms exceeds {}s",
            MAX_DELAY.as_secs()
        )));
    }

    tokio::time::sleep(wait).await;
    Ok(Reply::ok("done"))
}

async fn bye(_args: Args) -> HandlerResult {
    Ok(Reply::with_status(HANDLER_TERMINATED, "goodbye"))
}

// =============================================================================
// Notifications
// =============================================================================

/// Counters accumulated from the notification channel
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Connections accepted
    pub connections: u64,
    /// Requests handed to a handler
    pub dispatched: u64,
    /// Events of Error severity
    pub errors: u64,
    /// Events of Fatal severity
    pub fatal: u64,
}

impl Summary {
    fn record(&mut self, msg: &Msg) {
        match msg.status {
            status::CONNECTED => self.connections += 1,
            status::DISPATCHING => self.dispatched += 1,
            _ => {}
        }
        match msg.severity() {
            Severity::Error => self.errors += 1,
            Severity::Fatal => self.fatal += 1,
            Severity::Info | Severity::Conn => {}
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} connections, {} requests, {} errors, {} fatal",
            self.connections, self.dispatched, self.errors, self.fatal
        )
    }
}

/// Drain the notification channel until the server shuts down
///
/// Every event is already logged by the library; this loop keeps counts and
/// escalates listener failures, which otherwise only show as a stalled
/// service.
pub async fn report(mut events: mpsc::Receiver<Msg>) -> Summary {
    let mut summary = Summary::default();
    while let Some(msg) = events.recv().await {
        summary.record(&msg);
        if msg.conn == ConnectionId::LISTENER && msg.status == LISTENER_FAILURE {
            error!(event = %msg, "Listener is failing to accept connections");
        }
    }
    info!("Notification channel closed");
    summary
}
