//! Status Registry
//!
//! Every outcome the transport can report is identified by a numeric status
//! code. The registry maps each code to a severity, a human-readable
//! description and, for codes that are answered on the wire, a canned reply
//! payload.
//!
//! The table is a `static` slice sorted by code: it is built at compile time,
//! has no mutation API and needs no lock.
//!
//! # Severity
//!
//! ```text
//! Info < Conn < Error < Fatal
//! ```
//!
//! The server's notification threshold is a [`Severity`]; events below it are
//! never delivered.
//!
//! A reply at `Error` or above means the connection is no longer usable, and
//! the client closes it. Unknown commands and empty requests are therefore
//! `Conn`: the server answers them and keeps reading. An over-limit request
//! stays `Error` because the server ends the connection without reading the
//! body.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Client connected
pub const CONNECTED: u16 = 100;
/// Request is being dispatched to a handler
pub const DISPATCHING: u16 = 101;
/// Network read or write failed
pub const NETWORK_ERROR: u16 = 196;
/// Session ended (one-shot completion or idle timeout)
pub const SESSION_ENDED: u16 = 197;
/// Peer closed the connection
pub const DISCONNECTED: u16 = 198;
/// Shutdown requested
pub const SHUTDOWN: u16 = 199;
/// Request handled successfully
pub const SUCCESS: u16 = 200;
/// No handler registered under the requested name
pub const UNKNOWN_COMMAND: u16 = 400;
/// Request carried neither a name nor a payload
pub const EMPTY_REQUEST: u16 = 401;
/// Declared payload exceeds the configured limit
pub const OVER_LIMIT: u16 = 402;
/// Client and server protocol versions differ
pub const VERSION_MISMATCH: u16 = 497;
/// Frame was short or malformed
pub const MALFORMED_FRAME: u16 = 498;
/// Handler returned an error
pub const HANDLER_ERROR: u16 = 500;
/// Internal encode/decode failure
pub const INTERNAL_ERROR: u16 = 501;
/// Authentication tag did not verify
pub const AUTH_MISMATCH: u16 = 502;
/// Handler asked for the connection to be closed
pub const HANDLER_TERMINATED: u16 = 503;
/// Listening socket failed
pub const LISTENER_FAILURE: u16 = 599;

/// Ordered classification of status codes
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine events (successful replies)
    Info,
    /// Connection lifecycle events and rejected requests that leave the
    /// connection usable
    Conn,
    /// Request or transport errors
    Error,
    /// Errors that end the connection or the service
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Info => "info",
            Self::Conn => "conn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Error returned when parsing an unknown severity name
#[derive(Debug, thiserror::Error)]
#[error("unknown severity level '{0}' (expected info, conn, error or fatal)")]
pub struct ParseSeverityError(String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" | "debug" | "all" => Ok(Self::Info),
            "conn" | "connection" => Ok(Self::Conn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            other => Err(ParseSeverityError(other.to_string())),
        }
    }
}

/// One row of the status table
#[derive(Debug, PartialEq, Eq)]
pub struct StatusEntry {
    /// Numeric status code
    pub code: u16,
    /// Severity used for notification filtering
    pub severity: Severity,
    /// Human-readable description
    pub text: &'static str,
    /// Payload sent to the peer when this status is answered on the wire
    pub canned: Option<&'static [u8]>,
}

// Sorted by code; `lookup` relies on it.
static TABLE: &[StatusEntry] = &[
    entry(CONNECTED, Severity::Conn, "client connected", None),
    entry(DISPATCHING, Severity::Info, "dispatching", None),
    entry(NETWORK_ERROR, Severity::Conn, "network error", None),
    entry(SESSION_ENDED, Severity::Conn, "session ended", None),
    entry(DISCONNECTED, Severity::Conn, "peer disconnected", None),
    entry(SHUTDOWN, Severity::Conn, "shutdown requested", None),
    entry(SUCCESS, Severity::Info, "reply sent", None),
    entry(
        UNKNOWN_COMMAND,
        Severity::Conn,
        "unknown command",
        Some(b"PERR400 unknown command"),
    ),
    entry(
        EMPTY_REQUEST,
        Severity::Conn,
        "empty request",
        Some(b"PERR401 empty request"),
    ),
    entry(
        OVER_LIMIT,
        Severity::Error,
        "request over limit",
        Some(b"PERR402 request over limit"),
    ),
    entry(
        VERSION_MISMATCH,
        Severity::Error,
        "protocol version mismatch",
        Some(b"PERR497 protocol version mismatch"),
    ),
    entry(
        MALFORMED_FRAME,
        Severity::Error,
        "short or malformed frame",
        Some(b"PERR498 malformed frame"),
    ),
    entry(
        HANDLER_ERROR,
        Severity::Error,
        "handler error",
        Some(b"PERR500 request failed"),
    ),
    entry(
        INTERNAL_ERROR,
        Severity::Error,
        "internal encode/decode error",
        Some(b"PERR501 internal error"),
    ),
    entry(
        AUTH_MISMATCH,
        Severity::Error,
        "authentication tag mismatch",
        Some(b"PERR502 authentication failed"),
    ),
    entry(
        HANDLER_TERMINATED,
        Severity::Fatal,
        "handler terminated session",
        Some(b"PERR503 session terminated"),
    ),
    entry(LISTENER_FAILURE, Severity::Fatal, "listener failure", None),
];

const fn entry(
    code: u16,
    severity: Severity,
    text: &'static str,
    canned: Option<&'static [u8]>,
) -> StatusEntry {
    StatusEntry {
        code,
        severity,
        text,
        canned,
    }
}

/// Look up a status code
#[must_use]
pub fn lookup(code: u16) -> Option<&'static StatusEntry> {
    TABLE
        .binary_search_by_key(&code, |e| e.code)
        .ok()
        .map(|idx| &TABLE[idx])
}

/// Severity of a status code
///
/// Codes missing from the table are classified by range: `2xx` is `Info`,
/// `1xx` is `Conn`, `4xx` is `Error` and everything else `Fatal`.
#[must_use]
pub fn severity(code: u16) -> Severity {
    if let Some(entry) = lookup(code) {
        return entry.severity;
    }
    match code {
        100..=199 => Severity::Conn,
        200..=299 => Severity::Info,
        400..=499 => Severity::Error,
        _ => Severity::Fatal,
    }
}

/// Description of a status code
#[must_use]
pub fn text(code: u16) -> &'static str {
    lookup(code).map_or("unregistered status", |e| e.text)
}

/// Canned wire payload for a status code, if it has one
#[must_use]
pub fn canned(code: u16) -> Option<&'static [u8]> {
    lookup(code).and_then(|e| e.canned)
}

/// Whether a reply status counts as success for a client
#[must_use]
pub fn is_success(code: u16) -> bool {
    (200..300).contains(&code)
}
