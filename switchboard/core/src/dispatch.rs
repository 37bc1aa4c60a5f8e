//! Dispatch Registry
//!
//! Maps request names to handlers. Every registry starts with the reserved
//! [`PROTOCHECK`] entry, which answers the client's protocol-version
//! handshake and can be neither replaced nor removed.
//!
//! The registry is meant to be populated before traffic starts (or between
//! bursts); lookups clone an `Arc` to the handler so a slow handler never
//! holds the lock.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use thiserror::Error;

use crate::frame::MAX_NAME_LEN;
use crate::status::{self, HANDLER_ERROR, HANDLER_TERMINATED, SUCCESS, VERSION_MISMATCH};
use crate::tokenize::split_words;

/// Name of the reserved handshake request
pub const PROTOCHECK: &str = "PROTOCHECK";

/// Protocol version spoken by this crate
pub const PROTOCOL_VERSION: u32 = 1;

/// Errors raised by registry operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A handler is already registered under this name
    #[error("handler '{0}' is already registered")]
    Duplicate(String),

    /// The name belongs to a built-in request
    #[error("'{0}' is a reserved request name")]
    Reserved(String),

    /// Handler names cannot be empty
    #[error("handler name is empty")]
    EmptyName,

    /// Name does not fit the wire header
    #[error("handler name is {0} bytes (max: 255)")]
    NameTooLong(usize),

    /// Argument mode string not recognised
    #[error("unknown argument mode '{0}' (expected whole or split)")]
    UnknownMode(String),
}

/// How a request payload is handed to its handler
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArgMode {
    /// The payload as one value
    #[default]
    Whole,
    /// The payload split into words, single quotes grouping
    Split,
}

impl FromStr for ArgMode {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "whole" | "blob" => Ok(Self::Whole),
            "split" | "args" => Ok(Self::Split),
            other => Err(RegistryError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for ArgMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Whole => f.write_str("whole"),
            Self::Split => f.write_str("split"),
        }
    }
}

/// Arguments passed to a handler
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Args {
    /// Entire payload
    Whole(Vec<u8>),
    /// Payload words
    Split(Vec<Vec<u8>>),
}

impl Args {
    /// Prepare a payload for the given mode
    #[must_use]
    pub fn new(mode: ArgMode, payload: Vec<u8>) -> Self {
        match mode {
            ArgMode::Whole => Self::Whole(payload),
            ArgMode::Split => Self::Split(split_words(&payload)),
        }
    }

    /// Arguments as a list of words (a whole payload is one word)
    #[must_use]
    pub fn words(&self) -> &[Vec<u8>] {
        match self {
            Self::Whole(payload) => std::slice::from_ref(payload),
            Self::Split(words) => words,
        }
    }

    /// Arguments as one byte string; split words are rejoined with single spaces
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        match self {
            Self::Whole(payload) => payload,
            Self::Split(words) => words.join(&b' '),
        }
    }
}

/// Successful handler result
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    /// Status sent to the client
    pub status: u16,
    /// Payload sent to the client
    pub payload: Vec<u8>,
}

impl Reply {
    /// Reply with status 200
    pub fn ok(payload: impl Into<Vec<u8>>) -> Self {
        Self::with_status(SUCCESS, payload)
    }

    /// Reply with an explicit status
    pub fn with_status(status: u16, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            payload: payload.into(),
        }
    }
}

/// Failed handler result
///
/// The client only ever sees the generic handler-error reply; the source is
/// delivered through the notification channel. A status of Fatal severity
/// closes the connection after that reply.
#[derive(Debug)]
pub struct HandlerError {
    /// Status classifying the failure
    pub status: u16,
    /// Underlying cause
    pub source: anyhow::Error,
}

impl HandlerError {
    /// Recoverable handler failure (status 500)
    pub fn new(source: impl Into<anyhow::Error>) -> Self {
        Self {
            status: HANDLER_ERROR,
            source: source.into(),
        }
    }

    /// Failure that ends the connection (status 503)
    pub fn fatal(source: impl Into<anyhow::Error>) -> Self {
        Self {
            status: HANDLER_TERMINATED,
            source: source.into(),
        }
    }

    /// Whether this failure ends the connection
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        status::severity(self.status) == status::Severity::Fatal
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.source, self.status)
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::new(err)
    }
}

/// Result returned by handlers
pub type HandlerResult = Result<Reply, HandlerError>;

/// A request handler
///
/// Implemented for every `Fn(Args) -> impl Future<Output = HandlerResult>`,
/// so async closures can be registered directly:
///
/// ```ignore
/// registry.register("echo", ArgMode::Whole, |args: Args| async move {
///     Ok::<_, HandlerError>(Reply::ok(args.into_payload()))
/// })?;
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Handle one request
    fn call(&self, args: Args) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, args: Args) -> BoxFuture<'static, HandlerResult> {
        (self)(args).boxed()
    }
}

/// A registered handler and its argument mode
#[derive(Clone)]
pub struct Route {
    /// Handler to invoke
    pub handler: Arc<dyn Handler>,
    /// How to prepare its arguments
    pub mode: ArgMode,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route").field("mode", &self.mode).finish_non_exhaustive()
    }
}

/// Name to handler mapping
pub struct Registry {
    routes: RwLock<HashMap<String, Route>>,
}

impl Registry {
    /// Create a registry holding only the handshake responder
    #[must_use]
    pub fn new() -> Self {
        let mut routes = HashMap::new();
        routes.insert(
            PROTOCHECK.to_string(),
            Route {
                handler: Arc::new(protocheck),
                mode: ArgMode::Whole,
            },
        );
        Self {
            routes: RwLock::new(routes),
        }
    }

    /// Register a handler
    ///
    /// # Errors
    ///
    /// Fails without modifying the registry if the name is empty, longer than
    /// 255 bytes, reserved, or already registered.
    pub fn register<H: Handler>(
        &self,
        name: &str,
        mode: ArgMode,
        handler: H,
    ) -> Result<(), RegistryError> {
        validate_name(name)?;

        let mut routes = self.routes.write();
        if routes.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        routes.insert(
            name.to_string(),
            Route {
                handler: Arc::new(handler),
                mode,
            },
        );
        drop(routes);

        tracing::debug!(name, %mode, "Handler registered");
        Ok(())
    }

    /// Exact, case-sensitive lookup
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Route> {
        self.routes.read().get(name).cloned()
    }

    /// Whether a handler is registered under `name`
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.routes.read().contains_key(name)
    }

    /// Registered names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered handlers, including built-ins
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    /// Always false: the handshake responder is always present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    /// Remove a handler, returning whether it was present
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Reserved`] for built-in names.
    #[cfg(any(test, feature = "test-support"))]
    pub fn remove(&self, name: &str) -> Result<bool, RegistryError> {
        if name == PROTOCHECK {
            return Err(RegistryError::Reserved(name.to_string()));
        }
        Ok(self.routes.write().remove(name).is_some())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names())
            .finish()
    }
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() {
        return Err(RegistryError::EmptyName);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(RegistryError::NameTooLong(name.len()));
    }
    if name == PROTOCHECK {
        return Err(RegistryError::Reserved(name.to_string()));
    }
    Ok(())
}

/// Handshake responder: payload is the client's version in ASCII decimal
async fn protocheck(args: Args) -> HandlerResult {
    let ours = PROTOCOL_VERSION.to_string();
    let theirs = args.into_payload();
    let matches = std::str::from_utf8(&theirs)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        == Some(PROTOCOL_VERSION);

    if matches {
        Ok(Reply::ok(ours))
    } else {
        tracing::debug!(
            client = %String::from_utf8_lossy(&theirs),
            server = PROTOCOL_VERSION,
            "Protocol version mismatch"
        );
        Ok(Reply::with_status(VERSION_MISMATCH, ours))
    }
}
