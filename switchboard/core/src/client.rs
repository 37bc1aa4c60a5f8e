//! Client
//!
//! A [`Client`] owns one connection. Construction dials the server and runs
//! the protocol-version handshake; afterwards [`Client::dispatch`] sends one
//! request at a time and waits for its reply.
//!
//! # Failure Policy
//!
//! - A reply whose status is Error or Fatal severity closes the connection
//!   after it is recorded; unknown commands and empty requests are below
//!   Error and leave it open
//! - Any transport or framing failure closes the connection
//! - Once closed, every further dispatch fails with [`ClientError::Closed`];
//!   there is no reconnection

use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::auth::AuthKey;
use crate::config::ClientConfig;
use crate::dispatch::{PROTOCHECK, PROTOCOL_VERSION};
use crate::frame::{self, read_frame_timeout, write_frame, CodecError, Frame, FrameDecoder};
use crate::status::{self, Severity, SUCCESS, UNKNOWN_COMMAND, VERSION_MISMATCH};
use crate::transport::{self, BoxStream};

/// Payload returned alongside every failed dispatch
pub const SENTINEL: &[u8] = &[255];

/// Errors returned by the client
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not reach the server
    #[error("failed to connect: {0}")]
    Connect(#[source] std::io::Error),

    /// Connecting took longer than the connect timeout
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Server does not know the handshake request
    #[error("server does not support the protocol handshake")]
    HandshakeUnsupported,

    /// Server speaks a different protocol version
    #[error("protocol version mismatch (client {client}, server {server})")]
    VersionMismatch {
        /// Our version
        client: u32,
        /// Version the server reported
        server: String,
    },

    /// Server answered with a non-success status
    #[error("request failed with status {status}: {}", status::text(*status))]
    Status {
        /// Reply status
        status: u16,
        /// Reply payload (usually the canned error text)
        payload: Vec<u8>,
    },

    /// A previous failure closed the connection
    #[error("connection is closed")]
    Closed,

    /// Name is reserved for the handshake
    #[error("'{0}' is reserved")]
    Reserved(String),

    /// Framing or transport failure
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl ClientError {
    /// Fixed payload identifying an error reply
    #[must_use]
    pub fn sentinel(&self) -> &'static [u8] {
        SENTINEL
    }

    /// Status code describing this failure, when one applies
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::VersionMismatch { .. } => Some(VERSION_MISMATCH),
            Self::HandshakeUnsupported => Some(UNKNOWN_COMMAND),
            Self::Codec(e) => Some(e.status()),
            _ => None,
        }
    }
}

/// A reply from the server
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Response {
    /// Reply status
    pub status: u16,
    /// Sequence number echoed by the server
    pub seq: u32,
    /// Request name echoed by the server
    pub name: String,
    /// Reply payload
    pub payload: Vec<u8>,
}

impl From<Frame> for Response {
    fn from(frame: Frame) -> Self {
        Self {
            status: frame.status,
            seq: frame.seq,
            name: frame.name,
            payload: frame.payload,
        }
    }
}

/// A connection to a server
pub struct Client {
    stream: Option<BoxStream>,
    decoder: FrameDecoder,
    key: Option<AuthKey>,
    timeout: Option<Duration>,
    seq: u32,
    last: Option<Response>,
}

impl Client {
    /// Dial the server and perform the protocol handshake
    ///
    /// # Errors
    ///
    /// Returns connection failures, [`ClientError::HandshakeUnsupported`] or
    /// [`ClientError::VersionMismatch`]. The connection is closed before an
    /// error is returned.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let connect = transport::connect(&config.endpoint, config.tls.as_ref());
        let stream = tokio::time::timeout(config.connect_timeout, connect)
            .await
            .map_err(|_| ClientError::ConnectTimeout(config.connect_timeout))?
            .map_err(ClientError::Connect)?;

        let mut client = Self {
            stream: Some(stream),
            decoder: FrameDecoder::new(config.payload_limit, config.key.clone()),
            key: config.key,
            timeout: config.timeout.read_deadline(),
            seq: 0,
            last: None,
        };

        if let Err(e) = client.handshake().await {
            client.close().await;
            return Err(e);
        }

        tracing::debug!(endpoint = %config.endpoint, "Client connected");
        Ok(client)
    }

    async fn handshake(&mut self) -> Result<(), ClientError> {
        let request = Frame::request(self.seq, PROTOCHECK, PROTOCOL_VERSION.to_string());
        let response = self.exchange(&request).await?;
        match response.status {
            SUCCESS => Ok(()),
            UNKNOWN_COMMAND => Err(ClientError::HandshakeUnsupported),
            VERSION_MISMATCH => Err(ClientError::VersionMismatch {
                client: PROTOCOL_VERSION,
                server: String::from_utf8_lossy(&response.payload).into_owned(),
            }),
            status => Err(ClientError::Status {
                status,
                payload: response.payload,
            }),
        }
    }

    /// Send a request and wait for its reply
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] after an earlier failure,
    /// [`ClientError::Reserved`] for the handshake name,
    /// [`ClientError::Status`] for a non-2xx reply, and
    /// [`ClientError::Codec`] for transport failures or a reply that does not
    /// echo the request's sequence number.
    pub async fn dispatch(
        &mut self,
        name: &str,
        payload: impl AsRef<[u8]>,
    ) -> Result<&Response, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        if name == PROTOCHECK {
            return Err(ClientError::Reserved(name.to_string()));
        }

        self.seq = self.seq.wrapping_add(1);
        let request = Frame::request(self.seq, name, payload.as_ref());
        let response = self.exchange(&request).await?;

        if response.seq != request.seq {
            self.close().await;
            return Err(ClientError::Codec(CodecError::Malformed(format!(
                "reply sequence {} does not match request {}",
                response.seq, request.seq
            ))));
        }

        let status = response.status;
        if status::severity(status) >= Severity::Error {
            self.close().await;
        }
        if !status::is_success(status) {
            let payload = response.payload.clone();
            self.last = Some(response);
            return Err(ClientError::Status { status, payload });
        }

        Ok(self.last.insert(response))
    }

    /// Write caller-supplied bytes and read one reply frame
    ///
    /// Sequence numbers are neither assigned nor checked, and the reply
    /// status does not close the connection.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] or a transport failure.
    pub async fn dispatch_raw(&mut self, bytes: &[u8]) -> Result<&Response, ClientError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(ClientError::Closed);
        };

        let result = match frame::write_bytes(stream, bytes).await {
            Ok(()) => read_frame_timeout(stream, &mut self.decoder, self.timeout).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(reply) => Ok(self.last.insert(reply.into())),
            Err(e) => {
                self.close().await;
                Err(e.into())
            }
        }
    }

    async fn exchange(&mut self, request: &Frame) -> Result<Response, ClientError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(ClientError::Closed);
        };

        let result = match write_frame(stream, request, self.key.as_ref()).await {
            Ok(()) => read_frame_timeout(stream, &mut self.decoder, self.timeout).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(reply) => Ok(reply.into()),
            Err(e) => {
                self.close().await;
                Err(e.into())
            }
        }
    }

    /// Most recent reply
    #[must_use]
    pub fn last_response(&self) -> Option<&Response> {
        self.last.as_ref()
    }

    /// Sequence number of the last request
    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.seq
    }

    /// Whether the connection has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(error = %e, "Client stream shutdown failed");
            }
        }
        self.decoder.reset();
    }

    /// Close the connection
    pub async fn quit(mut self) {
        self.close().await;
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("seq", &self.seq)
            .field("closed", &self.is_closed())
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}
