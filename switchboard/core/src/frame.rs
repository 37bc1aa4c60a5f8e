//! Frame Protocol
//!
//! Wire format for every request and response.
//!
//! # Frame Format
//!
//! ```text
//! +---------+----------+---------+-------------+--------+-----------+-----------+
//! | Status  | Sequence | NameLen | PayloadLen  | Name   | Payload   | Tag       |
//! | u16 BE  | u32 BE   | u8      | u32 BE      | N      | M         | 44 (opt.) |
//! +---------+----------+---------+-------------+--------+-----------+-----------+
//! ```
//!
//! The tag is present iff a shared [`AuthKey`] is configured on both ends; it
//! is HMAC-SHA256 over the payload, base64 encoded.
//!
//! # Security
//!
//! - The declared payload length is validated against the configured limit as
//!   soon as the header is complete, before any payload byte is requested
//! - Payload buffers grow in bounded chunks, never to the declared length up
//!   front
//! - The decoder never asks for bytes past the end of the current frame, so a
//!   read cannot swallow the next frame's header

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::auth::{AuthKey, TAG_LEN};
use crate::status;

/// Fixed header size: status(2) + sequence(4) + name length(1) + payload length(4)
pub const HEADER_SIZE: usize = 11;

/// Largest request name the header can declare
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Largest single read issued while accumulating a payload
pub const READ_CHUNK: usize = 64 * 1024;

/// Errors raised while encoding or decoding frames
#[derive(Debug, Error)]
pub enum CodecError {
    /// Stream ended (orderly peer disconnect)
    #[error("peer disconnected")]
    Disconnected,

    /// No complete frame arrived within the read deadline
    #[error("read timed out")]
    Timeout,

    /// Transport-level I/O failure
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    /// Declared payload length exceeds the configured limit
    #[error("payload of {declared} bytes exceeds limit of {limit} bytes")]
    OverLimit {
        /// Length declared in the header
        declared: u32,
        /// Configured limit
        limit: u32,
    },

    /// Frame structure is invalid
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Authentication tag did not verify
    #[error("authentication tag mismatch")]
    TagMismatch,

    /// Frame could not be encoded
    #[error("cannot encode frame: {0}")]
    Encode(String),
}

impl CodecError {
    /// Status code reported for this failure
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Disconnected => status::DISCONNECTED,
            Self::Timeout => status::SESSION_ENDED,
            Self::Io(_) => status::NETWORK_ERROR,
            Self::OverLimit { .. } => status::OVER_LIMIT,
            Self::Malformed(_) => status::MALFORMED_FRAME,
            Self::TagMismatch => status::AUTH_MISMATCH,
            Self::Encode(_) => status::INTERNAL_ERROR,
        }
    }
}

/// One decoded request or response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    /// Status code (requests normally carry 0)
    pub status: u16,
    /// Sequence number
    pub seq: u32,
    /// Request name
    pub name: String,
    /// Payload bytes
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a request frame
    pub fn request(seq: u32, name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 0,
            seq,
            name: name.into(),
            payload: payload.into(),
        }
    }

    /// Build a response frame echoing a request name
    pub fn response(
        status: u16,
        seq: u32,
        name: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            status,
            seq,
            name: name.into(),
            payload: payload.into(),
        }
    }

    /// A frame with neither name nor payload
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.name.is_empty() && self.payload.is_empty()
    }
}

/// Encode a frame, appending the payload tag when a key is given
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if the name exceeds 255 bytes or the payload
/// exceeds `u32::MAX` bytes.
pub fn encode(frame: &Frame, key: Option<&AuthKey>) -> Result<Vec<u8>, CodecError> {
    let name = frame.name.as_bytes();
    let name_len = u8::try_from(name.len()).map_err(|_| {
        CodecError::Encode(format!(
            "request name is {} bytes (max: {MAX_NAME_LEN})",
            name.len()
        ))
    })?;
    let payload_len = u32::try_from(frame.payload.len()).map_err(|_| {
        CodecError::Encode(format!("payload is {} bytes", frame.payload.len()))
    })?;

    let tag_len = if key.is_some() { TAG_LEN } else { 0 };
    let mut buf = Vec::with_capacity(HEADER_SIZE + name.len() + frame.payload.len() + tag_len);
    buf.extend_from_slice(&frame.status.to_be_bytes());
    buf.extend_from_slice(&frame.seq.to_be_bytes());
    buf.push(name_len);
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(name);
    buf.extend_from_slice(&frame.payload);
    if let Some(key) = key {
        buf.extend_from_slice(&key.tag(&frame.payload));
    }
    Ok(buf)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Section {
    Header,
    Name,
    Payload,
    Tag,
    Complete,
}

/// Incremental frame decoder
///
/// The decoder is fed by the caller and reports through [`wants`] how many
/// bytes it can accept next. Feeding it exactly that many bytes or fewer
/// guarantees no byte of a following frame is consumed.
///
/// [`wants`]: FrameDecoder::wants
#[derive(Debug)]
pub struct FrameDecoder {
    section: Section,
    header: [u8; HEADER_SIZE],
    filled: usize,
    status: u16,
    seq: u32,
    name_len: usize,
    payload_len: usize,
    name: Vec<u8>,
    payload: Vec<u8>,
    tag: Vec<u8>,
    limit: u32,
    key: Option<AuthKey>,
}

impl FrameDecoder {
    /// Create a decoder
    ///
    /// `limit` is the maximum payload length in bytes; 0 disables the check.
    #[must_use]
    pub fn new(limit: u32, key: Option<AuthKey>) -> Self {
        Self {
            section: Section::Header,
            header: [0u8; HEADER_SIZE],
            filled: 0,
            status: 0,
            seq: 0,
            name_len: 0,
            payload_len: 0,
            name: Vec::new(),
            payload: Vec::new(),
            tag: Vec::new(),
            limit,
            key,
        }
    }

    /// Number of bytes the decoder accepts next (0 when a frame is complete)
    #[must_use]
    pub fn wants(&self) -> usize {
        match self.section {
            Section::Header => HEADER_SIZE - self.filled,
            Section::Name => self.name_len - self.name.len(),
            Section::Payload => (self.payload_len - self.payload.len()).min(READ_CHUNK),
            Section::Tag => TAG_LEN - self.tag.len(),
            Section::Complete => 0,
        }
    }

    /// Whether any byte of the current frame has been received
    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.section != Section::Header || self.filled > 0
    }

    /// Whether a full frame has been received
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.section == Section::Complete
    }

    /// Feed bytes into the decoder
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::OverLimit`] as soon as a header declaring an
    /// oversized payload is complete, [`CodecError::Malformed`] when more
    /// bytes are pushed than [`wants`](Self::wants) allows or the name is not
    /// UTF-8, and [`CodecError::TagMismatch`] when the tag does not verify.
    pub fn push(&mut self, mut data: &[u8]) -> Result<(), CodecError> {
        while !data.is_empty() {
            let want = self.wants();
            if want == 0 {
                return Err(CodecError::Malformed(format!(
                    "{} bytes past end of frame",
                    data.len()
                )));
            }
            let take = want.min(data.len());
            let (chunk, rest) = data.split_at(take);
            data = rest;

            match self.section {
                Section::Header => {
                    self.header[self.filled..self.filled + take].copy_from_slice(chunk);
                    self.filled += take;
                }
                Section::Name => self.name.extend_from_slice(chunk),
                Section::Payload => self.payload.extend_from_slice(chunk),
                Section::Tag => self.tag.extend_from_slice(chunk),
                Section::Complete => {}
            }
            self.advance()?;
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<(), CodecError> {
        loop {
            if self.wants() > 0 {
                return Ok(());
            }
            self.section = match self.section {
                Section::Header => {
                    self.parse_header()?;
                    Section::Name
                }
                Section::Name => Section::Payload,
                Section::Payload if self.payload.len() < self.payload_len => return Ok(()),
                Section::Payload if self.key.is_some() => Section::Tag,
                Section::Payload | Section::Tag => Section::Complete,
                Section::Complete => return Ok(()),
            };
            if self.section == Section::Complete {
                return self.verify_tag();
            }
        }
    }

    fn parse_header(&mut self) -> Result<(), CodecError> {
        let h = &self.header;
        self.status = u16::from_be_bytes([h[0], h[1]]);
        self.seq = u32::from_be_bytes([h[2], h[3], h[4], h[5]]);
        self.name_len = usize::from(h[6]);
        let declared = u32::from_be_bytes([h[7], h[8], h[9], h[10]]);

        if self.limit > 0 && declared > self.limit {
            return Err(CodecError::OverLimit {
                declared,
                limit: self.limit,
            });
        }

        self.payload_len = usize::try_from(declared)
            .map_err(|_| CodecError::Malformed(format!("payload length {declared}")))?;
        self.name = Vec::with_capacity(self.name_len);
        self.payload = Vec::with_capacity(self.payload_len.min(READ_CHUNK));
        Ok(())
    }

    fn verify_tag(&self) -> Result<(), CodecError> {
        match &self.key {
            Some(key) => key
                .verify(&self.payload, &self.tag)
                .map_err(|_| CodecError::TagMismatch),
            None => Ok(()),
        }
    }

    /// Take the completed frame and reset for the next one
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] if the frame is incomplete or its
    /// name is not valid UTF-8.
    pub fn finish(&mut self) -> Result<Frame, CodecError> {
        if !self.is_complete() {
            return Err(CodecError::Malformed(format!(
                "frame incomplete ({} more bytes expected)",
                self.wants()
            )));
        }
        let name = String::from_utf8(std::mem::take(&mut self.name))
            .map_err(|_| CodecError::Malformed("request name is not UTF-8".to_string()))?;
        let frame = Frame {
            status: self.status,
            seq: self.seq,
            name,
            payload: std::mem::take(&mut self.payload),
        };
        self.reset();
        Ok(frame)
    }

    /// Discard any partial frame
    pub fn reset(&mut self) {
        self.section = Section::Header;
        self.filled = 0;
        self.status = 0;
        self.seq = 0;
        self.name_len = 0;
        self.payload_len = 0;
        self.name.clear();
        self.payload.clear();
        self.tag.clear();
    }
}

/// Drive a decoder from a reader until one frame is complete
///
/// Continues from whatever the decoder already holds, so a caller may feed the
/// first bytes itself (e.g. while also watching for shutdown).
///
/// # Errors
///
/// End of stream at any point yields [`CodecError::Disconnected`]; decoder
/// errors are passed through.
pub async fn read_frame<R>(reader: &mut R, decoder: &mut FrameDecoder) -> Result<Frame, CodecError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; HEADER_SIZE];
    loop {
        let want = decoder.wants();
        if want == 0 {
            return decoder.finish();
        }
        if buf.len() < want {
            buf.resize(want, 0);
        }
        let n = match reader.read(&mut buf[..want]).await {
            Ok(0) => return Err(CodecError::Disconnected),
            Ok(n) => n,
            Err(e) => return Err(io_error(e)),
        };
        decoder.push(&buf[..n])?;
    }
}

/// Read one frame, giving up after `timeout` when one is set
///
/// # Errors
///
/// Returns [`CodecError::Timeout`] if the deadline passes first.
pub async fn read_frame_timeout<R>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
    timeout: Option<Duration>,
) -> Result<Frame, CodecError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, read_frame(reader, decoder))
            .await
            .map_err(|_| CodecError::Timeout)?,
        None => read_frame(reader, decoder).await,
    }
}

/// Encode and write one frame, flushing the writer
///
/// # Errors
///
/// Encoding failures are [`CodecError::Encode`]; write failures are
/// [`CodecError::Io`] (or [`CodecError::Disconnected`] for a closed pipe).
pub async fn write_frame<W>(
    writer: &mut W,
    frame: &Frame,
    key: Option<&AuthKey>,
) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = encode(frame, key)?;
    write_bytes(writer, &bytes).await
}

pub(crate) async fn write_bytes<W>(writer: &mut W, bytes: &[u8]) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let result = async {
        writer.write_all(bytes).await?;
        writer.flush().await
    }
    .await;
    result.map_err(io_error)
}

/// Classify a transport error, folding peer resets into [`CodecError::Disconnected`]
pub(crate) fn io_error(err: std::io::Error) -> CodecError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe => CodecError::Disconnected,
        _ => CodecError::Io(err),
    }
}
