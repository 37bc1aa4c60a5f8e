//! Server-side connection state machine
//!
//! ```text
//! Accepted ─► AwaitingFrame ─► Decoding ─► Dispatching ─► Encoding ─┐
//!                  ▲                                                │
//!                  └────────────────────────────────────────────────┘
//!                  any terminal transition ─► Terminated
//! ```
//!
//! The connection state (sequence counter, decoder, last status) is owned by
//! the task; nothing else touches it. While idle between frames the task
//! also watches the shutdown signal. Once the first byte of a frame has
//! arrived the request is always read, dispatched and answered.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;

use super::{signalled, Context};
use crate::dispatch::{Args, PROTOCHECK};
use crate::frame::{self, read_frame, write_frame, CodecError, Frame, FrameDecoder};
use crate::notify::{ConnectionId, Msg, Notifier};
use crate::status::{
    self, Severity, CONNECTED, DISPATCHING, EMPTY_REQUEST, HANDLER_ERROR, INTERNAL_ERROR,
    NETWORK_ERROR, SESSION_ENDED, SHUTDOWN, UNKNOWN_COMMAND,
};
use crate::transport::BoxStream;

/// What to do after one pass through the loop
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Continue,
    Terminate,
}

pub(crate) struct Connection {
    id: ConnectionId,
    seq: u32,
    last_status: u16,
    peer: String,
    stream: BoxStream,
    decoder: FrameDecoder,
    ctx: Arc<Context>,
    notifier: Notifier,
    shutdown: watch::Receiver<bool>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        stream: BoxStream,
        peer: String,
        ctx: Arc<Context>,
        notifier: Notifier,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let decoder = FrameDecoder::new(ctx.payload_limit, ctx.key.clone());
        Self {
            id,
            seq: 0,
            last_status: 0,
            peer,
            stream,
            decoder,
            ctx,
            notifier,
            shutdown,
        }
    }

    /// Serve requests until a terminal transition, then close the stream
    pub(crate) async fn run(mut self) {
        let peer = self.ctx.log_peer.then(|| self.peer.clone());
        self.emit(Msg::new(self.id, self.seq, CONNECTED).with_peer(peer));

        while self.cycle().await == Step::Continue {}

        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!(conn_id = %self.id, error = %e, "Stream shutdown failed");
        }
        tracing::debug!(
            conn_id = %self.id,
            requests = self.seq,
            last_status = self.last_status,
            "Connection closed"
        );
    }

    async fn cycle(&mut self) -> Step {
        let frame = match self.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.emit(Msg::new(self.id, self.seq, SHUTDOWN));
                return Step::Terminate;
            }
            Err(e) => {
                let code = e.status();
                self.emit(Msg::new(self.id, self.seq, code).with_error(e));
                // Best effort: the connection is going away either way.
                let _ = self.send_canned(code, self.seq, "").await;
                return Step::Terminate;
            }
        };

        if frame.is_nil() {
            self.emit(Msg::new(self.id, self.seq, EMPTY_REQUEST));
            return self.send_canned(EMPTY_REQUEST, frame.seq, "").await;
        }

        self.seq = self.seq.wrapping_add(1);
        let Frame {
            seq, name, payload, ..
        } = frame;

        let Some(route) = self.ctx.registry.lookup(&name) else {
            self.emit(Msg::new(self.id, self.seq, UNKNOWN_COMMAND).with_name(name.as_str()));
            return self.send_canned(UNKNOWN_COMMAND, seq, &name).await;
        };

        self.emit(Msg::new(self.id, self.seq, DISPATCHING).with_name(name.as_str()));
        let result = route.handler.call(Args::new(route.mode, payload)).await;

        match result {
            Ok(reply) => {
                let response = Frame::response(reply.status, seq, name.as_str(), reply.payload);
                if self.send(&response).await == Step::Terminate {
                    return Step::Terminate;
                }
                let handshake = name == PROTOCHECK;
                self.emit(Msg::new(self.id, self.seq, reply.status).with_name(name));
                if status::severity(reply.status) == Severity::Fatal {
                    return Step::Terminate;
                }
                // The handshake is not the one request a one-shot session serves.
                if self.ctx.timeout.is_one_shot() && !handshake {
                    self.emit(Msg::new(self.id, self.seq, SESSION_ENDED));
                    return Step::Terminate;
                }
                Step::Continue
            }
            Err(err) => {
                let fatal = err.is_fatal();
                self.emit(
                    Msg::new(self.id, self.seq, HANDLER_ERROR)
                        .with_name(name.as_str())
                        .with_error(err.source),
                );
                if self.send_canned(HANDLER_ERROR, seq, &name).await == Step::Terminate || fatal {
                    return Step::Terminate;
                }
                Step::Continue
            }
        }
    }

    /// Read the next frame, or `None` if shutdown arrived while idle
    async fn next_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        let deadline = self.ctx.timeout.read_deadline();
        let stream = &mut self.stream;
        let decoder = &mut self.decoder;
        let shutdown = &mut self.shutdown;

        let read = async move {
            if !decoder.in_progress() {
                let mut first = [0u8; 1];
                let n = tokio::select! {
                    biased;
                    () = signalled(shutdown) => return Ok(None),
                    n = stream.read(&mut first) => n.map_err(frame::io_error)?,
                };
                if n == 0 {
                    return Err(CodecError::Disconnected);
                }
                decoder.push(&first)?;
            }
            read_frame(stream, decoder).await.map(Some)
        };

        match deadline {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .unwrap_or(Err(CodecError::Timeout)),
            None => read.await,
        }
    }

    /// Write a frame; failures are reported and end the connection
    async fn send(&mut self, response: &Frame) -> Step {
        match write_frame(&mut self.stream, response, self.ctx.key.as_ref()).await {
            Ok(()) => Step::Continue,
            Err(e) => {
                let code = match e {
                    CodecError::Encode(_) => INTERNAL_ERROR,
                    _ => NETWORK_ERROR,
                };
                self.emit(Msg::new(self.id, self.seq, code).with_error(e));
                Step::Terminate
            }
        }
    }

    /// Send the canned reply for a status, if it has one
    async fn send_canned(&mut self, code: u16, seq: u32, name: &str) -> Step {
        match status::canned(code) {
            Some(payload) => {
                let response = Frame::response(code, seq, name, payload);
                self.send(&response).await
            }
            None => Step::Continue,
        }
    }

    fn emit(&mut self, msg: Msg) {
        self.last_status = msg.status;
        self.notifier.notify(msg);
    }
}
