//! Connection driver: reads one client's transport messages in order and
//! feeds the stream multiplexer.
//!
//! The driver is transport-agnostic: the WebSocket handler maps frames into
//! [`TransportMessage`] and owns the socket writer, which drains the
//! outbound channel.

use std::fmt::Display;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use clipstream_core::{
    ControlMessage, OutboundMessage, SessionHello, StreamAction, TagTable,
};

use crate::multiplexer::StreamMultiplexer;

/// One inbound transport message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    Text(String),
    Binary(Bytes),
    Close,
}

/// Why the read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    ClientClosed,
    TransportError,
    Cancelled,
}

/// Counters for one connection, logged when it ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub control_messages: u64,
    pub frames: u64,
    pub payload_bytes: u64,
    pub rejected_frames: u64,
    /// Substreams still open at disconnect and flushed by the drain.
    pub drained_streams: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub reason: CloseReason,
    pub stats: ConnectionStats,
}

pub struct ConnectionDriver {
    mux: Arc<StreamMultiplexer>,
    tags: Arc<TagTable>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    cancel: CancellationToken,
    stats: ConnectionStats,
}

impl ConnectionDriver {
    pub fn new(
        mux: Arc<StreamMultiplexer>,
        tags: Arc<TagTable>,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            mux,
            tags,
            outbound,
            cancel,
            stats: ConnectionStats::default(),
        }
    }

    /// Send the session hello, process messages until the transport ends or
    /// the token is cancelled, then drain every open substream.
    pub async fn run<S, E>(mut self, mut inbound: S) -> ConnectionSummary
    where
        S: Stream<Item = Result<TransportMessage, E>> + Unpin,
        E: Display,
    {
        let session_id = self.mux.session().id();
        self.send(OutboundMessage::Hello(SessionHello {
            session_id: session_id.to_string(),
        }));

        let reason = loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break CloseReason::Cancelled,
                next = inbound.next() => next,
            };
            match next {
                None | Some(Ok(TransportMessage::Close)) => break CloseReason::ClientClosed,
                Some(Err(e)) => {
                    tracing::warn!(session_id = %session_id, error = %e, "transport error");
                    break CloseReason::TransportError;
                }
                Some(Ok(TransportMessage::Text(text))) => self.handle_text(&text).await,
                Some(Ok(TransportMessage::Binary(frame))) => self.handle_frame(&frame).await,
            }
        };

        self.stats.drained_streams = self.mux.drain().await;
        tracing::info!(
            session_id = %session_id,
            reason = ?reason,
            frames = self.stats.frames,
            payload_bytes = self.stats.payload_bytes,
            rejected_frames = self.stats.rejected_frames,
            drained = self.stats.drained_streams,
            "connection closed"
        );
        ConnectionSummary {
            reason,
            stats: self.stats,
        }
    }

    async fn handle_text(&mut self, text: &str) {
        self.stats.control_messages += 1;
        let message = match ControlMessage::decode(text) {
            Ok(message) => message,
            Err(e) if e.is_unknown_type() => {
                tracing::debug!(error = %e, "ignoring control message");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed control message");
                self.send(OutboundMessage::error(e.to_string()));
                return;
            }
        };

        let ControlMessage::StreamStateChange {
            stream_type,
            action,
        } = message;
        let Some(stream) = self.tags.stream(&stream_type).cloned() else {
            tracing::warn!(stream = %stream_type, "control message names unknown stream");
            self.send(OutboundMessage::error(format!(
                "unknown stream type {stream_type:?}"
            )));
            return;
        };

        match action {
            StreamAction::Start => {
                if let Err(e) = self.mux.on_start(&stream).await {
                    tracing::warn!(stream = %stream, error = %e, "failed to start recording");
                    self.send(OutboundMessage::error(format!(
                        "failed to start {stream} recording"
                    )));
                }
            }
            StreamAction::Stop => {
                self.mux.on_stop(&stream).await;
            }
        }
    }

    async fn handle_frame(&mut self, frame: &Bytes) {
        self.stats.frames += 1;
        let (stream, payload) = match self.tags.demux(frame) {
            Ok(routed) => routed,
            Err(e) => {
                self.stats.rejected_frames += 1;
                tracing::debug!(len = frame.len(), error = %e, "discarding binary frame");
                return;
            }
        };

        match self.mux.on_payload(&stream, &payload).await {
            Ok(true) => self.stats.payload_bytes += payload.len() as u64,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(stream = %stream, error = %e, "failed to write payload");
                self.send(OutboundMessage::error(format!(
                    "failed to write {stream} payload"
                )));
            }
        }
    }

    fn send(&self, message: OutboundMessage) {
        let _ = self.outbound.send(message);
    }
}
