//! Stream multiplexer: routes control events and payload frames to
//! per-substream recordings.
//!
//! Locking:
//! - `streams` guards the map of open substreams and the per-substream clip
//!   counters. It is held only for lookup, insert and remove (plus opening the
//!   new temp file on start, so two racing starts cannot both win).
//! - Each open substream has its own lock around its recording handle, so a
//!   write to `screen` never waits on `camera`.
//! - Stop and drain only move the StreamState out of the map and spawn its
//!   finalization. Closing the file, encoding and the metadata append all run
//!   in that task, tracked by `finalizations`.
//! - Finalizations of one substream encode concurrently but enter the clip
//!   log in clip order: each waits for its predecessor before appending.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use clipstream_core::{OutboundMessage, ServerEvent, StreamType};

use crate::finalizer::{FinalizeRequest, Finalizer};
use crate::recording::{ClosedRecording, RecordingError, TempRecording};
use crate::session::{Clip, Session};

/// Extension of raw recordings. Capture clients send WebM fragments.
pub const RAW_EXTENSION: &str = "webm";

#[derive(Debug, Clone, Copy, Default)]
pub struct MultiplexerOptions {
    /// Keep the raw recording after a successful finalize.
    pub keep_raw: bool,
}

/// An open substream recording.
struct StreamState {
    /// Taken exactly once, by whoever closes the recording.
    handle: Option<TempRecording>,
    clip_number: u32,
    relative_start: f64,
    last_write: Option<Instant>,
}

#[derive(Default)]
struct StreamTable {
    open: HashMap<StreamType, Arc<Mutex<StreamState>>>,
    /// Next clip number per substream. Survives stop/start cycles.
    next_clip: HashMap<StreamType, u32>,
    /// Most recently spawned finalization per substream.
    finalizing: HashMap<StreamType, JoinHandle<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { clip_number: u32 },
    AlreadyOpen,
}

/// Point-in-time view of one open substream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamSnapshot {
    pub stream_type: String,
    pub clip_number: u32,
    pub relative_start: f64,
    pub bytes_written: u64,
    /// Seconds since the last payload write, if any.
    pub idle_secs: Option<f64>,
}

pub struct StreamMultiplexer {
    session: Arc<Session>,
    finalizer: Arc<dyn Finalizer>,
    options: MultiplexerOptions,
    streams: Mutex<StreamTable>,
    finalizations: TaskTracker,
    events: mpsc::UnboundedSender<OutboundMessage>,
}

impl StreamMultiplexer {
    pub fn new(
        session: Arc<Session>,
        finalizer: Arc<dyn Finalizer>,
        options: MultiplexerOptions,
        events: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Self {
        Self {
            session,
            finalizer,
            options,
            streams: Mutex::new(StreamTable::default()),
            finalizations: TaskTracker::new(),
            events,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Open a recording for `stream`. A second start while one is open is a no-op.
    pub async fn on_start(&self, stream: &StreamType) -> Result<StartOutcome, RecordingError> {
        let mut table = self.streams.lock().await;
        if table.open.contains_key(stream) {
            tracing::debug!(
                session_id = %self.session.id(),
                stream = %stream,
                "start ignored, recording already open"
            );
            return Ok(StartOutcome::AlreadyOpen);
        }

        let clip_number = table.next_clip.get(stream).copied().unwrap_or(0);
        let path = self
            .session
            .raw_dir()
            .join(format!("{stream}_{clip_number}.{RAW_EXTENSION}"));
        let handle = TempRecording::create(&path).await?;
        let relative_start = self.session.elapsed_secs();

        table.next_clip.insert(stream.clone(), clip_number + 1);
        table.open.insert(
            stream.clone(),
            Arc::new(Mutex::new(StreamState {
                handle: Some(handle),
                clip_number,
                relative_start,
                last_write: None,
            })),
        );
        drop(table);

        tracing::info!(
            session_id = %self.session.id(),
            stream = %stream,
            clip = clip_number,
            relative_start,
            "recording started"
        );
        self.notify(ServerEvent::StartAck {
            stream_type: stream.to_string(),
            clip_number,
        });
        Ok(StartOutcome::Started { clip_number })
    }

    /// Append payload bytes to the open recording for `stream`.
    ///
    /// Returns `Ok(false)` when no recording is open; the bytes are dropped.
    pub async fn on_payload(&self, stream: &StreamType, bytes: &[u8]) -> Result<bool, RecordingError> {
        let state = self.streams.lock().await.open.get(stream).cloned();
        let Some(state) = state else {
            tracing::trace!(
                stream = %stream,
                bytes = bytes.len(),
                "payload dropped, no open recording"
            );
            return Ok(false);
        };

        let mut guard = state.lock().await;
        // Closed between the lookup and here.
        let Some(handle) = guard.handle.as_mut() else {
            return Ok(false);
        };
        handle.write(bytes).await?;
        guard.last_write = Some(Instant::now());
        Ok(true)
    }

    /// Close the recording for `stream` and hand it to the finalizer.
    ///
    /// Returns `false` when nothing was open. Does not wait for the encode.
    pub async fn on_stop(&self, stream: &StreamType) -> bool {
        let relative_end = self.session.elapsed_secs();
        let mut table = self.streams.lock().await;
        let Some(state) = table.open.remove(stream) else {
            drop(table);
            tracing::debug!(
                session_id = %self.session.id(),
                stream = %stream,
                "stop ignored, no open recording"
            );
            return false;
        };
        self.spawn_finalize(&mut table, stream.clone(), state, relative_end);
        true
    }

    /// Stop every open substream and wait for all finalizations, including
    /// ones started by earlier stops. Returns how many substreams were open.
    pub async fn drain(&self) -> usize {
        // Every clip cut by the disconnect ends at the same instant.
        let relative_end = self.session.elapsed_secs();
        let mut table = self.streams.lock().await;
        let mut open: Vec<_> = table.open.drain().collect();
        open.sort_by(|a, b| a.0.cmp(&b.0));
        let count = open.len();

        for (stream, state) in open {
            self.spawn_finalize(&mut table, stream, state, relative_end);
        }
        drop(table);

        self.finalizations.close();
        self.finalizations.wait().await;
        tracing::info!(
            session_id = %self.session.id(),
            flushed = count,
            "session drained"
        );
        count
    }

    pub async fn is_open(&self, stream: &StreamType) -> bool {
        self.streams.lock().await.open.contains_key(stream)
    }

    pub async fn open_streams(&self) -> Vec<StreamSnapshot> {
        let open: Vec<_> = self
            .streams
            .lock()
            .await
            .open
            .iter()
            .map(|(stream, state)| (stream.clone(), state.clone()))
            .collect();

        let mut snapshots = Vec::with_capacity(open.len());
        for (stream, state) in open {
            let guard = state.lock().await;
            let Some(handle) = guard.handle.as_ref() else {
                continue;
            };
            snapshots.push(StreamSnapshot {
                stream_type: stream.to_string(),
                clip_number: guard.clip_number,
                relative_start: guard.relative_start,
                bytes_written: handle.bytes_written(),
                idle_secs: guard.last_write.map(|t| t.elapsed().as_secs_f64()),
            });
        }
        snapshots.sort_by(|a, b| a.stream_type.cmp(&b.stream_type));
        snapshots
    }

    /// Finalizations spawned and not yet finished.
    pub fn pending_finalizations(&self) -> usize {
        self.finalizations.len()
    }

    /// Called with the table lock held, so jobs of one substream are chained
    /// in the order their recordings left the map.
    fn spawn_finalize(
        &self,
        table: &mut StreamTable,
        stream: StreamType,
        state: Arc<Mutex<StreamState>>,
        relative_end: f64,
    ) {
        let previous = table.finalizing.remove(&stream);
        let job = FinalizeJob {
            session: self.session.clone(),
            finalizer: self.finalizer.clone(),
            events: self.events.clone(),
            keep_raw: self.options.keep_raw,
            stream: stream.clone(),
            state,
            relative_end,
            previous,
        };
        let handle = self.finalizations.spawn(job.run());
        table.finalizing.insert(stream, handle);
    }

    fn notify(&self, event: ServerEvent) {
        // Client may already be gone.
        let _ = self.events.send(event.into());
    }
}

/// One stopped recording on its way into the session's clip log.
struct FinalizeJob {
    session: Arc<Session>,
    finalizer: Arc<dyn Finalizer>,
    events: mpsc::UnboundedSender<OutboundMessage>,
    keep_raw: bool,
    stream: StreamType,
    state: Arc<Mutex<StreamState>>,
    relative_end: f64,
    /// Finalization of the previous clip of the same substream.
    previous: Option<JoinHandle<()>>,
}

/// Close `handle`. If the flush or sync fails, whatever reached the file is
/// still handed on for encoding.
async fn close_recording(handle: TempRecording) -> ClosedRecording {
    let salvaged = ClosedRecording {
        path: handle.path().to_path_buf(),
        bytes_written: handle.bytes_written(),
    };
    match handle.close().await {
        Ok(closed) => closed,
        Err(e) => {
            tracing::warn!(
                raw = %salvaged.path.display(),
                error = %e,
                "failed to close recording cleanly"
            );
            salvaged
        }
    }
}

impl FinalizeJob {
    async fn run(mut self) {
        let Some((request, relative_start)) = self.close().await else {
            self.wait_for_previous().await;
            return;
        };
        let relative_end = self.relative_end.max(relative_start);
        let encoded = self.finalizer.finalize(&request).await;
        self.wait_for_previous().await;

        let session_id = self.session.id();
        let stream = self.stream.to_string();
        let clip_number = request.clip_number;

        let file_name = match encoded {
            Ok(file_name) => file_name,
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    stream = %stream,
                    clip = clip_number,
                    raw = %request.input.display(),
                    error = %e,
                    "finalization failed, raw recording kept"
                );
                self.notify(OutboundMessage::error(format!(
                    "failed to finalize {stream} clip {clip_number}"
                )));
                return;
            }
        };

        let clip = Clip {
            stream_type: stream.clone(),
            file_name: file_name.clone(),
            start_time: relative_start,
            end_time: relative_end,
            clip_number,
        };
        if let Err(e) = self.session.append_clip(clip).await {
            tracing::error!(
                session_id = %session_id,
                stream = %stream,
                clip = clip_number,
                error = %e,
                "clip encoded but metadata write failed"
            );
            self.notify(OutboundMessage::error(format!(
                "failed to record {stream} clip {clip_number}"
            )));
            return;
        }

        if !self.keep_raw {
            if let Err(e) = tokio::fs::remove_file(&request.input).await {
                tracing::warn!(
                    raw = %request.input.display(),
                    error = %e,
                    "failed to remove raw recording"
                );
            }
        }

        tracing::info!(
            session_id = %session_id,
            stream = %stream,
            clip = clip_number,
            file = %file_name,
            "clip recorded"
        );
        self.notify(
            ServerEvent::EndAck {
                stream_type: stream,
                clip_number,
                file_name,
                start_time: relative_start,
                end_time: relative_end,
            }
            .into(),
        );
    }

    /// Take the recording out of its StreamState and close it. A payload
    /// write already holding the state lock lands first.
    async fn close(&self) -> Option<(FinalizeRequest, f64)> {
        let mut guard = self.state.lock().await;
        let handle = guard.handle.take()?;
        let clip_number = guard.clip_number;
        let relative_start = guard.relative_start;
        drop(guard);

        let closed = close_recording(handle).await;
        tracing::info!(
            session_id = %self.session.id(),
            stream = %self.stream,
            clip = clip_number,
            bytes = closed.bytes_written,
            relative_start,
            relative_end = self.relative_end,
            "recording stopped"
        );

        let request = FinalizeRequest {
            input: closed.path,
            session_dir: self.session.dir().to_path_buf(),
            stream_type: self.stream.clone(),
            clip_number,
        };
        Some((request, relative_start))
    }

    async fn wait_for_previous(&mut self) {
        if let Some(previous) = self.previous.take() {
            // A panicked predecessor appended nothing to wait for.
            let _ = previous.await;
        }
    }

    fn notify(&self, message: OutboundMessage) {
        let _ = self.events.send(message);
    }
}
