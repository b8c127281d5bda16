//! clipstream integration test harness.
//!
//! Tests drive a real `ConnectionDriver` and `StreamMultiplexer` over an
//! in-memory transport, with a scripted finalizer standing in for ffmpeg.
//! Everything lands in a per-test temp directory.
//!
//!   cargo test --test integration

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use clipstream_core::{OutboundMessage, ServerEvent, TagTable};
use clipstream_services::{
    ConnectionDriver, ConnectionSummary, FinalizeError, FinalizeRequest, Finalizer,
    MultiplexerOptions, Session, StreamMultiplexer, TransportMessage,
};

mod driver;
mod persistence;

// ── Scripted finalizer ────────────────────────────────────────────────────────

/// Copies the raw recording to `<stream>_<n>.webm`. Per-substream delays
/// and failures are configurable.
#[derive(Default)]
pub struct ScriptedFinalizer {
    pub calls: Mutex<Vec<FinalizeRequest>>,
    delays: HashMap<String, Duration>,
    failing: Vec<String>,
}

impl ScriptedFinalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(mut self, stream: &str, delay: Duration) -> Self {
        self.delays.insert(stream.to_string(), delay);
        self
    }

    pub fn failing(mut self, stream: &str) -> Self {
        self.failing.push(stream.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Finalizer for ScriptedFinalizer {
    async fn finalize(&self, request: &FinalizeRequest) -> Result<String, FinalizeError> {
        self.calls.lock().unwrap().push(request.clone());
        let stream = request.stream_type.as_str();

        if let Some(delay) = self.delays.get(stream) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.iter().any(|s| s == stream) {
            return Err(FinalizeError::Encoder {
                code: 1,
                output: "scripted failure".to_string(),
            });
        }

        let name = request.artifact_name("webm");
        tokio::fs::copy(&request.input, request.session_dir.join(&name))
            .await
            .map_err(|e| FinalizeError::Other(e.to_string()))?;
        Ok(name)
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

pub type Inbound = Result<TransportMessage, std::io::Error>;

/// One connected client: the driver runs in its own task.
pub struct Harness {
    pub root: tempfile::TempDir,
    pub session: Arc<Session>,
    pub mux: Arc<StreamMultiplexer>,
    pub cancel: CancellationToken,
    pub finalizer: Arc<ScriptedFinalizer>,
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    driver: Option<JoinHandle<ConnectionSummary>>,
}

impl Harness {
    pub async fn start(finalizer: ScriptedFinalizer) -> Result<Self> {
        Self::start_with(finalizer, TagTable::default(), MultiplexerOptions::default()).await
    }

    pub async fn start_with(
        finalizer: ScriptedFinalizer,
        tags: TagTable,
        options: MultiplexerOptions,
    ) -> Result<Self> {
        let root = tempfile::tempdir().context("tempdir")?;
        let session = Session::create(root.path()).await?;
        let finalizer = Arc::new(finalizer);

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let mux = Arc::new(StreamMultiplexer::new(
            session.clone(),
            finalizer.clone(),
            options,
            out_tx.clone(),
        ));
        let cancel = CancellationToken::new();
        let driver = ConnectionDriver::new(mux.clone(), Arc::new(tags), out_tx, cancel.clone());

        let (in_tx, in_rx) = mpsc::unbounded_channel::<Inbound>();
        let inbound = Box::pin(futures::stream::unfold(in_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }));
        let driver = tokio::spawn(driver.run(inbound));

        Ok(Self {
            root,
            session,
            mux,
            cancel,
            finalizer,
            inbound: Some(in_tx),
            outbound: out_rx,
            driver: Some(driver),
        })
    }

    fn push(&self, message: Inbound) -> Result<()> {
        self.inbound
            .as_ref()
            .context("transport already closed")?
            .send(message)
            .ok()
            .context("driver is gone")
    }

    pub fn control(&self, stream: &str, action: &str) -> Result<()> {
        self.push(Ok(TransportMessage::Text(format!(
            r#"{{"type":"streamStateChange","streamType":"{stream}","action":"{action}"}}"#
        ))))
    }

    pub fn text(&self, raw: &str) -> Result<()> {
        self.push(Ok(TransportMessage::Text(raw.to_string())))
    }

    pub fn frame(&self, payload: &[u8], tag: u8) -> Result<()> {
        let mut bytes = payload.to_vec();
        bytes.push(tag);
        self.push(Ok(TransportMessage::Binary(Bytes::from(bytes))))
    }

    /// Start `stream` and wait until the recording is open.
    pub async fn start_stream(&mut self, stream: &str) -> Result<u32> {
        self.control(stream, "start")?;
        match self
            .next_event(|e| matches!(e, ServerEvent::StartAck { stream_type, .. } if stream_type == stream))
            .await?
        {
            ServerEvent::StartAck { clip_number, .. } => Ok(clip_number),
            _ => unreachable!(),
        }
    }

    /// Next outbound message, with a timeout.
    pub async fn next_message(&mut self) -> Result<OutboundMessage> {
        tokio::time::timeout(Duration::from_secs(5), self.outbound.recv())
            .await
            .context("timed out waiting for an outbound message")?
            .context("outbound channel closed")
    }

    /// Skip messages until one matches.
    pub async fn next_event(&mut self, pred: impl Fn(&ServerEvent) -> bool) -> Result<ServerEvent> {
        loop {
            if let OutboundMessage::Event(event) = self.next_message().await? {
                if pred(&event) {
                    return Ok(event);
                }
            }
        }
    }

    /// Close the transport cleanly and wait for the drain.
    pub async fn close(&mut self) -> Result<ConnectionSummary> {
        self.push(Ok(TransportMessage::Close))?;
        self.join().await
    }

    /// Fail the transport mid-session and wait for the drain.
    pub async fn fail_transport(&mut self) -> Result<ConnectionSummary> {
        self.push(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )))?;
        self.join().await
    }

    /// Wait for the driver to finish. The transport stays open, so the
    /// driver must end on its own (close frame, error or cancellation).
    pub async fn join(&mut self) -> Result<ConnectionSummary> {
        let Some(driver) = self.driver.take() else {
            bail!("driver already joined");
        };
        let summary = tokio::time::timeout(Duration::from_secs(10), driver)
            .await
            .context("driver did not finish draining")?
            .context("driver panicked")?;
        self.inbound.take();
        Ok(summary)
    }

    /// Everything still queued on the outbound channel.
    pub fn drain_messages(&mut self) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.outbound.try_recv() {
            out.push(msg);
        }
        out
    }

    pub fn raw_file(&self, name: &str) -> std::path::PathBuf {
        self.session.raw_dir().join(name)
    }
}

pub fn end_acks(messages: &[OutboundMessage]) -> Vec<(String, u32)> {
    messages
        .iter()
        .filter_map(|m| match m {
            OutboundMessage::Event(ServerEvent::EndAck {
                stream_type,
                clip_number,
                ..
            }) => Some((stream_type.clone(), *clip_number)),
            _ => None,
        })
        .collect()
}

pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
