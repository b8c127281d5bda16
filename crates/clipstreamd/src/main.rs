//! clipstreamd: multi-stream capture recording daemon.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use clipstream_api::ApiState;
use clipstream_core::config::ClipstreamConfig;
use clipstream_core::TagTable;
use clipstream_services::live;
use clipstream_services::{new_session_table, FfmpegFinalizer, Finalizer, MultiplexerOptions};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = ClipstreamConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = ClipstreamConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ClipstreamConfig::default()
    });
    tracing::info!(config = %ClipstreamConfig::file_path().display(), "clipstreamd starting");

    let tags = Arc::new(TagTable::from_config(&config.streams).context("invalid [streams] table")?);
    for stream in tags.streams() {
        tracing::info!(tag = tags.tag_of(stream), stream = %stream, "substream mapped");
    }

    let recordings_dir = config.storage.recordings_dir.clone();
    tokio::fs::create_dir_all(&recordings_dir)
        .await
        .with_context(|| format!("failed to create {}", recordings_dir.display()))?;
    tracing::info!(path = %recordings_dir.display(), keep_raw = config.storage.keep_raw, "recordings directory");

    // Encoder
    let ffmpeg = FfmpegFinalizer::from_config(&config.encoder);
    match ffmpeg.probe().await {
        Ok(()) => tracing::info!(
            ffmpeg = %config.encoder.ffmpeg_path.display(),
            profile = ?ffmpeg.profile(),
            "encoder ready"
        ),
        Err(e) => tracing::warn!(
            error = %e,
            "encoder probe failed, clips will stay raw until it is available"
        ),
    }
    let finalizer: Arc<dyn Finalizer> = Arc::new(ffmpeg);

    let addr: SocketAddr = format!("{}:{}", config.server.bind_addr, config.server.port)
        .parse()
        .context("invalid server.bind_addr")?;

    let shutdown = CancellationToken::new();
    let connections = TaskTracker::new();
    let sessions = new_session_table();

    // Ctrl-C
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    // Periodic session table snapshot
    {
        let sessions = sessions.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let statuses = live::snapshot(&sessions).await;
                tracing::info!(count = statuses.len(), "session table snapshot");
                for s in statuses {
                    tracing::info!(
                        session_id = %s.session_id,
                        connected_secs = s.connected_secs,
                        open_streams = s.open_streams.len(),
                        clips = s.clips,
                        pending = s.pending_finalizations,
                        "  session"
                    );
                }
            }
        });
    }

    let state = ApiState {
        sessions,
        recordings_dir,
        finalizer,
        tags,
        options: MultiplexerOptions {
            keep_raw: config.storage.keep_raw,
        },
        shutdown: shutdown.clone(),
        connections: connections.clone(),
        started_at: Instant::now(),
    };

    let served = clipstream_api::serve(state, addr).await;
    if let Err(e) = &served {
        tracing::error!(error = %e, "server failed");
        shutdown.cancel();
    }

    // Every driver observes a child token and drains before its task ends.
    connections.close();
    tracing::info!(connections = connections.len(), "waiting for sessions to drain");
    connections.wait().await;
    tracing::info!("clipstreamd stopped");
    served
}
