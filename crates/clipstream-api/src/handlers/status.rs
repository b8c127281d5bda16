//! /status and /daemon/shutdown handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use clipstream_services::live::{self, LiveSessionStatus};

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub recordings_dir: String,
    pub streams: Vec<StreamTag>,
    pub sessions: Vec<LiveSessionStatus>,
}

#[derive(Serialize)]
pub struct StreamTag {
    pub tag: u8,
    pub stream: String,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let streams = state
        .tags
        .streams()
        .into_iter()
        .filter_map(|s| {
            state.tags.tag_of(s).map(|tag| StreamTag {
                tag,
                stream: s.to_string(),
            })
        })
        .collect();

    Json(StatusResponse {
        uptime_secs: state.started_at.elapsed().as_secs(),
        recordings_dir: state.recordings_dir.display().to_string(),
        streams,
        sessions: live::snapshot(&state.sessions).await,
    })
}

// ── /daemon/shutdown ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ShutdownResponse {
    pub message: String,
    pub live_sessions: usize,
}

/// Cancel the root token. Live sessions drain before the daemon exits.
pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");
    state.shutdown.cancel();
    Json(ShutdownResponse {
        message: "Shutdown initiated".to_string(),
        live_sessions: state.sessions.len(),
    })
}
