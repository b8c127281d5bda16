//! /sessions handlers: persisted session records and live session control.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use clipstream_services::live::{self, LiveSessionStatus};
use clipstream_services::session::{self, SessionError};
use clipstream_services::SessionRecord;

use super::{parse_session_id, ApiState};

// ── /sessions ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub clips: usize,
    pub live: bool,
}

pub async fn handle_sessions_list(
    State(state): State<ApiState>,
) -> Result<Json<Vec<SessionSummary>>, (StatusCode, String)> {
    let records = session::list_sessions(&state.recordings_dir)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(
        records
            .into_iter()
            .map(|r| SessionSummary {
                session_id: r.id.to_string(),
                start_time: r.start_time,
                clips: r.clips.len(),
                live: state.sessions.contains_key(&r.id),
            })
            .collect(),
    ))
}

// ── /sessions/:id (GET) ──────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SessionInspectResponse {
    #[serde(flatten)]
    pub record: SessionRecord,
    pub live: bool,
    /// Present while the client is connected.
    pub status: Option<LiveSessionStatus>,
}

pub async fn handle_session_inspect(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInspectResponse>, (StatusCode, String)> {
    let id = parse_session_id(&session_id)?;

    let record = session::load_session(&state.recordings_dir, id)
        .await
        .map_err(|e| match e {
            SessionError::Read(_, ref io) if io.kind() == std::io::ErrorKind::NotFound => {
                (StatusCode::NOT_FOUND, "session not found".to_string())
            }
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        })?;

    let status = live::snapshot(&state.sessions)
        .await
        .into_iter()
        .find(|s| s.session_id == id);

    Ok(Json(SessionInspectResponse {
        record,
        live: status.is_some(),
        status,
    }))
}

// ── /sessions/:id (DELETE) ───────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SessionDropResponse {
    pub session_id: String,
    pub dropped: bool,
}

/// Disconnect a live session. Its open substreams are drained as on any
/// other disconnect.
pub async fn handle_session_drop(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDropResponse>, (StatusCode, String)> {
    let id = parse_session_id(&session_id)?;
    let dropped = live::disconnect(&state.sessions, id);

    if dropped {
        tracing::info!(session_id = %id, "session dropped via API");
    }

    Ok(Json(SessionDropResponse {
        session_id,
        dropped,
    }))
}
