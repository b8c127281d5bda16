//! HTTP API handlers: exposes daemon state as JSON.

pub mod sessions;
pub mod status;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use clipstream_core::TagTable;
use clipstream_services::{Finalizer, MultiplexerOptions, SessionTable};

#[derive(Clone)]
pub struct ApiState {
    pub sessions: SessionTable,
    /// Root directory holding one subdirectory per session.
    pub recordings_dir: PathBuf,
    pub finalizer: Arc<dyn Finalizer>,
    pub tags: Arc<TagTable>,
    pub options: MultiplexerOptions,
    /// Root shutdown token; each connection holds a child.
    pub shutdown: CancellationToken,
    /// Tracks connection tasks so shutdown can wait for their drains.
    pub connections: TaskTracker,
    pub started_at: Instant,
}

fn parse_session_id(id: &str) -> Result<Uuid, (StatusCode, String)> {
    Uuid::parse_str(id).map_err(|_| (StatusCode::BAD_REQUEST, "invalid session id".to_string()))
}

pub use sessions::{handle_session_drop, handle_session_inspect, handle_sessions_list};
pub use status::{handle_shutdown, handle_status};
