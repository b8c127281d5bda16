//! Live session table: every connected client, keyed by session id.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::multiplexer::{StreamMultiplexer, StreamSnapshot};
use crate::session::Session;

/// A connected session. Removed from the table once its drain finished.
pub struct LiveSession {
    pub session: Arc<Session>,
    pub mux: Arc<StreamMultiplexer>,
    /// Cancelling ends the connection; the driver drains before exiting.
    pub cancel: CancellationToken,
    pub connected_at: Instant,
}

/// Status view of a live session.
#[derive(Debug, Clone, Serialize)]
pub struct LiveSessionStatus {
    pub session_id: Uuid,
    pub connected_secs: u64,
    pub open_streams: Vec<StreamSnapshot>,
    pub clips: usize,
    pub pending_finalizations: usize,
}

impl LiveSession {
    pub async fn status(&self) -> LiveSessionStatus {
        status_of(&self.session, &self.mux, self.connected_at).await
    }
}

async fn status_of(
    session: &Session,
    mux: &StreamMultiplexer,
    connected_at: Instant,
) -> LiveSessionStatus {
    LiveSessionStatus {
        session_id: session.id(),
        connected_secs: connected_at.elapsed().as_secs(),
        open_streams: mux.open_streams().await,
        clips: session.clips().await.len(),
        pending_finalizations: mux.pending_finalizations(),
    }
}

/// The live session table, shared across all tasks.
pub type SessionTable = Arc<DashMap<Uuid, LiveSession>>;

pub fn new_session_table() -> SessionTable {
    Arc::new(DashMap::new())
}

/// Status of every live session, oldest connection first.
///
/// Entries are cloned out before awaiting so no shard lock is held across
/// an await.
pub async fn snapshot(table: &SessionTable) -> Vec<LiveSessionStatus> {
    let live: Vec<(Arc<Session>, Arc<StreamMultiplexer>, Instant)> = table
        .iter()
        .map(|entry| {
            let s = entry.value();
            (s.session.clone(), s.mux.clone(), s.connected_at)
        })
        .collect();

    let mut statuses = Vec::with_capacity(live.len());
    for (session, mux, connected_at) in live {
        statuses.push(status_of(&session, &mux, connected_at).await);
    }
    statuses.sort_by(|a, b| b.connected_secs.cmp(&a.connected_secs));
    statuses
}

/// Cancel the live session `id`. Returns `false` if it is not connected.
pub fn disconnect(table: &SessionTable, id: Uuid) -> bool {
    match table.get(&id) {
        Some(entry) => {
            entry.cancel.cancel();
            true
        }
        None => false,
    }
}
