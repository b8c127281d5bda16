//! Session identity and the persisted clip log.
//!
//! Each connection owns one [`Session`]. Its directory layout under the
//! recordings root is:
//!
//! ```text
//! <root>/<session id>/
//!     metadata.json        full SessionRecord, rewritten on every append
//!     <stream>_<n>.<ext>   finalized artifacts
//!     raw/                 temporary recordings
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

pub const METADATA_FILE: &str = "metadata.json";
pub const RAW_DIR: &str = "raw";

/// One finalized, time-bounded recording of a substream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    #[serde(rename = "type")]
    pub stream_type: String,
    #[serde(rename = "filename")]
    pub file_name: String,
    /// Seconds since the session started.
    pub start_time: f64,
    pub end_time: f64,
    pub clip_number: u32,
}

/// On-disk shape of `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub clips: Vec<Clip>,
}

/// Borrowed view of a record so persisting doesn't clone the clip list.
#[derive(Serialize)]
struct RecordView<'a> {
    id: Uuid,
    start_time: DateTime<Utc>,
    clips: &'a [Clip],
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to create {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to write {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, serde_json::Error),
    #[error("failed to serialize session record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A live session: identity, start time and the clip log.
pub struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    started: Instant,
    dir: PathBuf,
    /// Clip log. The lock also serializes metadata writes.
    clips: Mutex<Vec<Clip>>,
}

impl Session {
    /// Create a new session directory under `root` and persist an empty record.
    pub async fn create(root: &Path) -> Result<Arc<Self>, SessionError> {
        let id = Uuid::new_v4();
        let dir = root.join(id.to_string());
        let raw = dir.join(RAW_DIR);
        tokio::fs::create_dir_all(&raw)
            .await
            .map_err(|e| SessionError::CreateDir(raw.clone(), e))?;

        let session = Arc::new(Self {
            id,
            started_at: Utc::now(),
            started: Instant::now(),
            dir,
            clips: Mutex::new(Vec::new()),
        });

        {
            let clips = session.clips.lock().await;
            session.persist(&clips).await?;
        }

        tracing::info!(
            session_id = %id,
            dir = %session.dir.display(),
            "session created"
        );
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.dir.join(RAW_DIR)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// Seconds since the session started (monotonic).
    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Append a clip and rewrite the metadata file before returning.
    ///
    /// If the write fails the clip is dropped from the in-memory log too, so
    /// memory and disk never disagree.
    pub async fn append_clip(&self, clip: Clip) -> Result<(), SessionError> {
        let mut clips = self.clips.lock().await;
        clips.push(clip);
        if let Err(e) = self.persist(&clips).await {
            clips.pop();
            return Err(e);
        }
        tracing::debug!(session_id = %self.id, clips = clips.len(), "session metadata written");
        Ok(())
    }

    pub async fn clips(&self) -> Vec<Clip> {
        self.clips.lock().await.clone()
    }

    pub async fn record(&self) -> SessionRecord {
        SessionRecord {
            id: self.id,
            start_time: self.started_at,
            clips: self.clips().await,
        }
    }

    /// Write the full record to a temp sibling, then rename it into place.
    /// Caller holds the clip lock.
    async fn persist(&self, clips: &[Clip]) -> Result<(), SessionError> {
        let view = RecordView {
            id: self.id,
            start_time: self.started_at,
            clips,
        };
        let json = serde_json::to_vec_pretty(&view)?;

        let path = self.metadata_path();
        let tmp = self.dir.join(format!("{METADATA_FILE}.tmp"));
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| SessionError::Write(tmp.clone(), e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| SessionError::Write(path.clone(), e))?;
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("started_at", &self.started_at)
            .field("dir", &self.dir)
            .finish()
    }
}

// ── Persisted sessions ───────────────────────────────────────────────────────

impl SessionRecord {
    pub async fn load(path: &Path) -> Result<Self, SessionError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| SessionError::Read(path.to_path_buf(), e))?;
        serde_json::from_slice(&bytes).map_err(|e| SessionError::Parse(path.to_path_buf(), e))
    }
}

/// Load the persisted record of session `id` under `root`.
pub async fn load_session(root: &Path, id: Uuid) -> Result<SessionRecord, SessionError> {
    SessionRecord::load(&root.join(id.to_string()).join(METADATA_FILE)).await
}

/// Every persisted session under `root`, newest first. Unreadable entries are
/// skipped.
pub async fn list_sessions(root: &Path) -> Result<Vec<SessionRecord>, SessionError> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SessionError::Read(root.to_path_buf(), e)),
    };

    let mut records = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| SessionError::Read(root.to_path_buf(), e))?
    {
        let path = entry.path().join(METADATA_FILE);
        if !path.exists() {
            continue;
        }
        match SessionRecord::load(&path).await {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(error = %e, "skipping unreadable session record"),
        }
    }

    records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    Ok(records)
}
