//! Temporary recordings: the raw bytes of one open substream clip.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

/// Write buffer per open recording.
const WRITE_BUFFER: usize = 256 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("failed to create {0}: {1}")]
    Create(PathBuf, std::io::Error),
    #[error("failed to write {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("failed to close {0}: {1}")]
    Close(PathBuf, std::io::Error),
}

/// An open, append-only temporary recording. Owned by exactly one StreamState.
#[derive(Debug)]
pub struct TempRecording {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes_written: u64,
}

/// A recording whose bytes are all on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedRecording {
    pub path: PathBuf,
    pub bytes_written: u64,
}

impl TempRecording {
    /// Create a new, empty recording. Fails if the file already exists.
    pub async fn create(path: &Path) -> Result<Self, RecordingError> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map_err(|e| RecordingError::Create(path.to_path_buf(), e))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::with_capacity(WRITE_BUFFER, file),
            bytes_written: 0,
        })
    }

    /// Wrap an already open file, e.g. one whose flush is known to fail.
    #[cfg(test)]
    pub(crate) fn from_file(path: &Path, file: File) -> Self {
        Self {
            path: path.to_path_buf(),
            writer: BufWriter::with_capacity(WRITE_BUFFER, file),
            bytes_written: 0,
        }
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), RecordingError> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(|e| RecordingError::Write(self.path.clone(), e))?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush buffered bytes and sync the file before handing it on.
    pub async fn close(mut self) -> Result<ClosedRecording, RecordingError> {
        self.writer
            .flush()
            .await
            .map_err(|e| RecordingError::Close(self.path.clone(), e))?;
        let file = self.writer.into_inner();
        file.sync_all()
            .await
            .map_err(|e| RecordingError::Close(self.path.clone(), e))?;
        Ok(ClosedRecording {
            path: self.path,
            bytes_written: self.bytes_written,
        })
    }
}
