//! Recording finalizer: turns a closed raw recording into a playable artifact.
//!
//! The production implementation shells out to ffmpeg with one of the fixed
//! argument templates in [`EncoderProfile`]. Nothing a client sends reaches
//! the command line: the input path, output path and stream name are all
//! server-generated.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;

use clipstream_core::config::{EncoderConfig, EncoderProfile};
use clipstream_core::StreamType;

/// Everything a finalizer needs to know about one closed recording.
#[derive(Debug, Clone)]
pub struct FinalizeRequest {
    pub input: PathBuf,
    pub session_dir: PathBuf,
    pub stream_type: StreamType,
    pub clip_number: u32,
}

impl FinalizeRequest {
    /// `<stream>_<n>.<ext>`
    pub fn artifact_name(&self, extension: &str) -> String {
        format!("{}_{}.{}", self.stream_type, self.clip_number, extension)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FinalizeError {
    #[error("input recording does not exist: {0}")]
    MissingInput(PathBuf),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("encoder exited with code {code}: {output}")]
    Encoder { code: i32, output: String },
    #[error("{0}")]
    Other(String),
}

/// Converts a raw recording into an artifact inside the session directory.
///
/// Returns the artifact's file name relative to `session_dir`. Must leave the
/// input in place on failure.
#[async_trait]
pub trait Finalizer: Send + Sync {
    async fn finalize(&self, request: &FinalizeRequest) -> Result<String, FinalizeError>;
}

// ── ffmpeg ───────────────────────────────────────────────────────────────────

pub struct FfmpegFinalizer {
    program: PathBuf,
    profile: EncoderProfile,
}

impl FfmpegFinalizer {
    pub fn new(program: impl Into<PathBuf>, profile: EncoderProfile) -> Self {
        Self {
            program: program.into(),
            profile,
        }
    }

    pub fn from_config(config: &EncoderConfig) -> Self {
        Self::new(config.ffmpeg_path.clone(), config.profile)
    }

    pub fn profile(&self) -> EncoderProfile {
        self.profile
    }

    /// Check that the encoder binary runs at all.
    pub async fn probe(&self) -> Result<(), FinalizeError> {
        let output = tokio::process::Command::new(&self.program)
            .arg("-version")
            .output()
            .await
            .map_err(|source| FinalizeError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(FinalizeError::Encoder {
                code: output.status.code().unwrap_or(-1),
                output: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

/// The fixed ffmpeg argument list for `profile`.
pub fn encoder_args(profile: EncoderProfile, input: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-i".into(), input.into()];
    let rest: &[&str] = match profile {
        EncoderProfile::Vp9Webm => &[
            "-c:v", "libvpx-vp9", "-crf", "30", "-b:v", "0", "-b:a", "128k", "-c:a", "libopus",
            "-f", "webm", "-y",
        ],
        EncoderProfile::H264Mp4 => &[
            "-c:v", "libx264", "-preset", "medium", "-crf", "23", "-c:a", "aac", "-f", "mp4",
            "-y",
        ],
    };
    args.extend(rest.iter().map(OsString::from));
    args.push(output.into());
    args
}

#[async_trait]
impl Finalizer for FfmpegFinalizer {
    async fn finalize(&self, request: &FinalizeRequest) -> Result<String, FinalizeError> {
        if !tokio::fs::try_exists(&request.input).await.unwrap_or(false) {
            return Err(FinalizeError::MissingInput(request.input.clone()));
        }

        let file_name = request.artifact_name(self.profile.extension());
        let output_path = request.session_dir.join(&file_name);
        let args = encoder_args(self.profile, &request.input, &output_path);

        let start = Instant::now();
        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| FinalizeError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FinalizeError::Encoder {
                code: output.status.code().unwrap_or(-1),
                output: if stderr.is_empty() {
                    stdout.into_owned()
                } else {
                    stderr.into_owned()
                },
            });
        }

        tracing::info!(
            stream = %request.stream_type,
            clip = request.clip_number,
            output = %output_path.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "recording encoded"
        );
        Ok(file_name)
    }
}
