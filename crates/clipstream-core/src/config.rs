//! Configuration system for clipstream.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CLIPSTREAM_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/clipstream/config.toml
//!   3. ~/.config/clipstream/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipstreamConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub encoder: EncoderConfig,
    pub streams: StreamsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket and status API listen on.
    pub bind_addr: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// One subdirectory per session is created here.
    pub recordings_dir: PathBuf,
    /// Keep raw temporary recordings after a successful encode.
    pub keep_raw: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub ffmpeg_path: PathBuf,
    pub profile: EncoderProfile,
}

/// Fixed encoder argument templates. Clients cannot influence the arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderProfile {
    /// VP9 + Opus in WebM.
    Vp9Webm,
    /// H.264 + AAC in MP4.
    H264Mp4,
}

impl EncoderProfile {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Vp9Webm => "webm",
            Self::H264Mp4 => "mp4",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "vp9_webm" => Some(Self::Vp9Webm),
            "h264_mp4" => Some(Self::H264Mp4),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamsConfig {
    /// Trailing tag byte → substream name.
    pub tags: Vec<TagEntry>,
    /// Substream that receives frames with an unmapped tag. Empty = reject them.
    pub fallback: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEntry {
    pub tag: u8,
    pub stream: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            recordings_dir: data_dir().join("recordings"),
            keep_raw: false,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            profile: EncoderProfile::Vp9Webm,
        }
    }
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            tags: vec![
                TagEntry {
                    tag: 0,
                    stream: "camera".to_string(),
                },
                TagEntry {
                    tag: 1,
                    stream: "screen".to_string(),
                },
            ],
            fallback: String::new(),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("clipstream")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("clipstream")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ClipstreamConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            ClipstreamConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CLIPSTREAM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&ClipstreamConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CLIPSTREAM_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CLIPSTREAM_SERVER__BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = lookup("CLIPSTREAM_SERVER__PORT") {
            if let Ok(p) = v.parse() {
                self.server.port = p;
            }
        }
        if let Some(v) = lookup("CLIPSTREAM_STORAGE__RECORDINGS_DIR") {
            self.storage.recordings_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CLIPSTREAM_STORAGE__KEEP_RAW") {
            self.storage.keep_raw = v == "true" || v == "1";
        }
        if let Some(v) = lookup("CLIPSTREAM_ENCODER__FFMPEG_PATH") {
            self.encoder.ffmpeg_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("CLIPSTREAM_ENCODER__PROFILE") {
            if let Some(profile) = EncoderProfile::parse(&v) {
                self.encoder.profile = profile;
            }
        }
        if let Some(v) = lookup("CLIPSTREAM_STREAMS__FALLBACK") {
            self.streams.fallback = v;
        }
    }
}
