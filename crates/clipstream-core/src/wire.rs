//! Binary frame layout and substream tag resolution.
//!
//! Every binary WebSocket frame carries raw media bytes followed by exactly
//! one tag byte naming the substream that produced them:
//!
//! ```text
//! +----------------------------+-----+
//! | payload (len - 1 bytes)    | tag |
//! +----------------------------+-----+
//! ```
//!
//! Tags are resolved through an explicit [`TagTable`]. There is no implicit
//! bit interpretation: a tag that is not in the table is rejected unless the
//! table was built with a fallback substream.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::StreamsConfig;

/// Longest accepted substream name.
pub const MAX_STREAM_NAME: usize = 32;

// ── Substream identifier ─────────────────────────────────────────────────────

/// A validated substream name such as `camera` or `screen`.
///
/// Names end up in file names, so only ASCII alphanumerics, `-` and `_` are
/// accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamType(String);

impl StreamType {
    pub fn new(name: impl Into<String>) -> Result<Self, TagTableError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= MAX_STREAM_NAME
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if valid {
            Ok(Self(name))
        } else {
            Err(TagTableError::InvalidName(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StreamType {
    type Error = TagTableError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StreamType> for String {
    fn from(value: StreamType) -> Self {
        value.0
    }
}

// ── Frame split ──────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("empty binary frame")]
    Empty,
    #[error("unmapped substream tag {0:#04x}")]
    UnknownTag(u8),
}

/// Split a binary frame into `(payload, tag)`. The payload shares the frame's
/// buffer and is empty for a tag-only frame.
pub fn split_frame(frame: &Bytes) -> Result<(Bytes, u8), FrameError> {
    let (&tag, _) = frame.split_last().ok_or(FrameError::Empty)?;
    Ok((frame.slice(..frame.len() - 1), tag))
}

// ── Tag table ────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TagTableError {
    #[error("invalid substream name {0:?}")]
    InvalidName(String),
    #[error("tag {0:#04x} is mapped more than once")]
    DuplicateTag(u8),
    #[error("substream {0:?} is mapped to more than one tag")]
    DuplicateStream(String),
    #[error("fallback substream {0:?} is not in the tag table")]
    UnknownFallback(String),
    #[error("tag table is empty")]
    Empty,
}

/// Explicit, two-way mapping between tag bytes and substreams.
#[derive(Debug, Clone)]
pub struct TagTable {
    by_tag: HashMap<u8, StreamType>,
    fallback: Option<StreamType>,
}

impl TagTable {
    pub fn new(
        entries: impl IntoIterator<Item = (u8, StreamType)>,
        fallback: Option<StreamType>,
    ) -> Result<Self, TagTableError> {
        let mut by_tag: HashMap<u8, StreamType> = HashMap::new();
        for (tag, stream) in entries {
            if by_tag.values().any(|s| s == &stream) {
                return Err(TagTableError::DuplicateStream(stream.to_string()));
            }
            if by_tag.insert(tag, stream).is_some() {
                return Err(TagTableError::DuplicateTag(tag));
            }
        }
        if by_tag.is_empty() {
            return Err(TagTableError::Empty);
        }
        if let Some(fallback) = &fallback {
            if !by_tag.values().any(|s| s == fallback) {
                return Err(TagTableError::UnknownFallback(fallback.to_string()));
            }
        }
        Ok(Self { by_tag, fallback })
    }

    /// Build the table from the `[streams]` config section.
    pub fn from_config(config: &StreamsConfig) -> Result<Self, TagTableError> {
        let entries = config
            .tags
            .iter()
            .map(|e| StreamType::new(e.stream.clone()).map(|s| (e.tag, s)))
            .collect::<Result<Vec<_>, _>>()?;
        let fallback = if config.fallback.is_empty() {
            None
        } else {
            Some(StreamType::new(config.fallback.clone())?)
        };
        Self::new(entries, fallback)
    }

    /// Resolve a tag byte to its substream.
    pub fn resolve(&self, tag: u8) -> Result<&StreamType, FrameError> {
        self.by_tag
            .get(&tag)
            .or(self.fallback.as_ref())
            .ok_or(FrameError::UnknownTag(tag))
    }

    /// Look up a substream by name, as named in a control event.
    pub fn stream(&self, name: &str) -> Option<&StreamType> {
        self.by_tag.values().find(|s| s.as_str() == name)
    }

    pub fn tag_of(&self, stream: &StreamType) -> Option<u8> {
        self.by_tag
            .iter()
            .find_map(|(tag, s)| (s == stream).then_some(*tag))
    }

    /// Split a frame and resolve its tag in one step.
    pub fn demux(&self, frame: &Bytes) -> Result<(StreamType, Bytes), FrameError> {
        let (payload, tag) = split_frame(frame)?;
        let stream = self.resolve(tag)?.clone();
        Ok((stream, payload))
    }

    /// All mapped substreams, ordered by tag.
    pub fn streams(&self) -> Vec<&StreamType> {
        let mut entries: Vec<_> = self.by_tag.iter().collect();
        entries.sort_by_key(|(tag, _)| **tag);
        entries.into_iter().map(|(_, s)| s).collect()
    }
}

impl Default for TagTable {
    fn default() -> Self {
        let camera = StreamType("camera".to_string());
        let screen = StreamType("screen".to_string());
        Self {
            by_tag: HashMap::from([(0, camera), (1, screen)]),
            fallback: None,
        }
    }
}
