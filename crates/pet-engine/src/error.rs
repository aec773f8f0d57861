//! Error types surfaced by the engine.
//!
//! Audio and track failures are local: they reject one submission and leave the session
//! running with whatever was already buffered.

use std::path::PathBuf;

use crate::stream::SegmentId;

/// Malformed or unsupported audio container.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("missing RIFF/WAVE signature")]
    MissingSignature,
    #[error("unsupported codec tag {0}: only uncompressed PCM (1) is accepted")]
    UnsupportedCodec(u16),
    #[error("unsupported bits per sample: {0}")]
    UnsupportedBitDepth(u16),
    #[error("invalid fmt chunk: {0}")]
    InvalidFormat(&'static str),
    #[error("truncated '{0}' chunk")]
    Truncated(String),
    #[error("data chunk appears before fmt chunk")]
    DataBeforeFormat,
    #[error("no data chunk found")]
    MissingData,
}

/// Errors returned by the streaming speech player.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("stream not started")]
    NotStreaming,
    #[error("segment {0} not found")]
    NotFound(SegmentId),
    #[error("audio rejected: {0}")]
    Format(#[from] FormatError),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("wait cancelled")]
    Cancelled,
}

/// A recorded expression track could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error("read track {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse track {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid track '{name}': {reason}")]
    Invalid { name: String, reason: &'static str },
}
