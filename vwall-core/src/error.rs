//! Domain-specific error types for the video wall pipeline.
//!
//! All fallible operations return `Result<T, VwallError>`. Per-item codec
//! failures are surfaced as [`VwallError::Codec`] so callers can log and
//! skip them; everything else is fatal to the stage that hit it.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VwallError>;

/// The canonical error type for the video wall pipeline.
#[derive(Debug, Error)]
pub enum VwallError {
    // ── Connection phase ─────────────────────────────────────────
    /// Accepting a display node failed before the barrier was armed.
    #[error("connection barrier failed after {connected}/{expected} nodes: {source}")]
    Barrier {
        connected: usize,
        expected: usize,
        #[source]
        source: std::io::Error,
    },

    /// Not every display node connected before the accept deadline.
    #[error("only {connected}/{expected} nodes connected within {timeout:?}")]
    BarrierTimeout {
        connected: usize,
        expected: usize,
        timeout: Duration,
    },

    // ── Streaming phase ──────────────────────────────────────────
    /// A display node could not be written to while streaming.
    #[error("display node {node} lost: {reason}")]
    NodeLost { node: usize, reason: String },

    /// Too many nodes degraded for the wall to keep running.
    #[error("only {live} live nodes left (minimum {min})")]
    WallDegraded { live: usize, min: usize },

    /// A socket read or write failed after streaming started.
    #[error("transport error: {0}")]
    Transport(String),

    /// A framed message exceeded the size limit.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// A queue or channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Media ────────────────────────────────────────────────────
    /// Compressing or decompressing one tile failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The frame source could not be opened or read.
    #[error("source error: {0}")]
    Source(String),

    /// Grid geometry is unusable.
    #[error("invalid geometry: {0}")]
    Geometry(&'static str),

    // ── Configuration ────────────────────────────────────────────
    /// A configuration value is invalid.
    #[error("invalid config: {0}")]
    Config(String),

    // ── Generic ──────────────────────────────────────────────────
    /// The I/O layer reported an error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl VwallError {
    /// Whether the error only affects the item being processed.
    pub fn is_per_item(&self) -> bool {
        matches!(self, VwallError::Codec(_))
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for VwallError {
    fn from(s: String) -> Self {
        VwallError::Other(s)
    }
}

impl From<&str> for VwallError {
    fn from(s: &str) -> Self {
        VwallError::Other(s.to_string())
    }
}

impl From<image::ImageError> for VwallError {
    fn from(e: image::ImageError) -> Self {
        VwallError::Codec(e.to_string())
    }
}

impl From<jpeg_encoder::EncodingError> for VwallError {
    fn from(e: jpeg_encoder::EncodingError) -> Self {
        VwallError::Codec(e.to_string())
    }
}

impl From<tokio_util::codec::LinesCodecError> for VwallError {
    fn from(e: tokio_util::codec::LinesCodecError) -> Self {
        match e {
            tokio_util::codec::LinesCodecError::Io(io) => VwallError::Io(io),
            other => VwallError::Transport(other.to_string()),
        }
    }
}
