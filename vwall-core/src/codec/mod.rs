//! Tile compression.
//!
//! The pipeline treats compression as an opaque capability: a codec turns
//! an RGB tile plus the tile's current [`EncodingParams`] into bytes, and
//! turns those bytes back into an RGB image. Both directions must reject
//! bad input with [`VwallError::Codec`] rather than panic, because the
//! encoder and the receiver skip failed items and keep streaming.
//!
//! | Codec        | Lossy | `quality`              | `sampling`                   |
//! |--------------|-------|------------------------|------------------------------|
//! | [`JpegCodec`]| yes   | JPEG quality factor    | `gray` encodes luma only     |
//! | [`ZstdCodec`]| no    | inverse zstd level     | `gray` packs luma only       |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VwallError};
use crate::params::EncodingParams;

pub mod jpeg;
pub mod zstd;

pub use self::jpeg::JpegCodec;
pub use self::zstd::ZstdCodec;

/// Compress and decompress single tiles.
pub trait TileCodec: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn encode(&self, tile: &RgbImage, params: EncodingParams) -> Result<Bytes>;

    fn decode(&self, payload: &[u8]) -> Result<RgbImage>;
}

// ── CodecKind ────────────────────────────────────────────────────

/// Codec selection as written in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Jpeg,
    Zstd,
}

impl CodecKind {
    pub fn build(self) -> Arc<dyn TileCodec> {
        match self {
            CodecKind::Jpeg => Arc::new(JpegCodec),
            CodecKind::Zstd => Arc::new(ZstdCodec),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecKind::Jpeg => write!(f, "jpeg"),
            CodecKind::Zstd => write!(f, "zstd"),
        }
    }
}

impl FromStr for CodecKind {
    type Err = VwallError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(CodecKind::Jpeg),
            "zstd" => Ok(CodecKind::Zstd),
            other => Err(VwallError::Config(format!("unknown codec {other:?}"))),
        }
    }
}
