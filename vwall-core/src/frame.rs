//! Shared types passed between pipeline stages.
//!
//! These are in-process representations. The wire form of a tile is
//! [`crate::wire::TileMessage`].

use std::time::Instant;

use bytes::Bytes;
use image::RgbImage;

/// A decoded source image. Owned by the compositor for one iteration only.
pub type Frame = RgbImage;

// ── Tile ─────────────────────────────────────────────────────────

/// One display's share of a composited frame, still uncompressed.
#[derive(Debug, Clone)]
pub struct Tile {
    /// Destination display, `0..N`.
    pub tile_id: usize,
    /// Source frame sequence number, shared by all tiles of one frame.
    pub seq: u64,
    /// Tightly packed RGB8 pixels.
    pub image: RgbImage,
    /// When the source frame was read.
    pub captured_at: Instant,
}

impl Tile {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

// ── EncodedTile ──────────────────────────────────────────────────

/// A compressed tile waiting in its destination's send queue.
#[derive(Debug, Clone)]
pub struct EncodedTile {
    pub tile_id: usize,
    pub seq: u64,
    pub payload: Bytes,
    pub captured_at: Instant,
}

// ── DecodedTile ──────────────────────────────────────────────────

/// A tile received and decompressed on a display node.
#[derive(Debug, Clone)]
pub struct DecodedTile {
    /// Wire frame identifier (wraps at the ring size).
    pub frame_id: u32,
    pub image: RgbImage,
    pub received_at: Instant,
}
