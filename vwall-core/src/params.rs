//! Runtime-tunable encoding parameters.
//!
//! Each tile has its own `(sampling, quality)` pair that the control
//! surface may change at any moment while the encoders read it on every
//! tile. The pair is packed into a single atomic word so a reader always
//! sees a snapshot that some writer actually stored, never quality from
//! one update and sampling from another.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::VwallError;

// ── SamplingMode ─────────────────────────────────────────────────

/// Chroma sampling requested from the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    #[serde(rename = "444")]
    S444,
    #[serde(rename = "422")]
    S422,
    #[serde(rename = "420")]
    S420,
    Gray,
}

impl SamplingMode {
    const fn to_bits(self) -> u8 {
        match self {
            SamplingMode::S444 => 0,
            SamplingMode::S422 => 1,
            SamplingMode::S420 => 2,
            SamplingMode::Gray => 3,
        }
    }

    const fn from_bits(bits: u8) -> Self {
        match bits {
            0 => SamplingMode::S444,
            1 => SamplingMode::S422,
            2 => SamplingMode::S420,
            _ => SamplingMode::Gray,
        }
    }

    /// Whether colour information is discarded.
    pub fn is_gray(self) -> bool {
        self == SamplingMode::Gray
    }
}

impl fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingMode::S444 => write!(f, "444"),
            SamplingMode::S422 => write!(f, "422"),
            SamplingMode::S420 => write!(f, "420"),
            SamplingMode::Gray => write!(f, "gray"),
        }
    }
}

impl FromStr for SamplingMode {
    type Err = VwallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "444" => Ok(SamplingMode::S444),
            "422" => Ok(SamplingMode::S422),
            "420" => Ok(SamplingMode::S420),
            "gray" | "grey" => Ok(SamplingMode::Gray),
            other => Err(VwallError::Config(format!("unknown sampling mode {other:?}"))),
        }
    }
}

// ── EncodingParams ───────────────────────────────────────────────

/// One immutable snapshot of the encoder settings for a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingParams {
    pub sampling: SamplingMode,
    /// 1 (smallest) ..= 100 (best).
    pub quality: u8,
}

impl Default for EncodingParams {
    fn default() -> Self {
        Self {
            sampling: SamplingMode::S420,
            quality: 80,
        }
    }
}

impl EncodingParams {
    pub fn new(sampling: SamplingMode, quality: u8) -> Self {
        Self {
            sampling,
            quality: quality.clamp(1, 100),
        }
    }

    fn pack(self) -> u16 {
        (self.sampling.to_bits() as u16) << 8 | self.quality as u16
    }

    fn unpack(word: u16) -> Self {
        Self {
            sampling: SamplingMode::from_bits((word >> 8) as u8),
            quality: (word & 0xff) as u8,
        }
    }
}

// ── SharedParams ─────────────────────────────────────────────────

/// Lock-free cell holding one [`EncodingParams`] snapshot.
#[derive(Debug)]
pub struct SharedParams {
    word: AtomicU16,
}

impl SharedParams {
    pub fn new(params: EncodingParams) -> Self {
        Self {
            word: AtomicU16::new(params.pack()),
        }
    }

    pub fn load(&self) -> EncodingParams {
        EncodingParams::unpack(self.word.load(Ordering::Acquire))
    }

    pub fn store(&self, params: EncodingParams) {
        self.word.store(params.pack(), Ordering::Release);
    }

    /// Apply `f` to the current snapshot and store the result atomically.
    pub fn update(&self, f: impl Fn(EncodingParams) -> EncodingParams) -> EncodingParams {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            let next = f(EncodingParams::unpack(current)).pack();
            match self
                .word
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return EncodingParams::unpack(next),
                Err(actual) => current = actual,
            }
        }
    }
}

// ── EncodingControl ──────────────────────────────────────────────

/// Per-tile parameter table shared by the encoders and the control surface.
#[derive(Debug, Clone)]
pub struct EncodingControl {
    tiles: Arc<[SharedParams]>,
}

impl EncodingControl {
    /// Every tile starts from `initial`.
    pub fn new(tile_count: usize, initial: EncodingParams) -> Self {
        Self {
            tiles: (0..tile_count).map(|_| SharedParams::new(initial)).collect(),
        }
    }

    /// Start from explicit per-tile values.
    pub fn from_params(params: impl IntoIterator<Item = EncodingParams>) -> Self {
        Self {
            tiles: params.into_iter().map(SharedParams::new).collect(),
        }
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn get(&self, tile: usize) -> Option<EncodingParams> {
        self.tiles.get(tile).map(SharedParams::load)
    }

    /// Handle for one tile, as held by that tile's encoder.
    pub fn tile(&self, tile: usize) -> Option<TileParams> {
        (tile < self.tiles.len()).then(|| TileParams {
            tiles: Arc::clone(&self.tiles),
            index: tile,
        })
    }

    pub fn set(&self, tile: usize, params: EncodingParams) -> Result<(), VwallError> {
        self.cell(tile)?.store(params);
        Ok(())
    }

    pub fn set_all(&self, params: EncodingParams) {
        for cell in self.tiles.iter() {
            cell.store(params);
        }
    }

    pub fn set_quality(&self, tile: usize, quality: u8) -> Result<EncodingParams, VwallError> {
        let quality = quality.clamp(1, 100);
        Ok(self.cell(tile)?.update(|p| EncodingParams { quality, ..p }))
    }

    pub fn set_sampling(
        &self,
        tile: usize,
        sampling: SamplingMode,
    ) -> Result<EncodingParams, VwallError> {
        Ok(self.cell(tile)?.update(|p| EncodingParams { sampling, ..p }))
    }

    fn cell(&self, tile: usize) -> Result<&SharedParams, VwallError> {
        self.tiles.get(tile).ok_or_else(|| {
            VwallError::Config(format!("tile {tile} out of range (0..{})", self.tiles.len()))
        })
    }
}

/// Read handle for a single tile's parameters.
#[derive(Debug, Clone)]
pub struct TileParams {
    tiles: Arc<[SharedParams]>,
    index: usize,
}

impl TileParams {
    pub fn load(&self) -> EncodingParams {
        self.tiles[self.index].load()
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

// ── Tests ────────────────────────────────────────────────────────
