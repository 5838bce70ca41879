//! Wall geometry: the padded canvas and the fixed tile region table.
//!
//! Tile `(col, row)` gets id `col + columns * row`. Adjacent tiles are
//! separated by `2 * bezel` pixels of canvas that no display shows, so
//! content lines up visually across the physical bezels.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VwallError};

// ── Region ───────────────────────────────────────────────────────

/// A rectangle on the canvas, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Number of pixels covered.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn intersects(&self, other: &Region) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Whether this region lies within a `width x height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.right() <= width && self.bottom() <= height
    }
}

// ── GridGeometry ─────────────────────────────────────────────────

/// Physical layout of the wall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridGeometry {
    /// Displays stacked vertically.
    pub rows: u32,
    /// Displays side by side.
    pub columns: u32,
    /// Horizontal resolution of one display.
    pub tile_width: u32,
    /// Vertical resolution of one display.
    pub tile_height: u32,
    /// Hidden pixels on the left and right edge of each display.
    pub bezel_width: u32,
    /// Hidden pixels on the top and bottom edge of each display.
    pub bezel_height: u32,
}

impl Default for GridGeometry {
    fn default() -> Self {
        Self {
            rows: 2,
            columns: 2,
            tile_width: 1920,
            tile_height: 1080,
            bezel_width: 0,
            bezel_height: 0,
        }
    }
}

impl GridGeometry {
    /// Grid without bezel compensation.
    pub fn new(rows: u32, columns: u32, tile_width: u32, tile_height: u32) -> Self {
        Self {
            rows,
            columns,
            tile_width,
            tile_height,
            bezel_width: 0,
            bezel_height: 0,
        }
    }

    pub fn with_bezel(mut self, bezel_width: u32, bezel_height: u32) -> Self {
        self.bezel_width = bezel_width;
        self.bezel_height = bezel_height;
        self
    }

    /// Reject grids that cannot produce any tile.
    pub fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.columns == 0 {
            return Err(VwallError::Geometry("rows and columns must be non-zero"));
        }
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(VwallError::Geometry("tile size must be non-zero"));
        }
        if extent(self.tile_width, self.columns, self.bezel_width).is_none()
            || extent(self.tile_height, self.rows, self.bezel_height).is_none()
        {
            return Err(VwallError::Geometry("canvas size overflows u32"));
        }
        Ok(())
    }

    /// Number of displays (and tiles).
    pub fn tile_count(&self) -> usize {
        self.rows as usize * self.columns as usize
    }

    /// Canvas width including bezel gutters. Saturates on grids that fail
    /// validation.
    pub fn canvas_width(&self) -> u32 {
        extent(self.tile_width, self.columns, self.bezel_width).unwrap_or(u32::MAX)
    }

    /// Canvas height including bezel gutters.
    pub fn canvas_height(&self) -> u32 {
        extent(self.tile_height, self.rows, self.bezel_height).unwrap_or(u32::MAX)
    }

    /// Region shown by `tile_id`, or `None` when out of range.
    ///
    /// Also `None` on grids whose canvas overflows; see [`GridGeometry::validate`].
    pub fn region(&self, tile_id: usize) -> Option<Region> {
        if tile_id >= self.tile_count() {
            return None;
        }
        let col = tile_id as u32 % self.columns;
        let row = tile_id as u32 / self.columns;
        // Left edge of tile `col` is the extent of `col + 1` tiles minus one tile.
        let x = extent(self.tile_width, col + 1, self.bezel_width)? - self.tile_width;
        let y = extent(self.tile_height, row + 1, self.bezel_height)? - self.tile_height;
        Some(Region::new(x, y, self.tile_width, self.tile_height))
    }

    /// Full region table indexed by tile id.
    pub fn regions(&self) -> Vec<Region> {
        (0..self.tile_count())
            .filter_map(|id| self.region(id))
            .collect()
    }
}

/// `count` tiles of `tile` pixels with `2 * bezel` between neighbours.
fn extent(tile: u32, count: u32, bezel: u32) -> Option<u32> {
    let gutters = count.saturating_sub(1).checked_mul(bezel)?.checked_mul(2)?;
    tile.checked_mul(count)?.checked_add(gutters)
}

// ── Tests ────────────────────────────────────────────────────────
