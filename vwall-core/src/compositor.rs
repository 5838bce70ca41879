//! Frame compositing: resize, letterbox and slice into tiles.
//!
//! Each source frame is scaled (aspect ratio preserved) to fit the padded
//! canvas, pasted centred onto a black background and cut into one tile
//! per display using the fixed region table from [`GridGeometry`].

use std::time::Instant;

use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::error::{Result, VwallError};
use crate::frame::{Frame, Tile};
use crate::geometry::{GridGeometry, Region};
use crate::queue::Producer;
use crate::source::FrameSource;

// ── ResizePlan ───────────────────────────────────────────────────

/// How a source frame is scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// Scaled size equals source size; pixels are copied.
    Identity,
    /// Enlarging.
    Linear,
    /// Shrinking, each output pixel averages the source area it covers.
    Area,
}

/// Scaling and placement of a `source_width x source_height` frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizePlan {
    pub source_width: u32,
    pub source_height: u32,
    pub ratio: f64,
    pub interpolation: Interpolation,
    /// Where the scaled frame lands on the canvas.
    pub placement: Region,
}

impl ResizePlan {
    /// Fit a source frame inside `canvas_width x canvas_height`.
    pub fn fit(source_width: u32, source_height: u32, canvas_width: u32, canvas_height: u32) -> Self {
        let x_ratio = canvas_width as f64 / source_width as f64;
        let y_ratio = canvas_height as f64 / source_height as f64;
        let ratio = x_ratio.min(y_ratio);

        let scaled_w = ((source_width as f64 * ratio) as u32).clamp(1, canvas_width);
        let scaled_h = ((source_height as f64 * ratio) as u32).clamp(1, canvas_height);

        let interpolation = if scaled_w == source_width && scaled_h == source_height {
            Interpolation::Identity
        } else if ratio >= 1.0 {
            Interpolation::Linear
        } else {
            Interpolation::Area
        };

        Self {
            source_width,
            source_height,
            ratio,
            interpolation,
            placement: Region::new(
                (canvas_width - scaled_w) / 2,
                (canvas_height - scaled_h) / 2,
                scaled_w,
                scaled_h,
            ),
        }
    }

    fn scale(&self, frame: &Frame) -> Option<RgbImage> {
        let (w, h) = (self.placement.width, self.placement.height);
        match self.interpolation {
            Interpolation::Identity => None,
            Interpolation::Linear => Some(imageops::resize(frame, w, h, FilterType::Triangle)),
            Interpolation::Area => Some(imageops::thumbnail(frame, w, h)),
        }
    }
}

// ── TileCompositor ───────────────────────────────────────────────

/// Turns source frames into per-display tiles.
pub struct TileCompositor {
    geometry: GridGeometry,
    regions: Vec<Region>,
    canvas: RgbImage,
    plan: Option<ResizePlan>,
    next_seq: u64,
}

impl TileCompositor {
    pub fn new(geometry: GridGeometry) -> Result<Self> {
        geometry.validate()?;
        Ok(Self {
            geometry,
            regions: geometry.regions(),
            canvas: RgbImage::new(geometry.canvas_width(), geometry.canvas_height()),
            plan: None,
            next_seq: 0,
        })
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// The most recently composited canvas.
    pub fn canvas(&self) -> &RgbImage {
        &self.canvas
    }

    /// Current resize plan, set by the first composited frame.
    pub fn plan(&self) -> Option<&ResizePlan> {
        self.plan.as_ref()
    }

    /// Scale `frame` and paste it onto the canvas.
    pub fn compose(&mut self, frame: &Frame) -> Result<&RgbImage> {
        let (w, h) = frame.dimensions();
        if w == 0 || h == 0 {
            return Err(VwallError::Source("empty source frame".into()));
        }

        let stale = self
            .plan
            .is_none_or(|p| p.source_width != w || p.source_height != h);
        if stale {
            let plan = ResizePlan::fit(w, h, self.canvas.width(), self.canvas.height());
            info!(
                source = %format!("{w}x{h}"),
                canvas = %format!("{}x{}", self.canvas.width(), self.canvas.height()),
                ratio = plan.ratio,
                interpolation = ?plan.interpolation,
                "resize plan updated"
            );
            // Letterbox bars from a previous plan must not survive.
            self.canvas.pixels_mut().for_each(|p| p.0 = [0, 0, 0]);
            self.plan = Some(plan);
        }

        let Some(plan) = self.plan else {
            return Err(VwallError::Other("resize plan missing".into()));
        };
        let (x, y) = (plan.placement.x as i64, plan.placement.y as i64);
        match plan.scale(frame) {
            Some(scaled) => imageops::replace(&mut self.canvas, &scaled, x, y),
            None => imageops::replace(&mut self.canvas, frame, x, y),
        }
        Ok(&self.canvas)
    }

    /// Compose `frame` and cut it into one [`Tile`] per display.
    pub fn split(&mut self, frame: &Frame) -> Result<Vec<Tile>> {
        let captured_at = Instant::now();
        self.compose(frame)?;

        let seq = self.next_seq;
        self.next_seq += 1;

        Ok(self
            .regions
            .iter()
            .enumerate()
            .map(|(tile_id, r)| Tile {
                tile_id,
                seq,
                image: imageops::crop_imm(&self.canvas, r.x, r.y, r.width, r.height).to_image(),
                captured_at,
            })
            .collect())
    }

    /// Pull frames from `source` until it ends, pushing each tile onto
    /// the queue with the same index.
    ///
    /// Blocking; run it on a blocking thread. Dropping the producers on
    /// return closes the tile queues so downstream stages drain and stop.
    /// Returns the number of frames composited.
    pub fn run(mut self, source: &mut dyn FrameSource, queues: Vec<Producer<Tile>>) -> Result<u64> {
        if queues.len() != self.regions.len() {
            return Err(VwallError::Config(format!(
                "{} tile queues for {} tiles",
                queues.len(),
                self.regions.len()
            )));
        }

        info!(
            tiles = self.regions.len(),
            source_fps = source.frame_rate().unwrap_or(0.0),
            "compositor started"
        );
        let mut frames = 0u64;
        loop {
            let frame = match source.next_frame() {
                Ok(Some(f)) => f,
                Ok(None) => {
                    info!(frames, "source exhausted; compositor stopping");
                    break;
                }
                Err(e) => {
                    warn!(frames, "could not read source frame: {e}; compositor stopping");
                    break;
                }
            };

            let tiles = match self.split(&frame) {
                Ok(t) => t,
                Err(e) => {
                    warn!(frames, "could not composite frame: {e}; compositor stopping");
                    break;
                }
            };

            for (tile, queue) in tiles.into_iter().zip(&queues) {
                if queue.push_blocking(tile).is_err() {
                    debug!("tile queue closed; compositor stopping");
                    return Ok(frames);
                }
            }
            frames += 1;
        }
        Ok(frames)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;
    use crate::source::TestPatternSource;
    use image::Rgb;

    #[test]
    fn plan_letterboxes_wide_source() {
        // 16:9 canvas, 2:1 source → bars top and bottom.
        let plan = ResizePlan::fit(200, 100, 1280, 720);
        assert_eq!(plan.interpolation, Interpolation::Linear);
        assert_eq!(plan.placement, Region::new(0, 40, 1280, 640));
    }

    #[test]
    fn plan_pillarboxes_tall_source_when_shrinking() {
        let plan = ResizePlan::fit(1000, 1000, 400, 200);
        assert_eq!(plan.interpolation, Interpolation::Area);
        assert_eq!(plan.placement, Region::new(100, 0, 200, 200));
    }

    #[test]
    fn plan_identity_when_sizes_match() {
        let plan = ResizePlan::fit(1280, 720, 1280, 720);
        assert_eq!(plan.interpolation, Interpolation::Identity);
        assert_eq!(plan.placement, Region::new(0, 0, 1280, 720));
    }

    #[test]
    fn compose_centres_frame_on_black_canvas() {
        let mut comp = TileCompositor::new(GridGeometry::new(1, 2, 8, 4)).unwrap();
        let frame = RgbImage::from_pixel(4, 4, Rgb([200, 10, 10]));
        let canvas = comp.compose(&frame).unwrap();

        assert_eq!(canvas.dimensions(), (16, 4));
        assert_eq!(*canvas.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*canvas.get_pixel(8, 2), Rgb([200, 10, 10]));
        assert_eq!(*canvas.get_pixel(15, 3), Rgb([0, 0, 0]));
    }

    #[test]
    fn split_matches_region_table() {
        let geom = GridGeometry::new(2, 2, 4, 2);
        let mut comp = TileCompositor::new(geom).unwrap();
        let mut frame = RgbImage::new(8, 4);
        for (x, y, p) in frame.enumerate_pixels_mut() {
            *p = Rgb([x as u8, y as u8, 7]);
        }

        let tiles = comp.split(&frame).unwrap();
        assert_eq!(tiles.len(), 4);
        for tile in &tiles {
            let r = geom.region(tile.tile_id).unwrap();
            assert_eq!(tile.image.dimensions(), (r.width, r.height));
            assert_eq!(*tile.image.get_pixel(0, 0), Rgb([r.x as u8, r.y as u8, 7]));
            assert_eq!(tile.seq, 0);
        }
        assert_eq!(comp.split(&frame).unwrap()[0].seq, 1);
    }

    #[test]
    fn size_change_clears_old_letterbox() {
        let mut comp = TileCompositor::new(GridGeometry::new(1, 1, 10, 10)).unwrap();
        comp.compose(&RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]))).unwrap();
        let canvas = comp.compose(&RgbImage::from_pixel(20, 10, Rgb([9, 9, 9]))).unwrap();
        assert_eq!(*canvas.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*canvas.get_pixel(5, 5), Rgb([9, 9, 9]));
    }

    #[test]
    fn run_feeds_every_queue_and_closes_on_exhaustion() {
        let geom = GridGeometry::new(1, 2, 4, 4);
        let comp = TileCompositor::new(geom).unwrap();
        let (producers, consumers): (Vec<_>, Vec<_>) =
            (0..2).map(|_| queue::bounded::<Tile>(16)).unzip();

        let mut src = TestPatternSource::new(8, 4, 5);
        let frames = comp.run(&mut src, producers).unwrap();
        assert_eq!(frames, 5);

        for c in consumers {
            let seqs: Vec<u64> = std::iter::from_fn(|| c.pop_blocking()).map(|t| t.seq).collect();
            assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        }
    }

    #[test]
    fn rejects_empty_frames() {
        let mut comp = TileCompositor::new(GridGeometry::new(1, 1, 4, 4)).unwrap();
        assert!(comp.compose(&RgbImage::new(0, 0)).is_err());
    }
}
