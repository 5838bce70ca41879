//! Frame sources feeding the compositor.
//!
//! Container/stream decoding lives outside the core; anything that can
//! hand over RGB frames one at a time implements [`FrameSource`].

use image::{Rgb, RgbImage};

use crate::error::Result;
use crate::frame::Frame;

/// Produces source frames in presentation order.
pub trait FrameSource: Send {
    /// Next frame, `Ok(None)` at end of stream.
    ///
    /// Sources are not assumed to be live: after an error the compositor
    /// stops instead of retrying.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Source frame rate, if the source knows it.
    fn frame_rate(&self) -> Option<f64> {
        None
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn frame_rate(&self) -> Option<f64> {
        (**self).frame_rate()
    }
}

// ── TestPatternSource ────────────────────────────────────────────

/// `count` solid frames whose colour steps by a fixed increment.
///
/// Frame `i` is filled with [`TestPatternSource::color`]`(i)`.
#[derive(Debug, Clone)]
pub struct TestPatternSource {
    width: u32,
    height: u32,
    count: u64,
    emitted: u64,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, count: u64) -> Self {
        Self {
            width,
            height,
            count,
            emitted: 0,
        }
    }

    /// Colour of frame `index`.
    pub fn color(index: u64) -> Rgb<u8> {
        let step = (index % 256) as u8;
        Rgb([step.wrapping_mul(23), step.wrapping_mul(47), step.wrapping_mul(89)])
    }
}

impl FrameSource for TestPatternSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.emitted >= self.count {
            return Ok(None);
        }
        let frame = RgbImage::from_pixel(self.width, self.height, Self::color(self.emitted));
        self.emitted += 1;
        Ok(Some(frame))
    }
}
