//! Framebuffer output.
//!
//! Tiles are written row by row at their byte offset in the device, so a
//! blit only touches the pixels it covers. Anything seekable works: a
//! Linux `/dev/fbN`, a plain file for capture, or memory in tests.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use image::RgbImage;
use tracing::info;

use vwall_core::error::{Result, VwallError};
use vwall_core::pacer::Surface;

// ── PixelLayout ──────────────────────────────────────────────────

/// Byte order of one framebuffer pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// 16-bit 5-6-5, little endian.
    Rgb565,
    Bgr24,
    /// Alpha byte written as 0xFF.
    Bgra32,
}

impl PixelLayout {
    pub fn from_bytes_per_pixel(bpp: u32) -> Result<Self> {
        match bpp {
            2 => Ok(PixelLayout::Rgb565),
            3 => Ok(PixelLayout::Bgr24),
            4 => Ok(PixelLayout::Bgra32),
            other => Err(VwallError::Config(format!("unsupported bytes_per_pixel {other}"))),
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Rgb565 => 2,
            PixelLayout::Bgr24 => 3,
            PixelLayout::Bgra32 => 4,
        }
    }

    fn put(self, out: &mut Vec<u8>, [r, g, b]: [u8; 3]) {
        match self {
            PixelLayout::Rgb565 => {
                let v = ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3);
                out.extend_from_slice(&v.to_le_bytes());
            }
            PixelLayout::Bgr24 => out.extend_from_slice(&[b, g, r]),
            PixelLayout::Bgra32 => out.extend_from_slice(&[b, g, r, 0xFF]),
        }
    }
}

// ── FramebufferSurface ───────────────────────────────────────────

pub struct FramebufferSurface<W> {
    device: W,
    width: u32,
    height: u32,
    layout: PixelLayout,
    line: Vec<u8>,
}

impl FramebufferSurface<File> {
    /// Open `path` for positional writes.
    pub fn open(path: &Path, width: u32, height: u32, layout: PixelLayout) -> Result<Self> {
        let device = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| VwallError::Config(format!("cannot open {}: {e}", path.display())))?;
        info!(device = %path.display(), width, height, ?layout, "framebuffer opened");
        Ok(Self::new(device, width, height, layout))
    }
}

impl<W: Write + Seek + Send> FramebufferSurface<W> {
    pub fn new(device: W, width: u32, height: u32, layout: PixelLayout) -> Self {
        Self {
            device,
            width,
            height,
            layout,
            line: Vec::with_capacity(width as usize * layout.bytes_per_pixel()),
        }
    }

    pub fn into_inner(self) -> W {
        self.device
    }
}

impl<W: Write + Seek + Send> Surface for FramebufferSurface<W> {
    /// Pixels falling outside the device are clipped.
    fn blit(&mut self, image: &RgbImage, x: u32, y: u32) -> Result<()> {
        if x >= self.width || y >= self.height {
            return Ok(());
        }
        let cols = image.width().min(self.width - x);
        let rows = image.height().min(self.height - y);
        let bpp = self.layout.bytes_per_pixel() as u64;

        for row in 0..rows {
            self.line.clear();
            for col in 0..cols {
                self.layout.put(&mut self.line, image.get_pixel(col, row).0);
            }
            let offset = ((y + row) as u64 * self.width as u64 + x as u64) * bpp;
            self.device.seek(SeekFrom::Start(offset))?;
            self.device.write_all(&self.line)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.device.flush()?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::Cursor;

    fn device(width: u32, height: u32, layout: PixelLayout) -> FramebufferSurface<Cursor<Vec<u8>>> {
        let len = (width * height) as usize * layout.bytes_per_pixel();
        FramebufferSurface::new(Cursor::new(vec![0; len]), width, height, layout)
    }

    #[test]
    fn blit_writes_bgra_at_offset() {
        let mut fb = device(4, 3, PixelLayout::Bgra32);
        let tile = RgbImage::from_pixel(2, 2, Rgb([10, 20, 30]));
        fb.blit(&tile, 1, 1).unwrap();

        let mem = fb.into_inner().into_inner();
        let px = |x: usize, y: usize| &mem[(y * 4 + x) * 4..][..4];
        assert_eq!(px(1, 1), &[30, 20, 10, 0xFF]);
        assert_eq!(px(2, 2), &[30, 20, 10, 0xFF]);
        assert_eq!(px(0, 0), &[0, 0, 0, 0]);
        assert_eq!(px(3, 1), &[0, 0, 0, 0]);
    }

    #[test]
    fn blit_clips_at_device_edge() {
        let mut fb = device(3, 2, PixelLayout::Bgr24);
        let tile = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        fb.blit(&tile, 1, 0).unwrap();
        fb.blit(&tile, 5, 5).unwrap();

        let mem = fb.into_inner().into_inner();
        assert_eq!(mem.len(), 3 * 2 * 3);
        assert_eq!(&mem[..3], &[0, 0, 0]);
        assert_eq!(&mem[3..9], &[3, 2, 1, 3, 2, 1]);
    }

    #[test]
    fn rgb565_packs_channels() {
        let mut fb = device(1, 1, PixelLayout::Rgb565);
        fb.blit(&RgbImage::from_pixel(1, 1, Rgb([255, 0, 255])), 0, 0).unwrap();
        assert_eq!(fb.into_inner().into_inner(), 0xF81Fu16.to_le_bytes().to_vec());
    }

    #[test]
    fn layout_from_bpp() {
        assert_eq!(PixelLayout::from_bytes_per_pixel(4).unwrap(), PixelLayout::Bgra32);
        assert!(PixelLayout::from_bytes_per_pixel(1).is_err());
    }
}
