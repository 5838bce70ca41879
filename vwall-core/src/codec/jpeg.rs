//! JPEG tiles: `jpeg-encoder` on the way out, the `image` crate on the way in.

use bytes::Bytes;
use image::{ImageFormat, RgbImage, imageops};
use jpeg_encoder::{ColorType, Encoder, SamplingFactor};

use crate::codec::TileCodec;
use crate::error::{Result, VwallError};
use crate::params::{EncodingParams, SamplingMode};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Baseline JPEG with the tile's chroma subsampling. `sampling = gray`
/// produces a single-component image.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCodec;

impl TileCodec for JpegCodec {
    fn name(&self) -> &'static str {
        "jpeg"
    }

    fn encode(&self, tile: &RgbImage, params: EncodingParams) -> Result<Bytes> {
        let (width, height) = match (u16::try_from(tile.width()), u16::try_from(tile.height())) {
            (Ok(w), Ok(h)) => (w, h),
            _ => {
                return Err(VwallError::Codec(format!(
                    "{}x{} tile exceeds the jpeg size limit",
                    tile.width(),
                    tile.height()
                )));
            }
        };

        // Rough guess at the compressed size to avoid regrowth.
        let mut out = Vec::with_capacity(tile.as_raw().len() / 8);
        let mut encoder = Encoder::new(&mut out, params.quality.clamp(1, 100));
        match params.sampling {
            SamplingMode::Gray => {
                let luma = imageops::grayscale(tile);
                encoder.encode(luma.as_raw(), width, height, ColorType::Luma)
            }
            colour => {
                encoder.set_sampling_factor(sampling_factor(colour));
                encoder.encode(tile.as_raw(), width, height, ColorType::Rgb)
            }
        }?;
        Ok(Bytes::from(out))
    }

    fn decode(&self, payload: &[u8]) -> Result<RgbImage> {
        if !payload.starts_with(&SOI) {
            return Err(VwallError::Codec("payload is not a jpeg (missing SOI)".into()));
        }
        // The decoder pads truncated scans instead of failing.
        if !payload.ends_with(&EOI) {
            return Err(VwallError::Codec("jpeg payload truncated (missing EOI)".into()));
        }
        Ok(image::load_from_memory_with_format(payload, ImageFormat::Jpeg)?.into_rgb8())
    }
}

/// Horizontal x vertical chroma subsampling for a colour mode.
fn sampling_factor(mode: SamplingMode) -> SamplingFactor {
    match mode {
        SamplingMode::S444 | SamplingMode::Gray => SamplingFactor::F_1_1,
        SamplingMode::S422 => SamplingFactor::F_2_1,
        SamplingMode::S420 => SamplingFactor::F_2_2,
    }
}
