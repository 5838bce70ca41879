//! Lossless zstd tiles.
//!
//! ## Payload layout
//!
//! ```text
//! width:    u32 BE  (4)
//! height:   u32 BE  (4)
//! channels: u8      (1)   1 = luma, 3 = RGB
//! data:     [u8]          zstd frame of width*height*channels bytes
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use image::{DynamicImage, GrayImage, RgbImage, imageops};

use crate::codec::TileCodec;
use crate::error::{Result, VwallError};
use crate::params::EncodingParams;

const HEADER_LEN: usize = 9;

/// Upper bound on a decompressed tile, guards against hostile headers.
const MAX_TILE_BYTES: usize = 256 * 1024 * 1024;

/// Tightly packed pixels compressed with zstd.
///
/// Quality trades CPU for size: 100 selects level 1 (fastest), 1 selects
/// level 19.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdCodec;

impl ZstdCodec {
    /// zstd level used for `quality`.
    pub fn level_for(quality: u8) -> i32 {
        let q = quality.clamp(1, 100) as i32;
        1 + (100 - q) * 18 / 99
    }
}

impl TileCodec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn encode(&self, tile: &RgbImage, params: EncodingParams) -> Result<Bytes> {
        let (raw, channels) = if params.sampling.is_gray() {
            (imageops::grayscale(tile).into_raw(), 1u8)
        } else {
            (tile.as_raw().clone(), 3u8)
        };

        let compressed = ::zstd::bulk::compress(&raw, Self::level_for(params.quality))
            .map_err(|e| VwallError::Codec(format!("zstd encode failed: {e}")))?;

        let mut out = BytesMut::with_capacity(HEADER_LEN + compressed.len());
        out.put_u32(tile.width());
        out.put_u32(tile.height());
        out.put_u8(channels);
        out.extend_from_slice(&compressed);
        Ok(out.freeze())
    }

    fn decode(&self, payload: &[u8]) -> Result<RgbImage> {
        if payload.len() < HEADER_LEN {
            return Err(VwallError::Codec(format!(
                "zstd tile too short: {} < {HEADER_LEN}",
                payload.len()
            )));
        }
        let width = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let height = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let channels = payload[8];
        if channels != 1 && channels != 3 {
            return Err(VwallError::Codec(format!("unsupported channel count {channels}")));
        }

        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(channels as usize))
            .filter(|&n| n <= MAX_TILE_BYTES)
            .ok_or_else(|| VwallError::Codec(format!("implausible tile size {width}x{height}")))?;

        let raw = ::zstd::bulk::decompress(&payload[HEADER_LEN..], expected)
            .map_err(|e| VwallError::Codec(format!("zstd decode failed: {e}")))?;
        if raw.len() != expected {
            return Err(VwallError::Codec(format!(
                "zstd tile truncated: {} < {expected}",
                raw.len()
            )));
        }

        let image = if channels == 1 {
            GrayImage::from_raw(width, height, raw).map(|g| DynamicImage::ImageLuma8(g).into_rgb8())
        } else {
            RgbImage::from_raw(width, height, raw)
        };
        image.ok_or_else(|| VwallError::Codec("pixel buffer size mismatch".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SamplingMode;
    use image::Rgb;

    fn pattern(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([x as u8, y as u8, (x ^ y) as u8]))
    }

    #[test]
    fn colour_modes_are_lossless() {
        let tile = pattern(40, 24);
        for sampling in [SamplingMode::S444, SamplingMode::S422, SamplingMode::S420] {
            let bytes = ZstdCodec
                .encode(&tile, EncodingParams::new(sampling, 50))
                .unwrap();
            assert_eq!(ZstdCodec.decode(&bytes).unwrap(), tile);
        }
    }

    #[test]
    fn gray_mode_packs_one_channel() {
        let tile = RgbImage::from_pixel(8, 8, Rgb([10, 200, 30]));
        let gray = ZstdCodec
            .encode(&tile, EncodingParams::new(SamplingMode::Gray, 80))
            .unwrap();
        assert_eq!(gray[8], 1);

        let back = ZstdCodec.decode(&gray).unwrap();
        let p = back.get_pixel(3, 3);
        assert!(p[0] == p[1] && p[1] == p[2]);
    }

    #[test]
    fn level_mapping_spans_range() {
        assert_eq!(ZstdCodec::level_for(100), 1);
        assert_eq!(ZstdCodec::level_for(1), 19);
        assert!(ZstdCodec::level_for(50) > 1 && ZstdCodec::level_for(50) < 19);
    }

    #[test]
    fn corrupt_payloads_are_codec_errors() {
        let bytes = ZstdCodec
            .encode(&pattern(16, 16), EncodingParams::default())
            .unwrap();

        assert!(ZstdCodec.decode(&bytes[..5]).unwrap_err().is_per_item());
        assert!(ZstdCodec.decode(&bytes[..bytes.len() - 4]).unwrap_err().is_per_item());

        let mut bad_channels = bytes.to_vec();
        bad_channels[8] = 4;
        assert!(ZstdCodec.decode(&bad_channels).is_err());

        let mut huge = bytes.to_vec();
        huge[0..4].copy_from_slice(&u32::MAX.to_be_bytes());
        huge[4..8].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(ZstdCodec.decode(&huge).is_err());
    }
}
