//! Per-tile adaptive encoder.
//!
//! One encoder runs per display. For every tile it loads that display's
//! current [`EncodingParams`] snapshot, so the control surface can lower
//! quality for a bandwidth-starved node without touching the others.
//! A tile that fails to encode is logged and dropped; the broadcaster
//! realigns the wall on the next complete frame.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::codec::TileCodec;
use crate::error::Result;
use crate::frame::{EncodedTile, Tile};
use crate::params::{EncodingParams, TileParams};
use crate::queue::{Consumer, Producer};

// ── EncoderStats ─────────────────────────────────────────────────

/// Counters reported when an encoder stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderStats {
    pub encoded: u64,
    pub failed: u64,
    pub bytes: u64,
}

// ── AdaptiveTileEncoder ──────────────────────────────────────────

/// Compresses the tiles of one display.
pub struct AdaptiveTileEncoder {
    tile_id: usize,
    codec: Arc<dyn TileCodec>,
    params: TileParams,
    stats: EncoderStats,
}

impl AdaptiveTileEncoder {
    pub fn new(codec: Arc<dyn TileCodec>, params: TileParams) -> Self {
        Self {
            tile_id: params.index(),
            codec,
            params,
            stats: EncoderStats::default(),
        }
    }

    pub fn tile_id(&self) -> usize {
        self.tile_id
    }

    pub fn stats(&self) -> EncoderStats {
        self.stats
    }

    /// Parameters the next tile will be encoded with.
    pub fn current_params(&self) -> EncodingParams {
        self.params.load()
    }

    /// Encode one tile with the parameters in effect right now.
    pub fn encode(&mut self, tile: &Tile) -> Result<EncodedTile> {
        let params = self.params.load();
        match self.codec.encode(&tile.image, params) {
            Ok(payload) => {
                self.stats.encoded += 1;
                self.stats.bytes += payload.len() as u64;
                Ok(EncodedTile {
                    tile_id: self.tile_id,
                    seq: tile.seq,
                    payload,
                    captured_at: tile.captured_at,
                })
            }
            Err(e) => {
                self.stats.failed += 1;
                Err(e)
            }
        }
    }

    /// Encode tiles from `input` into `output` until `input` closes.
    ///
    /// Blocking; run it on a blocking thread.
    pub fn run(mut self, input: Consumer<Tile>, output: Producer<EncodedTile>) -> EncoderStats {
        debug!(tile = self.tile_id, codec = self.codec.name(), "encoder started");

        while let Some(tile) = input.pop_blocking() {
            let encoded = match self.encode(&tile) {
                Ok(e) => e,
                Err(e) => {
                    warn!(tile = self.tile_id, seq = tile.seq, "tile encode failed, dropping: {e}");
                    continue;
                }
            };
            if output.push_blocking(encoded).is_err() {
                debug!(tile = self.tile_id, "send queue closed; encoder stopping");
                break;
            }
        }

        info!(
            tile = self.tile_id,
            encoded = self.stats.encoded,
            failed = self.stats.failed,
            bytes = self.stats.bytes,
            "encoder stopped"
        );
        self.stats
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ZstdCodec;
    use crate::error::VwallError;
    use crate::params::{EncodingControl, SamplingMode};
    use crate::queue;
    use bytes::Bytes;
    use image::RgbImage;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Records the params of every call and fails on 13-pixel-wide tiles.
    #[derive(Default)]
    struct RecordingCodec {
        seen: Mutex<Vec<EncodingParams>>,
    }

    impl TileCodec for RecordingCodec {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn encode(&self, tile: &RgbImage, params: EncodingParams) -> Result<Bytes> {
            self.seen.lock().unwrap().push(params);
            if tile.width() == 13 {
                return Err(VwallError::Codec("unlucky width".into()));
            }
            Ok(Bytes::from(vec![params.quality]))
        }

        fn decode(&self, _: &[u8]) -> Result<RgbImage> {
            unreachable!()
        }
    }

    fn tile(seq: u64, width: u32) -> Tile {
        Tile {
            tile_id: 0,
            seq,
            image: RgbImage::new(width, 4),
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn parameter_update_is_visible_to_later_encodes() {
        let codec = Arc::new(RecordingCodec::default());
        let control = EncodingControl::new(1, EncodingParams::new(SamplingMode::S420, 80));
        let mut enc = AdaptiveTileEncoder::new(codec.clone(), control.tile(0).unwrap());

        enc.encode(&tile(0, 4)).unwrap();
        control.set_quality(0, 25).unwrap();

        // Must be observed within a bounded number of calls; with
        // acquire/release it is the very next one.
        let observed = (1..=3).any(|seq| enc.encode(&tile(seq, 4)).unwrap().payload[0] == 25);
        assert!(observed);
        assert_eq!(codec.seen.lock().unwrap()[0].quality, 80);
    }

    #[test]
    fn tiles_use_their_own_parameters() {
        let control = EncodingControl::new(2, EncodingParams::default());
        control.set_quality(1, 10).unwrap();
        let codec: Arc<dyn TileCodec> = Arc::new(RecordingCodec::default());

        let mut a = AdaptiveTileEncoder::new(codec.clone(), control.tile(0).unwrap());
        let mut b = AdaptiveTileEncoder::new(codec, control.tile(1).unwrap());
        assert_eq!(a.encode(&tile(0, 4)).unwrap().payload[0], 80);
        assert_eq!(b.encode(&tile(0, 4)).unwrap().payload[0], 10);
        assert_eq!(b.tile_id(), 1);
    }

    #[test]
    fn run_drops_failed_tiles_and_keeps_going() {
        let control = EncodingControl::new(1, EncodingParams::default());
        let enc = AdaptiveTileEncoder::new(Arc::new(RecordingCodec::default()), control.tile(0).unwrap());

        let (tile_tx, tile_rx) = queue::bounded(8);
        let (out_tx, out_rx) = queue::bounded(8);
        for (seq, width) in [(0, 4), (1, 13), (2, 4)] {
            tile_tx.push_blocking(tile(seq, width)).unwrap();
        }
        drop(tile_tx);

        let stats = enc.run(tile_rx, out_tx);
        assert_eq!(stats, EncoderStats { encoded: 2, failed: 1, bytes: 2 });

        let seqs: Vec<u64> = std::iter::from_fn(|| out_rx.pop_blocking()).map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 2]);
    }

    #[test]
    fn real_codec_payload_decodes() {
        let control = EncodingControl::new(1, EncodingParams::default());
        let mut enc = AdaptiveTileEncoder::new(Arc::new(ZstdCodec), control.tile(0).unwrap());
        let encoded = enc.encode(&tile(7, 6)).unwrap();
        assert_eq!(encoded.seq, 7);
        assert_eq!(ZstdCodec.decode(&encoded.payload).unwrap().dimensions(), (6, 4));
    }
}
