//! Display-side receive and decode stages.
//!
//! ```text
//! socket ──► TileReceiver ──► recv queue ──► TileDecoder ──► view queue ──► pacer
//!            (async task)                    (blocking thread)
//! ```
//!
//! Malformed messages and tiles that fail to decode are logged and
//! dropped. A socket read failure after streaming has started ends the
//! node. A clean EOF closes both queues so the pacer drains and stops.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::codec::TileCodec;
use crate::error::{Result, VwallError};
use crate::frame::DecodedTile;
use crate::geometry::Region;
use crate::queue::{Consumer, Producer};
use crate::wire::{Framing, Inbound, TileFrameCodec, TileMessage};

// ── TileReceiver ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    pub messages: u64,
    pub bytes: u64,
    pub malformed: u64,
}

/// Reads framed tile messages from the head.
pub struct TileReceiver<R> {
    framed: FramedRead<R, TileFrameCodec>,
    stats: ReceiveStats,
}

impl<R: AsyncRead + Unpin> TileReceiver<R> {
    pub fn new(reader: R, framing: Framing) -> Self {
        Self {
            framed: FramedRead::new(reader, TileFrameCodec::new(framing)),
            stats: ReceiveStats::default(),
        }
    }

    /// Override the largest accepted message.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        let codec = TileFrameCodec::new(self.framed.decoder().framing()).with_max_size(max);
        *self.framed.decoder_mut() = codec;
        self
    }

    /// Forward messages into `output` until the head hangs up.
    pub async fn run(mut self, output: Producer<TileMessage>) -> Result<ReceiveStats> {
        while let Some(item) = self.framed.next().await {
            let message = match item {
                Ok(Inbound::Tile(m)) => m,
                Ok(Inbound::Malformed { len, reason }) => {
                    self.stats.malformed += 1;
                    warn!(len, "dropping malformed message: {reason}");
                    continue;
                }
                Err(VwallError::Io(e)) => {
                    return Err(VwallError::Transport(format!("read from head failed: {e}")));
                }
                Err(e) => return Err(e),
            };

            self.stats.messages += 1;
            self.stats.bytes += message.payload.len() as u64;
            if output.push(message).await.is_err() {
                debug!("receive queue closed; receiver stopping");
                break;
            }
        }

        info!(
            messages = self.stats.messages,
            bytes = self.stats.bytes,
            malformed = self.stats.malformed,
            "head stream ended"
        );
        Ok(self.stats)
    }
}

// ── TileDecoder ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub decoded: u64,
    pub failed: u64,
}

/// Decompresses tiles and optionally crops them to a region of interest.
pub struct TileDecoder {
    codec: Arc<dyn TileCodec>,
    roi: Option<Region>,
    roi_warned: bool,
    stats: DecodeStats,
}

impl TileDecoder {
    pub fn new(codec: Arc<dyn TileCodec>) -> Self {
        Self {
            codec,
            roi: None,
            roi_warned: false,
            stats: DecodeStats::default(),
        }
    }

    /// Keep only `roi` of every decoded tile.
    pub fn with_roi(mut self, roi: Option<Region>) -> Self {
        self.roi = roi;
        self
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    pub fn decode(&mut self, message: &TileMessage) -> Result<DecodedTile> {
        let mut image = match self.codec.decode(&message.payload) {
            Ok(image) => image,
            Err(e) => {
                self.stats.failed += 1;
                return Err(e);
            }
        };

        if let Some(roi) = self.roi {
            if roi.fits_within(image.width(), image.height()) {
                image = image::imageops::crop_imm(&image, roi.x, roi.y, roi.width, roi.height).to_image();
            } else if !self.roi_warned {
                self.roi_warned = true;
                warn!(
                    ?roi,
                    width = image.width(),
                    height = image.height(),
                    "region of interest exceeds the tile; showing the full tile"
                );
            }
        }

        self.stats.decoded += 1;
        Ok(DecodedTile {
            frame_id: message.frame_id,
            image,
            received_at: Instant::now(),
        })
    }

    /// Decode from `input` into `output` until `input` closes.
    ///
    /// Blocking; run it on a blocking thread.
    pub fn run(mut self, input: Consumer<TileMessage>, output: Producer<DecodedTile>) -> DecodeStats {
        debug!(codec = self.codec.name(), "decoder started");

        while let Some(message) = input.pop_blocking() {
            let tile = match self.decode(&message) {
                Ok(t) => t,
                Err(e) => {
                    warn!(frame_id = message.frame_id, "tile decode failed, dropping: {e}");
                    continue;
                }
            };
            if output.push_blocking(tile).is_err() {
                debug!("view queue closed; decoder stopping");
                break;
            }
        }

        info!(decoded = self.stats.decoded, failed = self.stats.failed, "decoder stopped");
        self.stats
    }
}

// ── Tests ────────────────────────────────────────────────────────
