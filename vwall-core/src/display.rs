//! Display-side pipeline.
//!
//! ```text
//! head ──TCP──► TileReceiver ─► recv queue ─► TileDecoder ─► view queue ─► DisplayPacer ─► Surface
//!   ▲                                                                        │
//!   └──────────────────────────── ack lines (optional) ◄──────────────────────┘
//! ```

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::codec::CodecKind;
use crate::error::{Result, VwallError};
use crate::geometry::Region;
use crate::pacer::{DisplayPacer, PacerStats, Surface};
use crate::queue;
use crate::receiver::{DecodeStats, ReceiveStats, TileDecoder, TileReceiver};
use crate::wire::Framing;

const CONNECT_RETRY: Duration = Duration::from_millis(250);

/// Settings for [`DisplayPipeline`].
#[derive(Debug, Clone)]
pub struct DisplayPipelineConfig {
    pub framing: Framing,
    pub codec: CodecKind,
    pub recv_queue: usize,
    pub view_queue: usize,
    /// Part of each tile to show, in tile pixels.
    pub roi: Option<Region>,
    /// Surface position of the tile's top-left corner.
    pub x: u32,
    pub y: u32,
    /// 0 renders as fast as tiles arrive.
    pub max_fps: u32,
    /// Acknowledge rendered frames to the head.
    pub ack: bool,
}

impl Default for DisplayPipelineConfig {
    fn default() -> Self {
        Self {
            framing: Framing::default(),
            codec: CodecKind::default(),
            recv_queue: 8,
            view_queue: 4,
            roi: None,
            x: 0,
            y: 0,
            max_fps: 60,
            ack: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DisplaySummary {
    pub receive: ReceiveStats,
    pub decode: DecodeStats,
    pub render: PacerStats,
}

/// Connect to the head, retrying until `timeout` runs out.
pub async fn connect(address: &str, timeout: Option<Duration>) -> Result<TcpStream> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        match TcpStream::connect(address).await {
            Ok(stream) => {
                info!(%address, "connected to head");
                return Ok(stream);
            }
            Err(e) => {
                if deadline.is_some_and(|d| Instant::now() + CONNECT_RETRY > d) {
                    return Err(VwallError::Transport(format!("could not reach head at {address}: {e}")));
                }
                debug!(%address, "head not reachable yet: {e}");
                tokio::time::sleep(CONNECT_RETRY).await;
            }
        }
    }
}

/// Receives, decodes and renders one tile of the wall.
pub struct DisplayPipeline {
    config: DisplayPipelineConfig,
}

impl DisplayPipeline {
    pub fn new(config: DisplayPipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DisplayPipelineConfig {
        &self.config
    }

    /// Run until the head closes the stream.
    ///
    /// Returns the surface and counters on a clean end of stream, or the
    /// transport error that ended the node.
    pub async fn run<S: Surface + 'static>(&self, stream: TcpStream, surface: S) -> Result<(S, DisplaySummary)> {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("could not set TCP_NODELAY: {e}");
        }
        let (read, write) = stream.into_split();

        let (recv_tx, recv_rx) = queue::bounded(self.config.recv_queue);
        let (view_tx, view_rx) = queue::bounded(self.config.view_queue);

        let receiver = tokio::spawn(TileReceiver::new(read, self.config.framing).run(recv_tx));
        let decoder = TileDecoder::new(self.config.codec.build()).with_roi(self.config.roi);
        let decoding = tokio::task::spawn_blocking(move || decoder.run(recv_rx, view_tx));

        let pacer = DisplayPacer::new(surface)
            .with_origin(self.config.x, self.config.y)
            .with_max_fps(self.config.max_fps);
        // Dropping the write half would send FIN, which the head reads as
        // a lost display.
        let (pacer, _held_write) = if self.config.ack {
            (pacer.with_acks(write), None)
        } else {
            (pacer, Some(write))
        };
        let (surface, render) = pacer.run(view_rx).await?;

        let decode = decoding
            .await
            .map_err(|e| VwallError::Other(format!("decoder panicked: {e}")))?;
        let receive = receiver
            .await
            .map_err(|e| VwallError::Other(format!("receiver panicked: {e}")))??;

        Ok((
            surface,
            DisplaySummary {
                receive,
                decode,
                render,
            },
        ))
    }
}
