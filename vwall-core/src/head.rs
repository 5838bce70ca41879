//! Head-side pipeline.
//!
//! Wires the stages together for one streaming session:
//!
//! 1. [`ConnectionBarrier`] waits for all N displays.
//! 2. [`TileCompositor`] reads the source and splits frames into tiles
//!    (blocking thread).
//! 3. One [`AdaptiveTileEncoder`] per display compresses its tiles
//!    (blocking threads).
//! 4. [`FrameBroadcaster`] sends every frame to all displays in lock-step.
//! 5. An [`AckTracker`] reader per display watches pacing acks.
//!
//! Shutdown is cooperative. When the source ends the compositor drops its
//! producers, the tile queues close and drain, the encoders stop and close
//! the send queues, and the broadcaster returns. When the broadcaster
//! fails first, dropping its consumers unwinds the chain the other way.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;
use tracing::{info, warn};

use crate::acks::AckTracker;
use crate::barrier::ConnectionBarrier;
use crate::broadcaster::{
    BroadcastCounters, BroadcastStats, DEFAULT_RING_SIZE, FailurePolicy, FrameBroadcaster, TcpTileSink,
};
use crate::codec::CodecKind;
use crate::compositor::TileCompositor;
use crate::control::ControlSurface;
use crate::encoder::{AdaptiveTileEncoder, EncoderStats};
use crate::error::{Result, VwallError};
use crate::geometry::GridGeometry;
use crate::params::EncodingControl;
use crate::queue::{self, DEFAULT_TILE_QUEUE};
use crate::source::FrameSource;
use crate::wire::{Framing, TileFrameCodec};

// ── HeadConfig ───────────────────────────────────────────────────

/// Settings for [`HeadPipeline`].
#[derive(Debug, Clone)]
pub struct HeadPipelineConfig {
    pub geometry: GridGeometry,
    pub codec: CodecKind,
    pub framing: Framing,
    pub ring_size: u32,
    /// Capacity of each compositor to encoder queue.
    pub tile_queue: usize,
    /// Capacity of each encoder to broadcaster queue.
    pub send_queue: usize,
    pub policy: FailurePolicy,
    /// Give up if the wall is not complete in time. `None` waits forever.
    pub accept_timeout: Option<Duration>,
    /// Warn when a display's acks trail by more frames than this. 0 disables.
    pub ack_lag_warn: u32,
}

impl Default for HeadPipelineConfig {
    fn default() -> Self {
        Self {
            geometry: GridGeometry::default(),
            codec: CodecKind::default(),
            framing: Framing::default(),
            ring_size: DEFAULT_RING_SIZE,
            tile_queue: DEFAULT_TILE_QUEUE,
            send_queue: DEFAULT_TILE_QUEUE,
            policy: FailurePolicy::default(),
            accept_timeout: None,
            ack_lag_warn: 0,
        }
    }
}

// ── HeadSummary ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct HeadSummary {
    pub frames_composited: u64,
    pub broadcast: BroadcastStats,
    pub encoders: Vec<EncoderStats>,
}

// ── HeadPipeline ─────────────────────────────────────────────────

/// One head streaming session.
pub struct HeadPipeline {
    config: HeadPipelineConfig,
    params: Arc<EncodingControl>,
    counters: Arc<BroadcastCounters>,
    acks: Arc<AckTracker>,
}

impl HeadPipeline {
    /// `params` must hold one entry per tile of `config.geometry`.
    pub fn new(config: HeadPipelineConfig, params: EncodingControl) -> Result<Self> {
        config.geometry.validate()?;
        let tiles = config.geometry.tile_count();
        if params.tile_count() != tiles {
            return Err(VwallError::Config(format!(
                "{} encoding entries for {tiles} tiles",
                params.tile_count()
            )));
        }
        if let FailurePolicy::Degrade { min_nodes } = config.policy {
            if min_nodes == 0 || min_nodes > tiles {
                return Err(VwallError::Config(format!(
                    "min_nodes {min_nodes} must be within 1..={tiles}"
                )));
            }
        }

        let counters = Arc::new(BroadcastCounters::default());
        let acks = Arc::new(AckTracker::new(
            tiles,
            Arc::clone(&counters),
            config.ring_size,
            config.ack_lag_warn,
        ));
        Ok(Self {
            config,
            params: Arc::new(params),
            counters,
            acks,
        })
    }

    pub fn config(&self) -> &HeadPipelineConfig {
        &self.config
    }

    pub fn params(&self) -> Arc<EncodingControl> {
        Arc::clone(&self.params)
    }

    pub fn counters(&self) -> Arc<BroadcastCounters> {
        Arc::clone(&self.counters)
    }

    pub fn acks(&self) -> Arc<AckTracker> {
        Arc::clone(&self.acks)
    }

    /// Control surface bound to this session's live state.
    pub fn control_surface(&self) -> ControlSurface {
        ControlSurface::new(self.params(), self.counters()).with_acks(self.acks())
    }

    /// Wait for the wall on `listener`, then stream `source` to it.
    pub async fn run<S>(&self, listener: &TcpListener, source: S) -> Result<HeadSummary>
    where
        S: FrameSource + 'static,
    {
        let geometry = self.config.geometry;
        let n = geometry.tile_count();

        info!(
            rows = geometry.rows,
            columns = geometry.columns,
            canvas_width = geometry.canvas_width(),
            canvas_height = geometry.canvas_height(),
            "waiting for {n} displays"
        );
        let mut barrier = ConnectionBarrier::new(n).with_accept_timeout(self.config.accept_timeout);
        barrier.wait(listener).await?;
        let nodes = barrier.into_streaming()?;

        let mut sinks: Vec<TcpTileSink> = Vec::with_capacity(n);
        for node in nodes {
            let (read, write) = node.stream.into_split();
            sinks.push(FramedWrite::new(write, TileFrameCodec::new(self.config.framing)));
            tokio::spawn(Arc::clone(&self.acks).track(node.index, read));
        }

        let mut tile_tx = Vec::with_capacity(n);
        let mut send_rx = Vec::with_capacity(n);
        let mut encoders: Vec<JoinHandle<EncoderStats>> = Vec::with_capacity(n);
        let codec = self.config.codec.build();

        for tile in 0..n {
            let (ttx, trx) = queue::bounded(self.config.tile_queue);
            let (stx, srx) = queue::bounded(self.config.send_queue);
            let params = self
                .params
                .tile(tile)
                .ok_or_else(|| VwallError::Config(format!("no encoding entry for tile {tile}")))?;
            let encoder = AdaptiveTileEncoder::new(Arc::clone(&codec), params);
            encoders.push(tokio::task::spawn_blocking(move || encoder.run(trx, stx)));
            tile_tx.push(ttx);
            send_rx.push(srx);
        }

        let compositor = TileCompositor::new(geometry)?;
        let mut source = source;
        let composite = tokio::task::spawn_blocking(move || compositor.run(&mut source, tile_tx));

        let broadcast = FrameBroadcaster::new(sinks, send_rx)?
            .with_ring_size(self.config.ring_size)
            .with_policy(self.config.policy)
            .with_counters(self.counters())
            .run()
            .await?;

        let frames_composited = composite
            .await
            .map_err(|e| VwallError::Other(format!("compositor panicked: {e}")))??;

        let mut encoder_stats = Vec::with_capacity(n);
        for handle in encoders {
            match handle.await {
                Ok(stats) => encoder_stats.push(stats),
                Err(e) => warn!("encoder task failed: {e}"),
            }
        }

        info!(frames = frames_composited, %broadcast, "session finished");
        Ok(HeadSummary {
            frames_composited,
            broadcast,
            encoders: encoder_stats,
        })
    }
}
