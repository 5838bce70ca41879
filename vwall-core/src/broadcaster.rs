//! Lock-step frame broadcaster.
//!
//! For every wall frame the broadcaster takes exactly one encoded tile per
//! display, tags them all with the same `frame_id`, and sends them
//! concurrently. It moves on to the next frame only once every send of
//! the current one has completed at the transport layer, so the slowest
//! socket sets the cadence for the whole wall.
//!
//! Encoders may drop a tile that failed to compress. Tiles carry their
//! source sequence number, and before sending the broadcaster discards
//! older tiles until every display's tile comes from the same source
//! frame. The wall skips that frame instead of showing mixed content.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::SinkExt;
use futures::future::join_all;
use tokio::io::AsyncWrite;
use tokio::net::tcp::OwnedWriteHalf;
use tokio_util::codec::FramedWrite;
use tracing::{debug, error, info, warn};

use crate::error::{Result, VwallError};
use crate::frame::EncodedTile;
use crate::queue::Consumer;
use crate::wire::{TileFrameCodec, TileMessage};

/// Default frame id ring size.
pub const DEFAULT_RING_SIZE: u32 = 1 << 16;

// ── TileSink ─────────────────────────────────────────────────────

/// Where the broadcaster writes one display's tiles.
#[async_trait]
pub trait TileSink: Send {
    /// Resolve once the transport has accepted the whole message.
    async fn send_tile(&mut self, message: TileMessage) -> Result<()>;
}

#[async_trait]
impl<W> TileSink for FramedWrite<W, TileFrameCodec>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_tile(&mut self, message: TileMessage) -> Result<()> {
        self.send(message).await
    }
}

/// The sink used for real display nodes.
pub type TcpTileSink = FramedWrite<OwnedWriteHalf, TileFrameCodec>;

// ── FailurePolicy ────────────────────────────────────────────────

/// What a failed send does to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Any lost display ends the session.
    #[default]
    Fatal,
    /// Drop the display and keep the rest in lock-step while at least
    /// `min_nodes` remain.
    Degrade { min_nodes: usize },
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Fatal => write!(f, "fatal"),
            FailurePolicy::Degrade { min_nodes } => write!(f, "degrade(min {min_nodes})"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = VwallError;

    /// `fatal`, `degrade` (min 1) or `degrade:<min_nodes>`.
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            None if s.eq_ignore_ascii_case("fatal") => Ok(FailurePolicy::Fatal),
            None if s.eq_ignore_ascii_case("degrade") => Ok(FailurePolicy::Degrade { min_nodes: 1 }),
            Some((kind, min)) if kind.eq_ignore_ascii_case("degrade") => {
                let min_nodes = min
                    .trim()
                    .parse::<usize>()
                    .map_err(|e| VwallError::Config(format!("bad min_nodes {min:?}: {e}")))?;
                Ok(FailurePolicy::Degrade {
                    min_nodes: min_nodes.max(1),
                })
            }
            _ => Err(VwallError::Config(format!("unknown failure policy {s:?}"))),
        }
    }
}

// ── BroadcastCounters ────────────────────────────────────────────

/// Live counters, readable from other tasks while streaming.
#[derive(Debug, Default)]
pub struct BroadcastCounters {
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    skipped: AtomicU64,
    degraded: AtomicU64,
}

/// Point-in-time copy of [`BroadcastCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Wall frames fully delivered to every live display.
    pub frames_sent: u64,
    pub bytes_sent: u64,
    /// Tiles thrown away to realign displays on one source frame.
    pub skipped: u64,
    /// Displays dropped under [`FailurePolicy::Degrade`].
    pub degraded: u64,
}

impl BroadcastCounters {
    pub fn snapshot(&self) -> BroadcastStats {
        BroadcastStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Acquire)
    }

    /// One wall frame reached every live display.
    pub(crate) fn record_frame(&self) {
        self.frames_sent.fetch_add(1, Ordering::AcqRel);
    }
}

impl fmt::Display for BroadcastStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames {} bytes {} discarded {} degraded {}",
            self.frames_sent, self.bytes_sent, self.skipped, self.degraded
        )
    }
}

// ── FrameBroadcaster ─────────────────────────────────────────────

struct Destination<S> {
    index: usize,
    /// `None` once degraded.
    sink: Option<S>,
    queue: Consumer<EncodedTile>,
}

/// Streams encoded tiles to every display in lock-step.
pub struct FrameBroadcaster<S: TileSink> {
    destinations: Vec<Destination<S>>,
    ring_size: u32,
    policy: FailurePolicy,
    frame_id: u32,
    counters: Arc<BroadcastCounters>,
}

impl<S: TileSink> FrameBroadcaster<S> {
    /// `sinks[i]` receives the tiles popped from `queues[i]`.
    pub fn new(sinks: Vec<S>, queues: Vec<Consumer<EncodedTile>>) -> Result<Self> {
        if sinks.len() != queues.len() {
            return Err(VwallError::Config(format!(
                "{} sinks for {} send queues",
                sinks.len(),
                queues.len()
            )));
        }
        Ok(Self {
            destinations: sinks
                .into_iter()
                .zip(queues)
                .enumerate()
                .map(|(index, (sink, queue))| Destination {
                    index,
                    sink: Some(sink),
                    queue,
                })
                .collect(),
            ring_size: DEFAULT_RING_SIZE,
            policy: FailurePolicy::Fatal,
            frame_id: 0,
            counters: Arc::new(BroadcastCounters::default()),
        })
    }

    /// Frame ids wrap modulo `ring_size` (minimum 1).
    pub fn with_ring_size(mut self, ring_size: u32) -> Self {
        self.ring_size = ring_size.max(1);
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Share counters with observers (control surface, ack tracker).
    pub fn with_counters(mut self, counters: Arc<BroadcastCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn counters(&self) -> Arc<BroadcastCounters> {
        Arc::clone(&self.counters)
    }

    /// Frame id the next wall frame will carry.
    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    pub fn live_nodes(&self) -> usize {
        self.destinations.iter().filter(|d| d.sink.is_some()).count()
    }

    /// Stream until the send queues close.
    ///
    /// Returns the final counters on clean shutdown, or the error that
    /// ended the session under the active [`FailurePolicy`].
    pub async fn run(mut self) -> Result<BroadcastStats> {
        info!(
            nodes = self.destinations.len(),
            ring_size = self.ring_size,
            policy = %self.policy,
            "broadcaster started"
        );

        while let Some(batch) = self.next_batch().await {
            self.send_frame(batch).await?;
        }

        let stats = self.counters.snapshot();
        info!(%stats, "send queues closed; broadcaster stopped");
        Ok(stats)
    }

    /// One tile per destination, all from the same source frame.
    ///
    /// `None` once any queue is closed and drained.
    async fn next_batch(&mut self) -> Option<Vec<EncodedTile>> {
        let mut batch = Vec::with_capacity(self.destinations.len());
        for dest in &self.destinations {
            batch.push(dest.queue.pop().await?);
        }

        loop {
            let target = batch.iter().map(|t| t.seq).max()?;
            if batch.iter().all(|t| t.seq == target) {
                return Some(batch);
            }
            for (dest, slot) in self.destinations.iter().zip(batch.iter_mut()) {
                while slot.seq < target {
                    debug!(node = dest.index, seq = slot.seq, target, "discarding tile to realign");
                    self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                    *slot = dest.queue.pop().await?;
                }
            }
        }
    }

    async fn send_frame(&mut self, batch: Vec<EncodedTile>) -> Result<()> {
        let frame_id = self.frame_id;

        let sends = self
            .destinations
            .iter_mut()
            .zip(batch)
            .filter_map(|(dest, tile)| {
                let index = dest.index;
                let sink = dest.sink.as_mut()?;
                let len = tile.payload.len() as u64;
                let message = TileMessage::new(frame_id, tile.payload);
                Some(async move { (index, len, sink.send_tile(message).await) })
            });
        let results = join_all(sends).await;

        let mut sent_count = 0usize;
        for (index, len, result) in results {
            match result {
                Ok(()) => {
                    sent_count += 1;
                    self.counters.bytes_sent.fetch_add(len, Ordering::Relaxed);
                }
                Err(e) => self.node_failed(index, frame_id, e)?,
            }
        }

        if sent_count == self.live_nodes() {
            self.counters.record_frame();
            self.frame_id = (frame_id + 1) % self.ring_size;
        }
        Ok(())
    }

    fn node_failed(&mut self, index: usize, frame_id: u32, e: VwallError) -> Result<()> {
        match self.policy {
            FailurePolicy::Fatal => {
                error!(node = index, frame_id, "send failed: {e}");
                Err(VwallError::NodeLost {
                    node: index,
                    reason: e.to_string(),
                })
            }
            FailurePolicy::Degrade { min_nodes } => {
                self.destinations[index].sink = None;
                self.counters.degraded.fetch_add(1, Ordering::Relaxed);
                let live = self.live_nodes();
                warn!(node = index, frame_id, live, "send failed, display degraded: {e}");
                if live < min_nodes {
                    return Err(VwallError::WallDegraded {
                        live,
                        min: min_nodes,
                    });
                }
                Ok(())
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
