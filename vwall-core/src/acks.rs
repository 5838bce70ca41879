//! Head-side pacing acknowledgements.
//!
//! Displays that enable acks write each rendered `frame_id` back on their
//! stream socket, one decimal number per line. The tracker records the
//! latest one per node and warns when a node renders too far behind what
//! the broadcaster has already delivered. It only observes: the
//! broadcaster never waits on it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info, warn};

use crate::broadcaster::BroadcastCounters;

/// Longest ack line accepted; a frame id is at most 10 digits.
const MAX_ACK_LINE: usize = 32;

const NONE: u64 = u64::MAX;

struct NodeAcks {
    last: AtomicU64,
    lagging: AtomicBool,
}

/// Last rendered frame per display node.
pub struct AckTracker {
    nodes: Box<[NodeAcks]>,
    counters: Arc<BroadcastCounters>,
    ring_size: u32,
    lag_warn: u32,
}

impl AckTracker {
    pub fn new(nodes: usize, counters: Arc<BroadcastCounters>, ring_size: u32, lag_warn: u32) -> Self {
        Self {
            nodes: (0..nodes)
                .map(|_| NodeAcks {
                    last: AtomicU64::new(NONE),
                    lagging: AtomicBool::new(false),
                })
                .collect(),
            counters,
            ring_size: ring_size.max(1),
            lag_warn,
        }
    }

    pub fn last_rendered(&self, node: usize) -> Option<u32> {
        let v = self.nodes.get(node)?.last.load(Ordering::Acquire);
        (v != NONE).then_some(v as u32)
    }

    /// Frames between the last delivered frame and `frame_id`, modulo the ring.
    pub fn lag(&self, frame_id: u32) -> u32 {
        let sent = self.counters.frames_sent();
        if sent == 0 {
            return 0;
        }
        let ring = self.ring_size as u64;
        let newest = (sent - 1) % ring;
        ((newest + ring - (frame_id as u64 % ring)) % ring) as u32
    }

    /// Record an ack and return the node's current lag.
    pub fn record(&self, node: usize, frame_id: u32) -> u32 {
        let Some(acks) = self.nodes.get(node) else {
            return 0;
        };
        acks.last.store(frame_id as u64, Ordering::Release);

        let lag = self.lag(frame_id);
        let over = self.lag_warn > 0 && lag > self.lag_warn;
        let was = acks.lagging.swap(over, Ordering::AcqRel);
        if over && !was {
            warn!(node, frame_id, lag, limit = self.lag_warn, "display is falling behind");
        } else if !over && was {
            info!(node, frame_id, lag, "display caught up");
        }
        lag
    }

    /// One `node:frame_id` pair per node that has acked, for the control surface.
    pub fn summary(&self) -> String {
        (0..self.nodes.len())
            .filter_map(|n| self.last_rendered(n).map(|f| format!("{n}:{f}")))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Read `node`'s ack lines until it disconnects.
    pub async fn track<R: AsyncRead + Unpin>(self: Arc<Self>, node: usize, reader: R) {
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_ACK_LINE));
        let mut count = 0u64;

        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => match line.trim().parse::<u32>() {
                    Ok(frame_id) => {
                        self.record(node, frame_id);
                        count += 1;
                    }
                    Err(_) => debug!(node, ?line, "ignoring malformed ack"),
                },
                Err(e) => {
                    debug!(node, "ack stream closed: {e}");
                    break;
                }
            }
        }
        debug!(node, acks = count, "ack reader stopped");
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn counters_at(frames: u64) -> Arc<BroadcastCounters> {
        let c = Arc::new(BroadcastCounters::default());
        for _ in 0..frames {
            c.record_frame();
        }
        c
    }

    #[test]
    fn lag_is_measured_around_the_ring() {
        let tracker = AckTracker::new(1, counters_at(12), 10, 3);
        // Newest delivered id is 11 % 10 = 1.
        assert_eq!(tracker.lag(1), 0);
        assert_eq!(tracker.lag(9), 2);
        assert_eq!(tracker.lag(5), 6);
    }

    #[test]
    fn record_keeps_latest_per_node() {
        let tracker = AckTracker::new(2, counters_at(5), 100, 0);
        assert_eq!(tracker.last_rendered(0), None);
        tracker.record(0, 3);
        tracker.record(0, 4);
        tracker.record(1, 2);
        assert_eq!(tracker.last_rendered(0), Some(4));
        assert_eq!(tracker.summary(), "0:4,1:2");
        assert_eq!(tracker.last_rendered(9), None);
    }

    #[tokio::test]
    async fn track_parses_lines_and_skips_garbage() {
        let tracker = Arc::new(AckTracker::new(1, counters_at(3), 100, 0));
        let mock = tokio_test::io::Builder::new()
            .read(b"0\n1\nbanana\n")
            .read(b"2\n")
            .build();
        Arc::clone(&tracker).track(0, mock).await;
        assert_eq!(tracker.last_rendered(0), Some(2));
    }
}
