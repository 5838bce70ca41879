//! Bounded FIFO queue connecting pipeline stages.
//!
//! Every buffer in the pipeline is one of these: per-tile queues between
//! the compositor and the encoders, per-node send queues between the
//! encoders and the broadcaster, and the receive/display queues on each
//! display node. A full queue stalls its producer, which is the only
//! backpressure mechanism in the system.
//!
//! The queue is a thin layer over a bounded `tokio::sync::mpsc` channel.
//! Blocked producers are released in arrival order by the channel's
//! semaphore; consumers share the receiver behind a fair
//! `tokio::sync::Mutex`, so blocked consumers are served in arrival
//! order too.
//!
//! Both halves offer async and `*_blocking` forms. The blocking forms must
//! only be called outside the async runtime (e.g. inside
//! `tokio::task::spawn_blocking`).
//!
//! Dropping every [`Producer`] closes the queue: consumers drain what is
//! left and then [`Consumer::pop`] returns `None`.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::error::VwallError;

/// Default capacity for tile queues.
pub const DEFAULT_TILE_QUEUE: usize = 32;

/// Create a bounded queue holding at most `capacity` items.
///
/// A capacity of zero is raised to one.
pub fn bounded<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        Producer { tx },
        Consumer {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

// ── QueueClosed ──────────────────────────────────────────────────

/// Returned by a push when every consumer is gone. Carries the item back.
pub struct QueueClosed<T>(pub T);

impl<T> QueueClosed<T> {
    /// Recover the item that could not be queued.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueClosed(..)")
    }
}

impl<T> fmt::Display for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue closed")
    }
}

impl<T> std::error::Error for QueueClosed<T> {}

impl<T> From<QueueClosed<T>> for VwallError {
    fn from(_: QueueClosed<T>) -> Self {
        VwallError::ChannelClosed
    }
}

// ── Producer ─────────────────────────────────────────────────────

/// Sending half. Clone it for additional producers.
pub struct Producer<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Producer<T> {
    /// Insert at the tail, waiting while the queue is full.
    pub async fn push(&self, item: T) -> Result<(), QueueClosed<T>> {
        self.tx.send(item).await.map_err(|e| QueueClosed(e.0))
    }

    /// Blocking form of [`push`](Self::push).
    pub fn push_blocking(&self, item: T) -> Result<(), QueueClosed<T>> {
        self.tx.blocking_send(item).map_err(|e| QueueClosed(e.0))
    }

    /// Insert without waiting. A full or closed queue hands the item back.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(t) | mpsc::error::TrySendError::Closed(t) => t,
        })
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Whether every consumer has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ── Consumer ─────────────────────────────────────────────────────

/// Receiving half. Clones share the same underlying queue.
pub struct Consumer<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for Consumer<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<T> Consumer<T> {
    /// Remove the head, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }

    /// Blocking form of [`pop`](Self::pop).
    pub fn pop_blocking(&self) -> Option<T> {
        self.rx.blocking_lock().blocking_recv()
    }

    /// Remove the head without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Items currently queued, or 0 while another consumer holds the queue.
    pub fn len(&self) -> usize {
        self.rx.try_lock().map(|rx| rx.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Tests ────────────────────────────────────────────────────────
