//! Connection barrier: nothing streams until every display is connected.
//!
//! ```text
//! Listening ──(connected == N)──► Armed ──(into_streaming)──► Streaming
//!     │
//!     └── accept error / peer gone / deadline ──► fatal
//! ```
//!
//! Tile ids are handed out in connection order. If a display must always
//! show the same tile across restarts, the deployment has to make the
//! displays connect in a fixed order.

use std::net::SocketAddr;
use std::time::Duration;

use futures::FutureExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{Result, VwallError};

// ── BarrierPhase ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierPhase {
    Listening,
    Armed,
    Streaming,
}

// ── Node ─────────────────────────────────────────────────────────

/// A connected display node.
#[derive(Debug)]
pub struct Node {
    /// Tile id assigned at connect time.
    pub index: usize,
    pub peer: SocketAddr,
    pub stream: TcpStream,
}

// ── ConnectionBarrier ────────────────────────────────────────────

pub struct ConnectionBarrier {
    expected: usize,
    phase: BarrierPhase,
    nodes: Vec<Node>,
    accept_timeout: Option<Duration>,
}

impl ConnectionBarrier {
    /// Barrier for `expected` display nodes.
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            phase: if expected == 0 {
                BarrierPhase::Armed
            } else {
                BarrierPhase::Listening
            },
            nodes: Vec::with_capacity(expected),
            accept_timeout: None,
        }
    }

    /// Fail if the wall is not complete within `timeout`.
    pub fn with_accept_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.accept_timeout = timeout;
        self
    }

    pub fn phase(&self) -> BarrierPhase {
        self.phase
    }

    pub fn connected_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Record an accepted connection at the next free tile slot.
    pub fn admit(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<usize> {
        if self.phase != BarrierPhase::Listening {
            return Err(VwallError::Other(format!(
                "connection from {peer} while barrier is {:?}",
                self.phase
            )));
        }
        if let Err(e) = stream.set_nodelay(true) {
            warn!(%peer, "could not set TCP_NODELAY: {e}");
        }

        let index = self.nodes.len();
        self.nodes.push(Node {
            index,
            peer,
            stream,
        });
        info!(node = index, %peer, "display connected ({}/{})", self.nodes.len(), self.expected);

        if self.nodes.len() == self.expected {
            self.phase = BarrierPhase::Armed;
        }
        Ok(index)
    }

    /// Accept connections until all `expected` nodes are present.
    pub async fn wait(&mut self, listener: &TcpListener) -> Result<()> {
        let deadline = self.accept_timeout.map(|t| Instant::now() + t);

        while self.phase == BarrierPhase::Listening {
            let accepted = match deadline {
                Some(at) => match tokio::time::timeout_at(at, listener.accept()).await {
                    Ok(r) => r,
                    Err(_) => {
                        return Err(VwallError::BarrierTimeout {
                            connected: self.nodes.len(),
                            expected: self.expected,
                            timeout: self.accept_timeout.unwrap_or_default(),
                        });
                    }
                },
                None => listener.accept().await,
            };

            let (stream, peer) = accepted.map_err(|source| VwallError::Barrier {
                connected: self.nodes.len(),
                expected: self.expected,
                source,
            })?;
            self.admit(stream, peer)?;
        }

        self.check_alive()
    }

    /// Fail if any admitted peer has already hung up.
    fn check_alive(&self) -> Result<()> {
        let mut probe = [0u8; 1];
        for node in &self.nodes {
            let gone = match node.stream.peek(&mut probe).now_or_never() {
                Some(Ok(0)) => Some(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)),
                Some(Err(e)) => Some(e),
                _ => None,
            };
            if let Some(source) = gone {
                warn!(node = node.index, peer = %node.peer, "display disconnected before streaming");
                return Err(VwallError::Barrier {
                    connected: self.nodes.len(),
                    expected: self.expected,
                    source,
                });
            }
        }
        Ok(())
    }

    /// Hand the connected nodes over to the broadcaster.
    pub fn into_streaming(mut self) -> Result<Vec<Node>> {
        if self.phase != BarrierPhase::Armed {
            return Err(VwallError::Other(format!(
                "barrier not armed: {}/{} nodes",
                self.nodes.len(),
                self.expected
            )));
        }
        self.phase = BarrierPhase::Streaming;
        info!(nodes = self.nodes.len(), "barrier released; streaming");
        Ok(self.nodes)
    }
}

// ── Tests ────────────────────────────────────────────────────────
