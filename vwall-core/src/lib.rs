//! # vwall-core
//!
//! Pipeline library for a tiled video wall: one head process splits each
//! source frame into a grid of tiles and streams them in lock-step to N
//! display nodes, which decode and render their tile.
//!
//! This crate contains:
//! - **Plumbing**: `queue` (bounded MPMC queue with async and blocking ends)
//! - **Layout**: `GridGeometry`, `Region`, `TileCompositor`
//! - **Compression**: `TileCodec` with `JpegCodec` and `ZstdCodec`,
//!   per-tile `EncodingControl`, `AdaptiveTileEncoder`
//! - **Wire**: `TileFrameCodec` for framed TCP I/O via `tokio_util`
//! - **Head**: `ConnectionBarrier`, `FrameBroadcaster`, `AckTracker`,
//!   `ControlSurface`, `HeadPipeline`
//! - **Display**: `TileReceiver`, `TileDecoder`, `DisplayPacer`,
//!   `DisplayPipeline`
//! - **Error**: `VwallError`, a `thiserror`-based error hierarchy

pub mod acks;
pub mod barrier;
pub mod broadcaster;
pub mod codec;
pub mod compositor;
pub mod control;
pub mod display;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod head;
pub mod pacer;
pub mod params;
pub mod queue;
pub mod receiver;
pub mod source;
pub mod wire;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use acks::AckTracker;
pub use barrier::{BarrierPhase, ConnectionBarrier, Node};
pub use broadcaster::{BroadcastCounters, BroadcastStats, FailurePolicy, FrameBroadcaster, TileSink};
pub use codec::{CodecKind, JpegCodec, TileCodec, ZstdCodec};
pub use compositor::TileCompositor;
pub use control::ControlSurface;
pub use display::{DisplayPipeline, DisplayPipelineConfig, DisplaySummary};
pub use encoder::AdaptiveTileEncoder;
pub use error::{Result, VwallError};
pub use frame::{DecodedTile, EncodedTile, Frame, Tile};
pub use geometry::{GridGeometry, Region};
pub use head::{HeadPipeline, HeadPipelineConfig, HeadSummary};
pub use pacer::{DisplayPacer, NullSurface, Surface};
pub use params::{EncodingControl, EncodingParams, SamplingMode};
pub use queue::{Consumer, Producer};
pub use receiver::{TileDecoder, TileReceiver};
pub use source::{FrameSource, TestPatternSource};
pub use wire::{Framing, TileFrameCodec, TileMessage};
