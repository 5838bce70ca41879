//! Display-side render pacing.
//!
//! The pacer pops one decoded tile per cycle, blits it, and then sleeps
//! out the rest of the frame interval. With acknowledgements enabled it
//! also writes each rendered `frame_id` back to the head as a line of
//! decimal text. Acks are best-effort: a failed ack write disables
//! further acks but keeps rendering.

use std::time::Duration;

use futures::SinkExt;
use image::RgbImage;
use tokio::io::AsyncWrite;
use tokio::time::Instant;
use tokio_util::codec::{FramedWrite, LinesCodec};
use tracing::{debug, info, warn};

use crate::error::{Result, VwallError};
use crate::frame::DecodedTile;
use crate::queue::Consumer;

/// How often the effective frame rate is logged.
const FPS_LOG_INTERVAL: Duration = Duration::from_secs(5);

// ── Surface ──────────────────────────────────────────────────────

/// Something a display node can draw tiles onto.
pub trait Surface: Send {
    /// Draw `image` with its top-left corner at `(x, y)`.
    fn blit(&mut self, image: &RgbImage, x: u32, y: u32) -> Result<()>;

    /// Push pending pixels to the device. Most surfaces write through.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: Surface + ?Sized> Surface for Box<S> {
    fn blit(&mut self, image: &RgbImage, x: u32, y: u32) -> Result<()> {
        (**self).blit(image, x, y)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

/// Discards everything. For headless nodes and benchmarks.
#[derive(Debug, Default)]
pub struct NullSurface {
    pub blits: u64,
}

impl Surface for NullSurface {
    fn blit(&mut self, _image: &RgbImage, _x: u32, _y: u32) -> Result<()> {
        self.blits += 1;
        Ok(())
    }
}

// ── DisplayPacer ─────────────────────────────────────────────────

type AckSink = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, LinesCodec>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacerStats {
    pub rendered: u64,
    pub acks_sent: u64,
    pub last_frame_id: Option<u32>,
}

/// Renders decoded tiles no faster than `max_fps`.
pub struct DisplayPacer<S> {
    surface: S,
    x: u32,
    y: u32,
    interval: Option<Duration>,
    acks: Option<AckSink>,
    stats: PacerStats,
}

impl<S: Surface> DisplayPacer<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            x: 0,
            y: 0,
            interval: None,
            acks: None,
            stats: PacerStats::default(),
        }
    }

    /// Where on the surface tiles are drawn.
    pub fn with_origin(mut self, x: u32, y: u32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    /// Cap rendering at `max_fps`; 0 renders as fast as tiles arrive.
    pub fn with_max_fps(mut self, max_fps: u32) -> Self {
        self.interval = (max_fps > 0).then(|| Duration::from_secs(1) / max_fps);
        self
    }

    /// Acknowledge every rendered frame on `writer`.
    pub fn with_acks<W>(mut self, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        self.acks = Some(FramedWrite::new(writer, LinesCodec::new()));
        self
    }

    pub fn frame_interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Render until `input` closes. Returns the surface for inspection.
    ///
    /// Blits run on a blocking thread: a framebuffer write is one seek and
    /// one write per row.
    pub async fn run(self, input: Consumer<DecodedTile>) -> Result<(S, PacerStats)>
    where
        S: 'static,
    {
        let Self {
            mut surface,
            x,
            y,
            interval,
            mut acks,
            mut stats,
        } = self;
        let mut window_start = Instant::now();
        let mut window_frames = 0u64;

        while let Some(tile) = input.pop().await {
            let cycle_start = Instant::now();
            let frame_id = tile.frame_id;

            surface = tokio::task::spawn_blocking(move || -> Result<S> {
                surface.blit(&tile.image, x, y)?;
                surface.flush()?;
                Ok(surface)
            })
            .await
            .map_err(|e| VwallError::Other(format!("render task panicked: {e}")))??;
            stats.rendered += 1;
            stats.last_frame_id = Some(frame_id);

            acknowledge(&mut acks, &mut stats, frame_id).await;

            window_frames += 1;
            let elapsed = window_start.elapsed();
            if elapsed >= FPS_LOG_INTERVAL {
                let fps = window_frames as f64 / elapsed.as_secs_f64();
                debug!(fps, frame_id, "render rate");
                window_start = Instant::now();
                window_frames = 0;
            }

            if let Some(interval) = interval {
                tokio::time::sleep_until(cycle_start + interval).await;
            }
        }

        info!(
            rendered = stats.rendered,
            acks = stats.acks_sent,
            "view queue closed; pacer stopped"
        );
        if let Some(mut acks) = acks {
            if let Err(e) = SinkExt::<String>::close(&mut acks).await {
                debug!("closing ack stream failed: {e}");
            }
        }
        Ok((surface, stats))
    }
}

/// Best-effort: a failed write disables further acks.
async fn acknowledge(acks: &mut Option<AckSink>, stats: &mut PacerStats, frame_id: u32) {
    let Some(sink) = acks.as_mut() else {
        return;
    };
    match sink.send(frame_id.to_string()).await {
        Ok(()) => stats.acks_sent += 1,
        Err(e) => {
            warn!(frame_id, "ack write failed, disabling acks: {e}");
            *acks = None;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;
    use image::Rgb;
    use std::time::Instant as StdInstant;

    fn tile(frame_id: u32) -> DecodedTile {
        DecodedTile {
            frame_id,
            image: RgbImage::from_pixel(2, 2, Rgb([1, 2, 3])),
            received_at: StdInstant::now(),
        }
    }

    #[derive(Default)]
    struct Recording {
        origins: Vec<(u32, u32)>,
    }

    impl Surface for Recording {
        fn blit(&mut self, _image: &RgbImage, x: u32, y: u32) -> Result<()> {
            self.origins.push((x, y));
            Ok(())
        }
    }

    #[tokio::test]
    async fn renders_every_tile_at_origin() {
        let (tx, rx) = queue::bounded(8);
        for id in 0..3 {
            tx.push(tile(id)).await.unwrap();
        }
        drop(tx);

        let (surface, stats) = DisplayPacer::new(Recording::default())
            .with_origin(10, 20)
            .run(rx)
            .await
            .unwrap();
        assert_eq!(surface.origins, vec![(10, 20); 3]);
        assert_eq!(stats.rendered, 3);
        assert_eq!(stats.last_frame_id, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_out_the_frame_interval() {
        let (tx, rx) = queue::bounded(8);
        for id in 0..5 {
            tx.push(tile(id)).await.unwrap();
        }
        drop(tx);

        let start = Instant::now();
        DisplayPacer::new(NullSurface::default())
            .with_max_fps(10)
            .run(rx)
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn writes_one_ack_line_per_rendered_frame() {
        let (tx, rx) = queue::bounded(8);
        for id in [7, 8] {
            tx.push(tile(id)).await.unwrap();
        }
        drop(tx);

        let mock = tokio_test::io::Builder::new().write(b"7\n").write(b"8\n").build();
        let (_, stats) = DisplayPacer::new(NullSurface::default())
            .with_acks(mock)
            .run(rx)
            .await
            .unwrap();
        assert_eq!(stats.acks_sent, 2);
    }

    #[tokio::test]
    async fn failed_ack_does_not_stop_rendering() {
        let (tx, rx) = queue::bounded(8);
        for id in 0..3 {
            tx.push(tile(id)).await.unwrap();
        }
        drop(tx);

        let mock = tokio_test::io::Builder::new()
            .write_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let (surface, stats) = DisplayPacer::new(NullSurface::default())
            .with_acks(mock)
            .run(rx)
            .await
            .unwrap();
        assert_eq!(surface.blits, 3);
        assert_eq!(stats.acks_sent, 0);
    }

    struct ThreadRecorder {
        threads: Vec<std::thread::ThreadId>,
    }

    impl Surface for ThreadRecorder {
        fn blit(&mut self, _image: &RgbImage, _x: u32, _y: u32) -> Result<()> {
            self.threads.push(std::thread::current().id());
            Ok(())
        }
    }

    #[tokio::test]
    async fn blits_run_off_the_async_thread() {
        let (tx, rx) = queue::bounded(8);
        for id in 0..2 {
            tx.push(tile(id)).await.unwrap();
        }
        drop(tx);

        let (surface, _) = DisplayPacer::new(ThreadRecorder { threads: Vec::new() })
            .run(rx)
            .await
            .unwrap();
        let here = std::thread::current().id();
        assert_eq!(surface.threads.len(), 2);
        assert!(surface.threads.iter().all(|&t| t != here));
    }

    #[tokio::test]
    async fn ack_stream_is_flushed_on_close() {
        let (tx, rx) = queue::bounded(8);
        tx.push(tile(3)).await.unwrap();
        drop(tx);

        let (mut head_side, node_side) = tokio::io::duplex(64);
        DisplayPacer::new(NullSurface::default())
            .with_acks(node_side)
            .run(rx)
            .await
            .unwrap();

        let mut text = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut head_side, &mut text)
            .await
            .unwrap();
        assert_eq!(text, "3\n");
    }

    #[test]
    fn zero_fps_is_unpaced() {
        assert_eq!(DisplayPacer::new(NullSurface::default()).with_max_fps(0).frame_interval(), None);
        assert_eq!(
            DisplayPacer::new(NullSurface::default()).with_max_fps(50).frame_interval(),
            Some(Duration::from_millis(20))
        );
    }
}
