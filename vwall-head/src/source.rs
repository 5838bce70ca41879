//! Frame sources available to the head binary.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, info};

use vwall_core::error::{Result, VwallError};
use vwall_core::source::{FrameSource, TestPatternSource};

use crate::config::{SourceConfig, SourceKind};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

// ── ImageSequenceSource ──────────────────────────────────────────

/// Stills from a directory in file-name order, or a single image.
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    /// Passes over `files`; 0 repeats forever.
    loops: u32,
    pass: u32,
    position: usize,
    interval: Option<Duration>,
    fps: Option<f64>,
    last_emit: Option<Instant>,
}

impl ImageSequenceSource {
    pub fn open(path: &Path) -> Result<Self> {
        let files = if path.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(path)
                .map_err(|e| VwallError::Source(format!("cannot read {}: {e}", path.display())))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| is_image(p))
                .collect();
            files.sort();
            files
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(VwallError::Source(format!("{} does not exist", path.display())));
        };

        if files.is_empty() {
            return Err(VwallError::Source(format!("no images in {}", path.display())));
        }
        info!(path = %path.display(), images = files.len(), "image sequence opened");

        Ok(Self {
            files,
            loops: 1,
            pass: 0,
            position: 0,
            interval: None,
            fps: None,
            last_emit: None,
        })
    }

    pub fn with_loops(mut self, loops: u32) -> Self {
        self.loops = loops;
        self
    }

    /// Emit at most `fps` frames per second; 0 is unthrottled.
    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        if fps > 0.0 {
            self.interval = Some(Duration::from_secs_f64(1.0 / fps));
            self.fps = Some(fps);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn pace(&mut self) {
        if let (Some(interval), Some(last)) = (self.interval, self.last_emit) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_emit = Some(Instant::now());
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.position == self.files.len() {
            self.pass += 1;
            if self.loops != 0 && self.pass >= self.loops {
                return Ok(None);
            }
            debug!(pass = self.pass, "restarting image sequence");
            self.position = 0;
        }

        let path = &self.files[self.position];
        let frame = image::open(path)
            .map_err(|e| VwallError::Source(format!("cannot decode {}: {e}", path.display())))?
            .into_rgb8();
        self.position += 1;

        self.pace();
        Ok(Some(frame))
    }

    fn frame_rate(&self) -> Option<f64> {
        self.fps
    }
}

/// Build the source named by the `[source]` config section.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    match config.kind {
        SourceKind::Images => {
            let source = ImageSequenceSource::open(&config.path)?
                .with_loops(config.loops)
                .with_frame_rate(config.fps);
            Ok(Box::new(source))
        }
        SourceKind::TestPattern => Ok(Box::new(TestPatternSource::new(
            config.width,
            config.height,
            config.count,
        ))),
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vwall-head-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_png(dir: &Path, name: &str, shade: u8) {
        RgbImage::from_pixel(4, 2, Rgb([shade, 0, 0]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn plays_files_in_name_order_and_ignores_others() {
        let dir = scratch_dir("order");
        write_png(&dir, "b.png", 2);
        write_png(&dir, "a.png", 1);
        std::fs::write(dir.join("notes.txt"), "not an image").unwrap();

        let mut src = ImageSequenceSource::open(&dir).unwrap();
        assert_eq!(src.len(), 2);
        assert_eq!(src.next_frame().unwrap().unwrap().get_pixel(0, 0)[0], 1);
        assert_eq!(src.next_frame().unwrap().unwrap().get_pixel(0, 0)[0], 2);
        assert!(src.next_frame().unwrap().is_none());
    }

    #[test]
    fn loops_the_requested_number_of_times() {
        let dir = scratch_dir("loops");
        write_png(&dir, "only.png", 9);

        let mut src = ImageSequenceSource::open(&dir.join("only.png")).unwrap().with_loops(3);
        let mut count = 0;
        while src.next_frame().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn empty_or_missing_path_is_a_source_error() {
        let dir = scratch_dir("empty");
        assert!(matches!(ImageSequenceSource::open(&dir), Err(VwallError::Source(_))));
        assert!(ImageSequenceSource::open(&dir.join("missing")).is_err());
    }

    #[test]
    fn test_pattern_config_builds_counted_source() {
        let config = SourceConfig {
            kind: SourceKind::TestPattern,
            count: 2,
            ..Default::default()
        };
        let mut src = open_source(&config).unwrap();
        assert!(src.next_frame().unwrap().is_some());
        assert!(src.next_frame().unwrap().is_some());
        assert!(src.next_frame().unwrap().is_none());
    }
}
