//! Display node configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vwall_core::codec::CodecKind;
use vwall_core::display::DisplayPipelineConfig;
use vwall_core::error::{Result, VwallError};
use vwall_core::geometry::Region;
use vwall_core::wire::Framing;

use crate::surface::PixelLayout;

/// Top-level configuration for a display node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub network: NetworkConfig,
    pub display: OutputConfig,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Head stream address (IP:port).
    pub head_address: String,
    /// Keep retrying the head for this long; 0 retries forever.
    pub connect_timeout_ms: u64,
    /// Must match the head.
    pub framing: Framing,
    /// Send a pacing ack after every rendered frame.
    pub ack: bool,
}

/// Output device settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Framebuffer device or file. Empty renders nowhere.
    pub device: PathBuf,
    /// Device resolution.
    pub width: u32,
    pub height: u32,
    /// 2 (RGB565), 3 (BGR) or 4 (BGRA).
    pub bytes_per_pixel: u32,
    /// Where the tile's top-left corner lands on the device.
    pub x: u32,
    pub y: u32,
    /// Render rate cap; 0 is uncapped.
    pub max_fps: u32,
    /// Show only this part of each tile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roi: Option<Region>,
}

/// Receive-side tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Must match the head.
    pub codec: CodecKind,
    /// Undecoded messages buffered.
    pub recv_queue: usize,
    /// Decoded tiles buffered ahead of rendering.
    pub view_queue: usize,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            head_address: "127.0.0.1:7400".into(),
            connect_timeout_ms: 0,
            framing: Framing::default(),
            ack: false,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/fb0"),
            width: 1920,
            height: 1080,
            bytes_per_pixel: 4,
            x: 0,
            y: 0,
            max_fps: 60,
            roi: None,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        let defaults = DisplayPipelineConfig::default();
        Self {
            codec: defaults.codec,
            recv_queue: defaults.recv_queue,
            view_queue: defaults.view_queue,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl DisplayConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults. A file that exists but cannot be
    /// read or parsed is a `Config` error.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|e| VwallError::Config(format!("invalid config {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(VwallError::Config(format!("cannot read {}: {e}", path.display()))),
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.network.connect_timeout_ms > 0).then(|| Duration::from_millis(self.network.connect_timeout_ms))
    }

    pub fn pixel_layout(&self) -> Result<PixelLayout> {
        PixelLayout::from_bytes_per_pixel(self.display.bytes_per_pixel)
    }

    /// Convert into a `DisplayPipelineConfig`.
    pub fn to_pipeline_config(&self) -> Result<DisplayPipelineConfig> {
        if let Some(roi) = self.display.roi {
            if roi.width == 0 || roi.height == 0 {
                return Err(VwallError::Config("roi must have a non-zero size".into()));
            }
        }
        Ok(DisplayPipelineConfig {
            framing: self.network.framing,
            codec: self.stream.codec,
            recv_queue: self.stream.recv_queue.max(1),
            view_queue: self.stream.view_queue.max(1),
            roi: self.display.roi,
            x: self.display.x,
            y: self.display.y,
            max_fps: self.display.max_fps,
            ack: self.network.ack,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("vwall-display-{}-{name}.toml", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_loads_defaults() {
        let path = std::env::temp_dir().join("vwall-display-does-not-exist.toml");
        let cfg = DisplayConfig::load(&path).unwrap();
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let path = scratch_file("bad", "[logging]\nlevel = 3\n");
        let err = DisplayConfig::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, VwallError::Config(_)), "{err:?}");
    }

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&DisplayConfig::default()).unwrap();
        assert!(text.contains("head_address"));
        assert!(text.contains("bytes_per_pixel"));
        assert!(!text.contains("roi"));
    }

    #[test]
    fn roundtrip_with_roi() {
        let mut cfg = DisplayConfig::default();
        cfg.display.roi = Some(Region::new(10, 20, 300, 200));
        cfg.network.framing = Framing::Delimited;
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: DisplayConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.display.roi, cfg.display.roi);
        assert_eq!(parsed.network.framing, Framing::Delimited);
    }

    #[test]
    fn to_pipeline_config_carries_settings() {
        let cfg: DisplayConfig = toml::from_str(
            r#"
            [network]
            ack = true

            [display]
            x = 5
            max_fps = 30

            [stream]
            codec = "zstd"
            recv_queue = 0
            "#,
        )
        .unwrap();
        let p = cfg.to_pipeline_config().unwrap();
        assert!(p.ack);
        assert_eq!((p.x, p.max_fps), (5, 30));
        assert_eq!(p.codec, CodecKind::Zstd);
        assert_eq!(p.recv_queue, 1);
        assert_eq!(cfg.connect_timeout(), None);
    }

    #[test]
    fn empty_roi_rejected() {
        let mut cfg = DisplayConfig::default();
        cfg.display.roi = Some(Region::new(0, 0, 0, 10));
        assert!(cfg.to_pipeline_config().is_err());
    }
}
