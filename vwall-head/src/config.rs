//! Configuration for the head process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vwall_core::broadcaster::{DEFAULT_RING_SIZE, FailurePolicy};
use vwall_core::codec::CodecKind;
use vwall_core::error::{Result, VwallError};
use vwall_core::geometry::GridGeometry;
use vwall_core::head::HeadPipelineConfig;
use vwall_core::params::{EncodingControl, EncodingParams, SamplingMode};
use vwall_core::queue::DEFAULT_TILE_QUEUE;
use vwall_core::wire::Framing;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadConfig {
    /// Wall layout.
    pub grid: GridGeometry,
    pub network: NetworkConfig,
    pub stream: StreamConfig,
    pub encoding: EncodingConfig,
    pub source: SourceConfig,
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address both listeners bind to.
    pub bind_address: String,
    /// TCP port displays connect to.
    pub stream_port: u16,
    /// TCP port for the operator control surface; 0 disables it.
    pub control_port: u16,
    /// Expected displays; 0 means `rows * columns`.
    pub nodes: usize,
    /// Give up if the wall is incomplete after this long; 0 waits forever.
    pub accept_timeout_ms: u64,
    pub framing: Framing,
}

/// Streaming behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Frame ids wrap modulo this value.
    pub ring_size: u32,
    /// Compositor to encoder queue capacity.
    pub tile_queue: usize,
    /// Encoder to broadcaster queue capacity.
    pub send_queue: usize,
    /// "fatal" or "degrade".
    pub failure_policy: String,
    /// Minimum live displays under "degrade".
    pub min_nodes: usize,
    /// Warn when a display's acks trail by more frames than this; 0 disables.
    pub ack_lag_warn: u32,
}

/// Initial encoding parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    pub codec: CodecKind,
    pub sampling: SamplingMode,
    /// 1 (smallest) to 100 (best).
    pub quality: u8,
    /// Per-tile exceptions to the values above.
    pub overrides: Vec<TileOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TileOverride {
    pub tile: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Image files from `path`.
    Images,
    /// Solid colour frames.
    #[default]
    TestPattern,
}

/// Where frames come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Directory of stills or a single image (`images`).
    pub path: PathBuf,
    /// Passes over the images; 0 repeats forever (`images`).
    pub loops: u32,
    /// Frames per second to read at; 0 is as fast as the wall accepts (`images`).
    pub fps: f64,
    /// Frame count (`test-pattern`).
    pub count: u64,
    /// Frame size (`test-pattern`).
    pub width: u32,
    pub height: u32,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            stream_port: 7400,
            control_port: 7401,
            nodes: 0,
            accept_timeout_ms: 0,
            framing: Framing::default(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ring_size: DEFAULT_RING_SIZE,
            tile_queue: DEFAULT_TILE_QUEUE,
            send_queue: DEFAULT_TILE_QUEUE,
            failure_policy: "fatal".into(),
            min_nodes: 1,
            ack_lag_warn: 30,
        }
    }
}

impl Default for EncodingConfig {
    fn default() -> Self {
        let params = EncodingParams::default();
        Self {
            codec: CodecKind::default(),
            sampling: params.sampling,
            quality: params.quality,
            overrides: Vec::new(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            path: PathBuf::from("frames"),
            loops: 1,
            fps: 30.0,
            count: 300,
            width: 3840,
            height: 2160,
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

impl HeadConfig {
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

    pub fn stream_addr(&self) -> String {
        format!("{}:{}", self.network.bind_address, self.network.stream_port)
    }

    /// `None` when the control surface is disabled.
    pub fn control_addr(&self) -> Option<String> {
        (self.network.control_port != 0)
            .then(|| format!("{}:{}", self.network.bind_address, self.network.control_port))
    }

    pub fn failure_policy(&self) -> Result<FailurePolicy> {
        match self.stream.failure_policy.parse::<FailurePolicy>()? {
            FailurePolicy::Degrade { .. } => Ok(FailurePolicy::Degrade {
                min_nodes: self.stream.min_nodes.max(1),
            }),
            fatal => Ok(fatal),
        }
    }

    /// Convert into a `HeadPipelineConfig`, checking cross-field constraints.
    pub fn to_pipeline_config(&self) -> Result<HeadPipelineConfig> {
        self.grid.validate()?;
        let tiles = self.grid.tile_count();
        if self.network.nodes != 0 && self.network.nodes != tiles {
            return Err(VwallError::Config(format!(
                "network.nodes = {} but the grid has {tiles} tiles",
                self.network.nodes
            )));
        }

        Ok(HeadPipelineConfig {
            geometry: self.grid,
            codec: self.encoding.codec,
            framing: self.network.framing,
            ring_size: self.stream.ring_size.max(1),
            tile_queue: self.stream.tile_queue.max(1),
            send_queue: self.stream.send_queue.max(1),
            policy: self.failure_policy()?,
            accept_timeout: (self.network.accept_timeout_ms > 0)
                .then(|| Duration::from_millis(self.network.accept_timeout_ms)),
            ack_lag_warn: self.stream.ack_lag_warn,
        })
    }

    /// Initial per-tile parameters with overrides applied.
    pub fn encoding_control(&self) -> Result<EncodingControl> {
        let base = EncodingParams::new(self.encoding.sampling, self.encoding.quality);
        let control = EncodingControl::new(self.grid.tile_count(), base);
        for o in &self.encoding.overrides {
            let current = control.get(o.tile).ok_or_else(|| {
                VwallError::Config(format!("override for tile {} outside the grid", o.tile))
            })?;
            control.set(
                o.tile,
                EncodingParams::new(
                    o.sampling.unwrap_or(current.sampling),
                    o.quality.unwrap_or(current.quality),
                ),
            )?;
        }
        Ok(control)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("vwall-head-{}-{name}.toml", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_loads_defaults() {
        let path = std::env::temp_dir().join("vwall-head-does-not-exist.toml");
        let cfg = HeadConfig::load(&path).unwrap();
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn typo_in_grid_does_not_fall_back_to_defaults() {
        let bad = scratch_file("grid-typo", "[grid]\nrows = 1\ncolumns = 4\ntile_width = \"1920\"\n");
        let result = HeadConfig::load(&bad);
        std::fs::remove_file(&bad).ok();
        assert!(matches!(result, Err(VwallError::Config(_))));

        let good = scratch_file("grid-ok", "[grid]\nrows = 1\ncolumns = 4\ntile_width = 1920\n");
        let cfg = HeadConfig::load(&good).unwrap();
        std::fs::remove_file(&good).ok();
        assert_eq!((cfg.grid.rows, cfg.grid.columns, cfg.grid.tile_width), (1, 4, 1920));
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let path = scratch_file("bad", "[logging]\nlevel = 3\n");
        let err = HeadConfig::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, VwallError::Config(_)), "{err:?}");
    }

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&HeadConfig::default()).unwrap();
        assert!(text.contains("stream_port"));
        assert!(text.contains("tile_width"));
        assert!(text.contains("failure_policy"));
    }

    #[test]
    fn roundtrip_config() {
        let mut cfg = HeadConfig::default();
        cfg.encoding.overrides.push(TileOverride {
            tile: 1,
            sampling: Some(SamplingMode::Gray),
            quality: None,
        });
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: HeadConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.stream_port, 7400);
        assert_eq!(parsed.grid, cfg.grid);
        assert_eq!(parsed.encoding.overrides, cfg.encoding.overrides);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg: HeadConfig = toml::from_str(
            r#"
            [grid]
            rows = 3
            columns = 4

            [network]
            framing = "delimited"

            [stream]
            failure_policy = "degrade"
            min_nodes = 10
            "#,
        )
        .unwrap();
        assert_eq!(cfg.grid.tile_count(), 12);
        assert_eq!(cfg.grid.tile_width, GridGeometry::default().tile_width);

        let pipeline = cfg.to_pipeline_config().unwrap();
        assert_eq!(pipeline.framing, Framing::Delimited);
        assert_eq!(pipeline.policy, FailurePolicy::Degrade { min_nodes: 10 });
        assert_eq!(pipeline.accept_timeout, None);
    }

    #[test]
    fn node_count_must_match_grid() {
        let mut cfg = HeadConfig::default();
        cfg.network.nodes = 3;
        assert!(cfg.to_pipeline_config().is_err());
        cfg.network.nodes = 4;
        assert!(cfg.to_pipeline_config().is_ok());
    }

    #[test]
    fn overrides_apply_per_tile() {
        let mut cfg = HeadConfig::default();
        cfg.encoding.quality = 70;
        cfg.encoding.overrides = vec![TileOverride {
            tile: 2,
            sampling: None,
            quality: Some(30),
        }];
        let control = cfg.encoding_control().unwrap();
        assert_eq!(control.get(0).unwrap().quality, 70);
        assert_eq!(control.get(2).unwrap().quality, 30);
        assert_eq!(control.get(2).unwrap().sampling, cfg.encoding.sampling);

        cfg.encoding.overrides[0].tile = 99;
        assert!(cfg.encoding_control().is_err());
    }

    #[test]
    fn control_port_zero_disables_surface() {
        let mut cfg = HeadConfig::default();
        assert_eq!(cfg.control_addr().as_deref(), Some("0.0.0.0:7401"));
        cfg.network.control_port = 0;
        assert_eq!(cfg.control_addr(), None);
    }
}
