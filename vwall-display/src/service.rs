//! Display service: connects to the head and renders until the stream ends.

use std::future::Future;

use tracing::info;

use vwall_core::display::{self, DisplayPipeline, DisplaySummary};
use vwall_core::error::Result;
use vwall_core::pacer::{NullSurface, Surface};

use crate::config::DisplayConfig;
use crate::surface::FramebufferSurface;

pub struct DisplayService {
    config: DisplayConfig,
}

impl DisplayService {
    pub fn new(config: DisplayConfig) -> Self {
        Self { config }
    }

    /// The configured output; an empty device path renders nowhere.
    pub fn open_surface(&self) -> Result<Box<dyn Surface>> {
        let out = &self.config.display;
        if out.device.as_os_str().is_empty() {
            info!("no output device configured; running headless");
            return Ok(Box::new(NullSurface::default()));
        }
        Ok(Box::new(FramebufferSurface::open(
            &out.device,
            out.width,
            out.height,
            self.config.pixel_layout()?,
        )?))
    }

    /// Run one session, or stop early when `shutdown` resolves.
    ///
    /// Returns `Ok(None)` when interrupted by `shutdown`.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<Option<DisplaySummary>>
    where
        F: Future<Output = ()>,
    {
        let pipeline = DisplayPipeline::new(self.config.to_pipeline_config()?);
        let surface = self.open_surface()?;

        let session = async {
            let stream = display::connect(&self.config.network.head_address, self.config.connect_timeout()).await?;
            pipeline.run(stream, surface).await
        };

        tokio::select! {
            result = session => {
                let (_, summary) = result?;
                Ok(Some(summary))
            }
            _ = shutdown => {
                info!("shutdown requested");
                Ok(None)
            }
        }
    }
}
