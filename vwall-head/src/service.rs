//! Head service: binds the listeners and runs one streaming session.

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use vwall_core::error::Result;
use vwall_core::head::{HeadPipeline, HeadSummary};

use crate::config::HeadConfig;
use crate::source::open_source;

// ── HeadService ──────────────────────────────────────────────────

/// The top-level head service.
///
/// Owns the stream listener the displays connect to and, when enabled,
/// the operator control listener.
pub struct HeadService {
    config: HeadConfig,
}

impl HeadService {
    pub fn new(config: HeadConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HeadConfig {
        &self.config
    }

    /// Stream until the source ends, a fatal error occurs, or `shutdown`
    /// resolves.
    ///
    /// Returns `Ok(None)` when interrupted by `shutdown`.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<Option<HeadSummary>>
    where
        F: Future<Output = ()>,
    {
        let pipeline = HeadPipeline::new(
            self.config.to_pipeline_config()?,
            self.config.encoding_control()?,
        )?;

        let stream_addr = self.config.stream_addr();
        let listener = TcpListener::bind(&stream_addr).await?;
        info!("waiting for displays on {stream_addr}");

        let control = match self.config.control_addr() {
            Some(addr) => {
                let control_listener = TcpListener::bind(&addr).await?;
                let surface = Arc::new(pipeline.control_surface());
                Some(tokio::spawn(async move {
                    if let Err(e) = surface.serve(control_listener).await {
                        warn!("control surface stopped: {e}");
                    }
                }))
            }
            None => {
                info!("control surface disabled");
                None
            }
        };

        let source = open_source(&self.config.source)?;

        let outcome = tokio::select! {
            result = pipeline.run(&listener, source) => result.map(Some),
            _ = shutdown => {
                info!("shutdown requested");
                Ok(None)
            }
        };

        if let Some(handle) = control {
            handle.abort();
        }
        outcome
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use vwall_core::error::VwallError;

    fn local_config() -> HeadConfig {
        let mut config = HeadConfig::default();
        config.network.bind_address = "127.0.0.1".into();
        config.network.stream_port = 0;
        config.network.control_port = 0;
        config
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_barrier() {
        let service = HeadService::new(local_config());
        let outcome = service.run_until(async {}).await.unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn bad_config_fails_before_binding() {
        let mut config = local_config();
        config.network.nodes = 7;
        let err = HeadService::new(config)
            .run_until(std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, VwallError::Config(_)));
    }
}
