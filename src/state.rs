use crate::config::ServerConfig;
use crate::patch::select::{ConfiguredLiveProbe, LiveProbe};
use crate::patch::service::{LiveConnector, PatchOrchestrator};
use anyhow::Result;
use std::sync::Arc;

/// Shared state handed to every tool invocation.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub orchestrator: Arc<PatchOrchestrator>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Result<Self> {
        Self::with_connector(config, None)
    }

    /// Build state with an explicit live connector. Production wiring
    /// passes one only on hosts where an automation host can exist.
    pub fn with_connector(
        config: ServerConfig,
        connector: Option<Arc<dyn LiveConnector>>,
    ) -> Result<Self> {
        config.ensure_workspace_root()?;
        let caps = ConfiguredLiveProbe::new(config.live_enabled).caps();
        let orchestrator = PatchOrchestrator::new(caps, connector);
        Ok(Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
        })
    }
}
