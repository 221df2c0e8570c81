use prometheus::{Encoder, Registry, TextEncoder};

use beaconwatch_indexer::config::EnvVars;
use beaconwatch_indexer::runtime::IndexerRuntime;

pub struct AppState {
    pub registry: Registry,
    pub env_vars: EnvVars,
    pub runtime: IndexerRuntime,
}

impl AppState {
    pub fn log_config(&self) {
        tracing::info!(env_vars = ?self.env_vars.for_logging(), "Env vars");
    }

    pub fn report_metrics(&self) -> anyhow::Result<(Vec<u8>, String)> {
        self.runtime.observe_gates();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((buffer, encoder.format_type().to_owned()))
    }
}
