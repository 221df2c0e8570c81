use std::sync::Arc;

use beaconwatch_shared::beacon_time::BeaconTime;
use beaconwatch_shared::chain::{Chain, ChainConfig, ChainInfo};

use crate::client::beacon::BeaconClient;
use crate::client::execution::ExecutionClient;
use crate::client::reliable::NodeKind;
use crate::client::InitializationError;
use crate::config::EnvVars;
use crate::controllers::epochs::EpochsController;
use crate::controllers::slots::SlotsController;
use crate::controllers::validators::ValidatorsController;
use crate::controllers::Controllers;
use crate::prometheus_metrics::Metrics;
use crate::storage::{self, Store};

const PROMETHEUS_NAMESPACE: &str = "beaconwatch";
const DB_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to create HTTP client: {0}")]
    Client(#[from] InitializationError),
    #[error("Failed to initialize storage: {0}")]
    Storage(#[from] storage::Error),
}

/// Everything the service needs, constructed once at startup from the
/// validated environment. Clients, controllers and the store are immutable
/// after construction; the DB is the only shared mutable state.
pub struct IndexerRuntime {
    pub chain: Chain,
    pub chain_config: ChainConfig,
    pub time: BeaconTime,
    pub store: Arc<Store>,
    pub beacon: Arc<BeaconClient>,
    pub execution: Arc<ExecutionClient>,
    pub controllers: Arc<Controllers>,
    pub metrics: Arc<Metrics>,
    pub max_unprocessed_epochs: u64,
}

impl IndexerRuntime {
    pub async fn init(env_vars: &EnvVars) -> Result<Self, Error> {
        let chain = env_vars.chain.value;
        let chain_config = chain.config();
        let time = BeaconTime::new(
            &chain_config,
            env_vars.consensus_lookback_slot.value,
            env_vars.consensus_delay_slots_to_head.value,
        );
        let metrics = Arc::new(Metrics::new(PROMETHEUS_NAMESPACE));

        let beacon = Arc::new(BeaconClient::new(
            &env_vars.consensus_archive_api_url.value,
            &env_vars.consensus_full_api_url.value,
            env_vars.consensus_api_request_per_second.value,
            env_vars.consensus_api_retries.value,
            metrics.services.consensus.clone(),
        )?);
        let execution = Arc::new(ExecutionClient::new(
            &env_vars.execution_api_url.value,
            &env_vars.execution_api_bkp_url.value,
            &env_vars.execution_api_bkp_key.value,
            chain_config.execution_chain_id,
            env_vars.execution_api_request_per_second.value,
            chain_config.slot_duration_ms,
            metrics.services.execution.clone(),
        )?);

        let store = Arc::new(Store::connect(&env_vars.database_url.value, DB_MAX_CONNECTIONS).await?);

        let controllers = Arc::new(Controllers {
            epochs: EpochsController::new(Arc::clone(&beacon), Arc::clone(&store), time.clone()),
            slots: SlotsController::new(
                Arc::clone(&beacon),
                Arc::clone(&execution),
                Arc::clone(&store),
                time.clone(),
            ),
            validators: ValidatorsController::new(
                Arc::clone(&beacon),
                Arc::clone(&store),
                time.clone(),
            ),
        });

        Ok(Self {
            chain,
            chain_config,
            time,
            store,
            beacon,
            execution,
            controllers,
            metrics,
            max_unprocessed_epochs: env_vars.max_unprocessed_epochs.value,
        })
    }

    /// Copies the live gate statistics into their gauges; called when the
    /// metrics endpoint is scraped.
    pub fn observe_gates(&self) {
        self.metrics
            .gates
            .consensus_primary
            .observe(&self.beacon.gate_stats(NodeKind::Primary));
        self.metrics
            .gates
            .consensus_secondary
            .observe(&self.beacon.gate_stats(NodeKind::Secondary));
        self.metrics.gates.execution.observe(&self.execution.gate_stats());
    }
}
