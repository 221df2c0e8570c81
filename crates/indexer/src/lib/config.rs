use std::collections::HashMap;
use std::net::SocketAddr;

use beaconwatch_shared::chain::Chain;

use crate::env::{self, EnvVarValue};
use crate::tracing::LogFormat;

const DEFAULT_CONSENSUS_CONCURRENCY: usize = 10;
const DEFAULT_CONSENSUS_RETRIES: u32 = 3;
const DEFAULT_EXECUTION_CONCURRENCY: usize = 5;
const DEFAULT_EXECUTION_RETRIES: u32 = 2;
const DEFAULT_DELAY_SLOTS_TO_HEAD: u64 = 3;
const DEFAULT_MAX_UNPROCESSED_EPOCHS: u64 = 5;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone)]
pub struct EnvVars {
    pub database_url: EnvVarValue<String>,
    pub consensus_full_api_url: EnvVarValue<String>,
    pub consensus_archive_api_url: EnvVarValue<String>,
    pub consensus_api_request_per_second: EnvVarValue<usize>,
    pub consensus_api_retries: EnvVarValue<u32>,
    pub consensus_lookback_slot: EnvVarValue<u64>,
    pub consensus_delay_slots_to_head: EnvVarValue<u64>,
    pub execution_api_url: EnvVarValue<String>,
    pub execution_api_bkp_url: EnvVarValue<String>,
    pub execution_api_bkp_key: EnvVarValue<String>,
    pub execution_api_request_per_second: EnvVarValue<usize>,
    pub execution_api_retries: EnvVarValue<u32>,
    pub chain: EnvVarValue<Chain>,
    pub log_level: EnvVarValue<String>,
    pub log_format: EnvVarValue<LogFormat>,
    pub service_bind_to_addr: EnvVarValue<SocketAddr>,
    pub max_unprocessed_epochs: EnvVarValue<u64>,
}

impl EnvVars {
    pub fn init_from_env_or_crash() -> Self {
        Self {
            database_url: env::DATABASE_URL.required(),
            consensus_full_api_url: env::CONSENSUS_FULL_API_URL.required(),
            consensus_archive_api_url: env::CONSENSUS_ARCHIVE_API_URL.required(),
            consensus_api_request_per_second: env::CONSENSUS_API_REQUEST_PER_SECOND
                .default(DEFAULT_CONSENSUS_CONCURRENCY),
            consensus_api_retries: env::CONSENSUS_API_RETRIES.default(DEFAULT_CONSENSUS_RETRIES),
            consensus_lookback_slot: env::CONSENSUS_LOOKBACK_SLOT.required(),
            consensus_delay_slots_to_head: env::CONSENSUS_DELAY_SLOTS_TO_HEAD
                .default(DEFAULT_DELAY_SLOTS_TO_HEAD),
            execution_api_url: env::EXECUTION_API_URL.required(),
            execution_api_bkp_url: env::EXECUTION_API_BKP_URL.required(),
            execution_api_bkp_key: env::EXECUTION_API_BKP_KEY.required(),
            execution_api_request_per_second: env::EXECUTION_API_REQUEST_PER_SECOND
                .default(DEFAULT_EXECUTION_CONCURRENCY),
            execution_api_retries: env::EXECUTION_API_RETRIES.default(DEFAULT_EXECUTION_RETRIES),
            chain: env::CHAIN.required(),
            log_level: env::LOG_LEVEL.default(DEFAULT_LOG_LEVEL.to_owned()),
            log_format: env::LOG_FORMAT.default(LogFormat::Plain),
            service_bind_to_addr: env::SERVICE_BIND_TO_ADDR
                .default(SocketAddr::from(([0, 0, 0, 0], 8080))),
            max_unprocessed_epochs: env::MAX_UNPROCESSED_EPOCHS
                .default(DEFAULT_MAX_UNPROCESSED_EPOCHS),
        }
    }

    pub fn for_logging(&self) -> HashMap<&'static str, String> {
        let mut result = HashMap::new();
        result.insert("chain", format!("{:?}", self.chain.value));
        result.insert("database_url", "***".to_string());
        result.insert("consensus_full_api_url", "***".to_string());
        result.insert("consensus_archive_api_url", "***".to_string());
        result.insert(
            "consensus_api_request_per_second",
            self.consensus_api_request_per_second.value.to_string(),
        );
        result.insert(
            "consensus_api_retries",
            self.consensus_api_retries.value.to_string(),
        );
        result.insert(
            "consensus_lookback_slot",
            self.consensus_lookback_slot.value.to_string(),
        );
        result.insert(
            "consensus_delay_slots_to_head",
            self.consensus_delay_slots_to_head.value.to_string(),
        );
        result.insert(
            "execution_api_request_per_second",
            self.execution_api_request_per_second.value.to_string(),
        );
        result.insert(
            "execution_api_retries",
            self.execution_api_retries.value.to_string(),
        );
        result.insert("log_level", self.log_level.value.clone());
        result.insert("log_format", format!("{:?}", self.log_format.value));
        result.insert(
            "service_bind_to_addr",
            self.service_bind_to_addr.value.to_string(),
        );
        result.insert(
            "max_unprocessed_epochs",
            self.max_unprocessed_epochs.value.to_string(),
        );
        result
    }
}
