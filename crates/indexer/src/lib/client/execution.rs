use std::str::FromStr;
use std::time::Duration;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;

use super::reliable::{Error, Gate, GateStats};
use super::InitializationError;
use crate::prometheus_metrics::{calls, ServiceSeries};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Proposer fee recipient reward for one execution block.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionBlockReward {
    pub block_number: u64,
    pub miner_address: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub amount: BigDecimal,
}

#[derive(Debug, Deserialize)]
struct BlockscoutMiner {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct BlockscoutReward {
    #[serde(rename = "type")]
    kind: String,
    reward: String,
}

#[derive(Debug, Deserialize)]
struct BlockscoutBlock {
    miner: BlockscoutMiner,
    #[serde(default)]
    rewards: Vec<BlockscoutReward>,
    timestamp: String,
    height: u64,
}

#[derive(Debug, Deserialize)]
struct EtherscanResult {
    #[serde(rename = "blockMiner")]
    block_miner: String,
    #[serde(rename = "timeStamp")]
    time_stamp: String,
    #[serde(rename = "blockReward")]
    block_reward: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
}

#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    result: EtherscanResult,
}

fn decode_address(url: &str, raw: &str) -> Result<Vec<u8>, Error> {
    hex::decode(raw.strip_prefix("0x").unwrap_or(raw)).map_err(|e| Error::Decode {
        url: url.to_owned(),
        message: format!("Bad address {raw}: {e}"),
    })
}

fn decode_amount(url: &str, raw: &str) -> Result<BigDecimal, Error> {
    BigDecimal::from_str(raw).map_err(|e| Error::Decode {
        url: url.to_owned(),
        message: format!("Bad reward amount {raw}: {e}"),
    })
}

/// Execution-layer block reward reader. A Blockscout-style API is tried
/// first; on any failure the Etherscan-style backup is queried after a
/// one-slot pause.
pub struct ExecutionClient {
    http: Client,
    blockscout_base: String,
    etherscan_base: String,
    etherscan_api_key: String,
    chain_id: u64,
    gate: Gate,
    fallback_pause: Duration,
    metrics: ServiceSeries,
}

impl ExecutionClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        blockscout_url: &str,
        etherscan_url: &str,
        etherscan_api_key: &str,
        chain_id: u64,
        concurrency: usize,
        slot_duration_ms: u64,
        metrics: ServiceSeries,
    ) -> Result<Self, InitializationError> {
        let http = ClientBuilder::new().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            blockscout_base: blockscout_url.strip_suffix('/').unwrap_or(blockscout_url).to_owned(),
            etherscan_base: etherscan_url.strip_suffix('/').unwrap_or(etherscan_url).to_owned(),
            etherscan_api_key: etherscan_api_key.to_owned(),
            chain_id,
            gate: Gate::new(concurrency),
            fallback_pause: Duration::from_millis(slot_duration_ms),
            metrics,
        })
    }

    pub fn gate_stats(&self) -> GateStats {
        self.gate.stats()
    }

    pub async fn get_block(&self, block_number: u64) -> Result<ExecutionBlockReward, Error> {
        let _permit = self.gate.acquire().await;
        self.metrics
            .calls
            .with_label_values(&[calls::GET_EXECUTION_BLOCK])
            .inc();
        match self.fetch_blockscout(block_number).await {
            Ok(reward) => Ok(reward),
            Err(error) => {
                tracing::warn!(block_number, "Blockscout fetch failed, trying backup: {error}");
                self.metrics
                    .retries
                    .with_label_values(&[calls::GET_EXECUTION_BLOCK])
                    .inc();
                tokio::time::sleep(self.fallback_pause).await;
                self.fetch_etherscan(block_number).await.inspect_err(|_| {
                    self.metrics
                        .upstream_failures
                        .with_label_values(&[calls::GET_EXECUTION_BLOCK])
                        .inc();
                })
            }
        }
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, Error> {
        let response = self.http.get(&url).send().await.map_err(|source| Error::Http {
            url: url.clone(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status { url, status });
        }
        response.json::<T>().await.map_err(|source| Error::Decode {
            url,
            message: source.to_string(),
        })
    }

    async fn fetch_blockscout(&self, block_number: u64) -> Result<ExecutionBlockReward, Error> {
        let url = format!("{}/api/v2/blocks/{block_number}", self.blockscout_base);
        let block: BlockscoutBlock = self.fetch_json(url.clone()).await?;

        let reward = block
            .rewards
            .iter()
            .find(|entry| entry.kind == "Miner Reward")
            .ok_or_else(|| Error::Decode {
                url: url.clone(),
                message: format!("No miner reward entry for block {block_number}"),
            })?;
        let timestamp = DateTime::parse_from_rfc3339(&block.timestamp)
            .map_err(|e| Error::Decode {
                url: url.clone(),
                message: format!("Bad timestamp {}: {e}", block.timestamp),
            })?
            .with_timezone(&Utc);

        Ok(ExecutionBlockReward {
            block_number: block.height,
            miner_address: decode_address(&url, &block.miner.hash)?,
            timestamp,
            amount: decode_amount(&url, &reward.reward)?,
        })
    }

    async fn fetch_etherscan(&self, block_number: u64) -> Result<ExecutionBlockReward, Error> {
        let url = format!(
            "{}/api?chainid={}&module=block&action=getblockreward&blockno={}&apikey={}",
            self.etherscan_base, self.chain_id, block_number, self.etherscan_api_key
        );
        let response: EtherscanResponse = self.fetch_json(url.clone()).await?;
        let result = response.result;

        let seconds: i64 = result.time_stamp.parse().map_err(|e| Error::Decode {
            url: url.clone(),
            message: format!("Bad timestamp {}: {e}", result.time_stamp),
        })?;
        let timestamp = DateTime::<Utc>::from_timestamp(seconds, 0).ok_or_else(|| Error::Decode {
            url: url.clone(),
            message: format!("Timestamp {seconds} out of range"),
        })?;
        let block_number: u64 = result.block_number.parse().map_err(|e| Error::Decode {
            url: url.clone(),
            message: format!("Bad block number {}: {e}", result.block_number),
        })?;

        Ok(ExecutionBlockReward {
            block_number,
            miner_address: decode_address(&url, &result.block_miner)?,
            timestamp,
            amount: decode_amount(&url, &result.block_reward)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_blockscout_block() {
        let json = r#"{
            "miner": {"hash": "0x0000000000000000000000000000000000000000"},
            "rewards": [
                {"type": "Miner Reward", "reward": "18232550050143929"},
                {"type": "Uncle Reward", "reward": "1"}
            ],
            "timestamp": "2025-10-21T14:22:20.000000Z",
            "height": 12345678
        }"#;
        let block: BlockscoutBlock = serde_json::from_str(json).unwrap();
        assert_eq!(block.height, 12345678);
        assert_eq!(block.rewards[0].kind, "Miner Reward");
        assert_eq!(block.rewards[0].reward, "18232550050143929");
    }

    #[test]
    fn parses_etherscan_response() {
        let json = r#"{
            "status": "1",
            "message": "OK",
            "result": {
                "blockNumber": "12345678",
                "timeStamp": "1761056540",
                "blockMiner": "0x9dd134d14d1e65f84b706d6f205cd5b1cd03a46b",
                "blockReward": "18232550050143929",
                "uncles": [],
                "uncleInclusionReward": "0"
            }
        }"#;
        let response: EtherscanResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.result.block_number, "12345678");
        assert_eq!(response.result.time_stamp, "1761056540");
    }

    #[test]
    fn amounts_parse_as_arbitrary_precision() {
        let amount = decode_amount("test", "340282366920938463463374607431768211456").unwrap();
        assert_eq!(
            amount,
            BigDecimal::from_str("340282366920938463463374607431768211456").unwrap()
        );
    }
}
