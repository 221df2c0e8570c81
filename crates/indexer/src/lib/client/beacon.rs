use std::time::Duration;

use reqwest::{Client, ClientBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use beaconwatch_shared::serde_utils::{
    hex_bytes, quoted_i64, quoted_i64_opt, quoted_u64, quoted_u64_nested_vec, quoted_u64_vec,
};
use beaconwatch_shared::validator_status::ValidatorStatus;

use super::reliable::{EndpointConfig, Error, GateStats, NodeKind, ReliableClient};
use super::InitializationError;
use crate::prometheus_metrics::{calls, ServiceSeries};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateId {
    Head,
    Slot(u64),
}

impl StateId {
    fn as_str(&self) -> String {
        match self {
            Self::Head => "head".to_owned(),
            Self::Slot(slot) => slot.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitteeData {
    #[serde(with = "quoted_u64")]
    pub slot: u64,
    #[serde(with = "quoted_u64")]
    pub index: u64,
    #[serde(with = "quoted_u64_vec")]
    pub validators: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct CommitteesResponse {
    data: Vec<CommitteeData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncCommitteeData {
    #[serde(with = "quoted_u64_vec")]
    pub validators: Vec<u64>,
    #[serde(with = "quoted_u64_nested_vec")]
    pub validator_aggregates: Vec<Vec<u64>>,
}

#[derive(Debug, Deserialize)]
struct SyncCommitteesResponse {
    data: SyncCommitteeData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BeaconBlock {
    #[serde(with = "quoted_u64")]
    pub slot: u64,
    #[serde(with = "quoted_u64")]
    pub proposer_index: u64,
    pub body: BeaconBlockBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BeaconBlockBody {
    #[serde(default)]
    pub attestations: Vec<Attestation>,
    #[serde(default)]
    pub deposits: Vec<Deposit>,
    #[serde(default)]
    pub voluntary_exits: Vec<SignedVoluntaryExit>,
    pub execution_payload: Option<ExecutionPayload>,
    pub execution_requests: Option<ExecutionRequests>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attestation {
    #[serde(with = "hex_bytes")]
    pub aggregation_bits: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub committee_bits: Vec<u8>,
    pub data: AttestationData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttestationData {
    #[serde(with = "quoted_u64")]
    pub slot: u64,
    #[serde(with = "quoted_u64")]
    pub index: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionPayload {
    #[serde(with = "quoted_u64")]
    pub block_number: u64,
    #[serde(default)]
    pub withdrawals: Vec<Withdrawal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Withdrawal {
    #[serde(with = "quoted_u64")]
    pub index: u64,
    #[serde(with = "quoted_u64")]
    pub validator_index: u64,
    #[serde(with = "hex_bytes")]
    pub address: Vec<u8>,
    #[serde(with = "quoted_u64")]
    pub amount: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Deposit {
    pub data: DepositData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepositData {
    #[serde(with = "hex_bytes")]
    pub pubkey: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub withdrawal_credentials: Vec<u8>,
    #[serde(with = "quoted_u64")]
    pub amount: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignedVoluntaryExit {
    pub message: VoluntaryExit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoluntaryExit {
    #[serde(with = "quoted_u64")]
    pub epoch: u64,
    #[serde(with = "quoted_u64")]
    pub validator_index: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionRequests {
    #[serde(default)]
    pub deposits: Vec<DepositRequest>,
    #[serde(default)]
    pub withdrawals: Vec<WithdrawalRequest>,
    #[serde(default)]
    pub consolidations: Vec<ConsolidationRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepositRequest {
    #[serde(with = "hex_bytes")]
    pub pubkey: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub withdrawal_credentials: Vec<u8>,
    #[serde(with = "quoted_u64")]
    pub amount: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawalRequest {
    #[serde(with = "hex_bytes")]
    pub source_address: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub validator_pubkey: Vec<u8>,
    #[serde(with = "quoted_u64")]
    pub amount: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsolidationRequest {
    #[serde(with = "hex_bytes")]
    pub source_address: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub source_pubkey: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub target_pubkey: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct SignedBeaconBlock {
    message: BeaconBlock,
}

#[derive(Debug, Deserialize)]
struct BlockResponse {
    data: SignedBeaconBlock,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdealAttestationReward {
    #[serde(with = "quoted_u64")]
    pub effective_balance: u64,
    #[serde(with = "quoted_i64")]
    pub head: i64,
    #[serde(with = "quoted_i64")]
    pub target: i64,
    #[serde(with = "quoted_i64")]
    pub source: i64,
    #[serde(default, with = "quoted_i64_opt")]
    pub inclusion_delay: Option<i64>,
    #[serde(with = "quoted_i64")]
    pub inactivity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorAttestationReward {
    #[serde(with = "quoted_u64")]
    pub validator_index: u64,
    #[serde(with = "quoted_i64")]
    pub head: i64,
    #[serde(with = "quoted_i64")]
    pub target: i64,
    #[serde(with = "quoted_i64")]
    pub source: i64,
    #[serde(default, with = "quoted_i64_opt")]
    pub inclusion_delay: Option<i64>,
    #[serde(with = "quoted_i64")]
    pub inactivity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttestationRewardsData {
    pub ideal_rewards: Vec<IdealAttestationReward>,
    pub total_rewards: Vec<ValidatorAttestationReward>,
}

#[derive(Debug, Deserialize)]
struct AttestationRewardsResponse {
    data: AttestationRewardsData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockRewardsData {
    #[serde(with = "quoted_u64")]
    pub proposer_index: u64,
    #[serde(with = "quoted_i64")]
    pub total: i64,
    #[serde(with = "quoted_i64")]
    pub attestations: i64,
    #[serde(with = "quoted_i64")]
    pub sync_aggregate: i64,
    #[serde(with = "quoted_i64")]
    pub proposer_slashings: i64,
    #[serde(with = "quoted_i64")]
    pub attester_slashings: i64,
}

#[derive(Debug, Deserialize)]
struct BlockRewardsResponse {
    data: BlockRewardsData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncCommitteeRewardData {
    #[serde(with = "quoted_u64")]
    pub validator_index: u64,
    #[serde(with = "quoted_i64")]
    pub reward: i64,
}

#[derive(Debug, Deserialize)]
struct SyncCommitteeRewardsResponse {
    data: Vec<SyncCommitteeRewardData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorData {
    #[serde(with = "quoted_u64")]
    pub index: u64,
    #[serde(with = "quoted_u64")]
    pub balance: u64,
    pub status: String,
    pub validator: ValidatorDetails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorDetails {
    #[serde(with = "hex_bytes")]
    pub pubkey: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub withdrawal_credentials: Vec<u8>,
    #[serde(with = "quoted_u64")]
    pub effective_balance: u64,
}

#[derive(Debug, Deserialize)]
struct ValidatorsResponse {
    data: Vec<ValidatorData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorBalanceData {
    #[serde(with = "quoted_u64")]
    pub index: u64,
    #[serde(with = "quoted_u64")]
    pub balance: u64,
}

#[derive(Debug, Deserialize)]
struct ValidatorBalancesResponse {
    data: Vec<ValidatorBalanceData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProposerDutyData {
    #[serde(with = "quoted_u64")]
    pub validator_index: u64,
    #[serde(with = "quoted_u64")]
    pub slot: u64,
}

#[derive(Debug, Deserialize)]
struct ProposerDutiesResponse {
    data: Vec<ProposerDutyData>,
}

#[derive(Debug, Serialize)]
struct ValidatorsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    statuses: Option<Vec<String>>,
}

fn quote_ids(ids: &[u64]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

/// Typed consensus-layer facade. Primary = archive node (historical states),
/// secondary = full node (cheap head-distance reads).
pub struct BeaconClient {
    http: Client,
    reliable: ReliableClient,
}

impl BeaconClient {
    pub fn new(
        archive_url: &str,
        full_url: &str,
        concurrency: usize,
        retries: u32,
        metrics: ServiceSeries,
    ) -> Result<Self, InitializationError> {
        let http = ClientBuilder::new().timeout(REQUEST_TIMEOUT).build()?;
        let reliable = ReliableClient::new(
            EndpointConfig {
                base_url: archive_url.to_owned(),
                concurrency,
                retries,
            },
            EndpointConfig {
                base_url: full_url.to_owned(),
                concurrency,
                retries,
            },
            DEFAULT_BASE_DELAY,
            metrics,
        );
        Ok(Self { http, reliable })
    }

    pub fn gate_stats(&self, kind: NodeKind) -> GateStats {
        self.reliable.gate_stats(kind)
    }

    async fn fetch_json<T: DeserializeOwned>(
        http: Client,
        url: String,
        body: Option<serde_json::Value>,
    ) -> Result<T, Error> {
        let request = match &body {
            Some(json) => http.post(&url).json(json),
            None => http.get(&url),
        };
        let response = request.send().await.map_err(|source| Error::Http {
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

    async fn get<T: DeserializeOwned>(
        &self,
        prefer: NodeKind,
        label: &'static str,
        path: String,
    ) -> Result<T, Error> {
        self.reliable
            .request(prefer, label, |base| {
                let url = format!("{base}{path}");
                Self::fetch_json(self.http.clone(), url, None)
            })
            .await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        prefer: NodeKind,
        label: &'static str,
        path: String,
        body: serde_json::Value,
    ) -> Result<T, Error> {
        self.reliable
            .request(prefer, label, |base| {
                let url = format!("{base}{path}");
                Self::fetch_json(self.http.clone(), url, Some(body.clone()))
            })
            .await
    }

    pub async fn get_committees(
        &self,
        state: &StateId,
        epoch: u64,
    ) -> Result<Vec<CommitteeData>, Error> {
        let path = format!(
            "/eth/v1/beacon/states/{}/committees?epoch={epoch}",
            state.as_str()
        );
        let response: CommitteesResponse = self
            .get(NodeKind::Primary, calls::GET_COMMITTEES, path)
            .await?;
        Ok(response.data)
    }

    pub async fn get_sync_committees(
        &self,
        state: &StateId,
        epoch: u64,
    ) -> Result<SyncCommitteeData, Error> {
        let path = format!(
            "/eth/v1/beacon/states/{}/sync_committees?epoch={epoch}",
            state.as_str()
        );
        let response: SyncCommitteesResponse = self
            .get(NodeKind::Primary, calls::GET_SYNC_COMMITTEES, path)
            .await?;
        Ok(response.data)
    }

    /// `Ok(None)` means the slot was missed: the chain has no block there.
    pub async fn get_block(&self, slot: u64) -> Result<Option<BeaconBlock>, Error> {
        let path = format!("/eth/v2/beacon/blocks/{slot}");
        self.reliable
            .request_with_handler(
                NodeKind::Secondary,
                calls::GET_BLOCK,
                |base| {
                    let url = format!("{base}{path}");
                    let http = self.http.clone();
                    async move {
                        let response: BlockResponse = Self::fetch_json(http, url, None).await?;
                        Ok(Some(response.data.message))
                    }
                },
                |error| error.is_not_found().then_some(None),
            )
            .await
    }

    pub async fn get_attestation_rewards(
        &self,
        epoch: u64,
        validator_ids: &[u64],
    ) -> Result<AttestationRewardsData, Error> {
        let path = format!("/eth/v1/beacon/rewards/attestations/{epoch}");
        let body = serde_json::to_value(quote_ids(validator_ids)).map_err(|e| Error::Decode {
            url: path.clone(),
            message: e.to_string(),
        })?;
        let response: AttestationRewardsResponse = self
            .post(NodeKind::Primary, calls::GET_ATTESTATION_REWARDS, path, body)
            .await?;
        Ok(response.data)
    }

    pub async fn get_block_rewards(&self, slot: u64) -> Result<Option<BlockRewardsData>, Error> {
        let path = format!("/eth/v1/beacon/rewards/blocks/{slot}");
        self.reliable
            .request_with_handler(
                NodeKind::Secondary,
                calls::GET_BLOCK_REWARDS,
                |base| {
                    let url = format!("{base}{path}");
                    let http = self.http.clone();
                    async move {
                        let response: BlockRewardsResponse = Self::fetch_json(http, url, None).await?;
                        Ok(Some(response.data))
                    }
                },
                |error| error.is_not_found().then_some(None),
            )
            .await
    }

    pub async fn get_sync_committee_rewards(
        &self,
        slot: u64,
        validator_ids: &[u64],
    ) -> Result<Option<Vec<SyncCommitteeRewardData>>, Error> {
        let path = format!("/eth/v1/beacon/rewards/sync_committee/{slot}");
        let body = serde_json::to_value(quote_ids(validator_ids)).map_err(|e| Error::Decode {
            url: path.clone(),
            message: e.to_string(),
        })?;
        self.reliable
            .request_with_handler(
                NodeKind::Secondary,
                calls::GET_SYNC_COMMITTEE_REWARDS,
                |base| {
                    let url = format!("{base}{path}");
                    let http = self.http.clone();
                    let body = body.clone();
                    async move {
                        let response: SyncCommitteeRewardsResponse =
                            Self::fetch_json(http, url, Some(body)).await?;
                        Ok(Some(response.data))
                    }
                },
                |error| error.is_not_found().then_some(None),
            )
            .await
    }

    pub async fn get_validators(
        &self,
        state: &StateId,
        ids: Option<&[u64]>,
        statuses: Option<&[ValidatorStatus]>,
    ) -> Result<Vec<ValidatorData>, Error> {
        let path = format!("/eth/v1/beacon/states/{}/validators", state.as_str());
        let request = ValidatorsRequest {
            ids: ids.map(quote_ids),
            statuses: statuses.map(|list| {
                list.iter()
                    .map(|status| status.as_str().to_owned())
                    .collect()
            }),
        };
        let body = serde_json::to_value(request).map_err(|e| Error::Decode {
            url: path.clone(),
            message: e.to_string(),
        })?;
        let response: ValidatorsResponse = self
            .post(NodeKind::Secondary, calls::GET_VALIDATORS, path, body)
            .await?;
        Ok(response.data)
    }

    pub async fn get_validators_balances(
        &self,
        state: &StateId,
        ids: &[u64],
    ) -> Result<Vec<ValidatorBalanceData>, Error> {
        let path = format!("/eth/v1/beacon/states/{}/validator_balances", state.as_str());
        let body = serde_json::to_value(quote_ids(ids)).map_err(|e| Error::Decode {
            url: path.clone(),
            message: e.to_string(),
        })?;
        let response: ValidatorBalancesResponse = self
            .post(NodeKind::Secondary, calls::GET_VALIDATORS_BALANCES, path, body)
            .await?;
        Ok(response.data)
    }

    pub async fn get_proposer_duties(&self, epoch: u64) -> Result<Vec<ProposerDutyData>, Error> {
        let path = format!("/eth/v1/validator/duties/proposer/{epoch}");
        let response: ProposerDutiesResponse = self
            .get(NodeKind::Secondary, calls::GET_PROPOSER_DUTIES, path)
            .await?;
        Ok(response.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_block_with_electra_body() {
        let json = r#"{
            "version": "electra",
            "data": {
                "message": {
                    "slot": "24472848",
                    "proposer_index": "549417",
                    "body": {
                        "attestations": [{
                            "aggregation_bits": "0x03",
                            "committee_bits": "0x0100000000000000",
                            "data": {"slot": "24472847", "index": "0"}
                        }],
                        "deposits": [],
                        "voluntary_exits": [{
                            "message": {"epoch": "1529553", "validator_index": "42"}
                        }],
                        "execution_payload": {
                            "block_number": "12345678",
                            "withdrawals": [{
                                "index": "99",
                                "validator_index": "549419",
                                "address": "0x00000000219ab540356cbb839cbe05303d7705fa",
                                "amount": "1000000"
                            }]
                        },
                        "execution_requests": {
                            "deposits": [],
                            "withdrawals": [{
                                "source_address": "0x00000000219ab540356cbb839cbe05303d7705fa",
                                "validator_pubkey": "0xaa",
                                "amount": "32000000000"
                            }],
                            "consolidations": []
                        }
                    }
                }
            }
        }"#;
        let parsed: BlockResponse = serde_json::from_str(json).unwrap();
        let block = parsed.data.message;
        assert_eq!(block.slot, 24472848);
        assert_eq!(block.proposer_index, 549417);
        assert_eq!(block.body.attestations.len(), 1);
        assert_eq!(block.body.attestations[0].data.slot, 24472847);
        assert_eq!(block.body.voluntary_exits[0].message.validator_index, 42);
        let payload = block.body.execution_payload.unwrap();
        assert_eq!(payload.block_number, 12345678);
        assert_eq!(payload.withdrawals[0].amount, 1_000_000);
        let requests = block.body.execution_requests.unwrap();
        assert_eq!(requests.withdrawals[0].amount, 32_000_000_000);
    }

    #[test]
    fn parses_attestation_rewards() {
        let json = r#"{
            "data": {
                "ideal_rewards": [
                    {"effective_balance": "32000000000", "head": "87524", "target": "163524", "source": "87929", "inactivity": "0"}
                ],
                "total_rewards": [
                    {"validator_index": "549417", "head": "87524", "target": "163524", "source": "87929", "inactivity": "0"},
                    {"validator_index": "549419", "head": "0", "target": "-70458", "source": "0", "inactivity": "0"}
                ]
            }
        }"#;
        let parsed: AttestationRewardsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.data.ideal_rewards[0].effective_balance, 32_000_000_000);
        assert_eq!(parsed.data.total_rewards[1].target, -70458);
        assert_eq!(parsed.data.total_rewards[0].inclusion_delay, None);
    }

    #[test]
    fn parses_validators_and_duties() {
        let validators = r#"{
            "data": [{
                "index": "549417",
                "balance": "32011741974",
                "status": "active_ongoing",
                "validator": {
                    "pubkey": "0xb89b",
                    "withdrawal_credentials": "0x0100000000000000000000000f2a0a6a9b06d1dcdd9d0c7f6bd0a063d6b1b463",
                    "effective_balance": "32000000000"
                }
            }]
        }"#;
        let parsed: ValidatorsResponse = serde_json::from_str(validators).unwrap();
        assert_eq!(parsed.data[0].index, 549417);
        assert_eq!(parsed.data[0].validator.effective_balance, 32_000_000_000);
        assert_eq!(
            parsed.data[0].status.parse::<ValidatorStatus>().unwrap(),
            ValidatorStatus::ActiveOngoing
        );

        let duties = r#"{"data": [{"pubkey": "0xb89b", "validator_index": "549418", "slot": "24553824"}]}"#;
        let parsed: ProposerDutiesResponse = serde_json::from_str(duties).unwrap();
        assert_eq!(parsed.data[0].slot, 24553824);
        assert_eq!(parsed.data[0].validator_index, 549418);
    }

    #[test]
    fn validators_request_skips_absent_filters() {
        let request = ValidatorsRequest {
            ids: Some(vec!["1".to_owned()]),
            statuses: None,
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"ids":["1"]}"#
        );
    }
}
