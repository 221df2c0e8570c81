use beaconwatch_indexer::client::beacon::{BeaconClient, StateId};
use beaconwatch_indexer::client::execution::ExecutionClient;
use beaconwatch_indexer::client::reliable::NodeKind;
use beaconwatch_indexer::prometheus_metrics::Metrics;

fn consensus_metrics() -> beaconwatch_indexer::prometheus_metrics::ServiceSeries {
    Metrics::new("test").services.consensus.clone()
}

fn execution_metrics() -> beaconwatch_indexer::prometheus_metrics::ServiceSeries {
    Metrics::new("test").services.execution.clone()
}

const BLOCK_JSON: &str = r#"{
    "version": "electra",
    "data": {
        "message": {
            "slot": "24472848",
            "proposer_index": "549417",
            "body": {
                "attestations": [],
                "deposits": [],
                "voluntary_exits": [],
                "execution_payload": {"block_number": "12345678", "withdrawals": []}
            }
        }
    }
}"#;

#[tokio::test]
async fn block_fetch_prefers_full_node() {
    let mut archive = mockito::Server::new_async().await;
    let mut full = mockito::Server::new_async().await;

    let archive_mock = archive
        .mock("GET", "/eth/v2/beacon/blocks/24472848")
        .expect(0)
        .create_async()
        .await;
    let full_mock = full
        .mock("GET", "/eth/v2/beacon/blocks/24472848")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(BLOCK_JSON)
        .create_async()
        .await;

    let client =
        BeaconClient::new(&archive.url(), &full.url(), 2, 1, consensus_metrics()).unwrap();
    let block = client.get_block(24472848).await.unwrap().unwrap();
    assert_eq!(block.slot, 24472848);
    assert_eq!(block.proposer_index, 549417);
    assert_eq!(
        block.body.execution_payload.unwrap().block_number,
        12345678
    );

    archive_mock.assert_async().await;
    full_mock.assert_async().await;
}

#[tokio::test]
async fn missed_slot_short_circuits_without_retry() {
    let mut archive = mockito::Server::new_async().await;
    let mut full = mockito::Server::new_async().await;

    // A 404 means "slot missed": exactly one attempt, no fallback.
    let full_mock = full
        .mock("GET", "/eth/v2/beacon/blocks/100")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;
    let archive_mock = archive
        .mock("GET", "/eth/v2/beacon/blocks/100")
        .expect(0)
        .create_async()
        .await;

    let client =
        BeaconClient::new(&archive.url(), &full.url(), 2, 3, consensus_metrics()).unwrap();
    let block = client.get_block(100).await.unwrap();
    assert!(block.is_none());

    full_mock.assert_async().await;
    archive_mock.assert_async().await;
}

#[tokio::test]
async fn failing_preferred_node_falls_back_to_other() {
    let mut archive = mockito::Server::new_async().await;
    let mut full = mockito::Server::new_async().await;

    // Full node (preferred for blocks) stays broken through retries; the
    // archive node answers.
    let full_mock = full
        .mock("GET", "/eth/v2/beacon/blocks/24472848")
        .with_status(500)
        .expect(2)
        .create_async()
        .await;
    let archive_mock = archive
        .mock("GET", "/eth/v2/beacon/blocks/24472848")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(BLOCK_JSON)
        .create_async()
        .await;

    let client =
        BeaconClient::new(&archive.url(), &full.url(), 2, 1, consensus_metrics()).unwrap();
    let block = client.get_block(24472848).await.unwrap();
    assert!(block.is_some());

    full_mock.assert_async().await;
    archive_mock.assert_async().await;
}

#[tokio::test]
async fn balances_parse_decimal_strings() {
    let archive = mockito::Server::new_async().await;
    let mut full = mockito::Server::new_async().await;

    let full_mock = full
        .mock("POST", "/eth/v1/beacon/states/head/validator_balances")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"data": [
                {"index": "549417", "balance": "32011741974"},
                {"index": "549419", "balance": "18446744073709551615"}
            ]}"#,
        )
        .create_async()
        .await;

    let client =
        BeaconClient::new(&archive.url(), &full.url(), 2, 0, consensus_metrics()).unwrap();
    let balances = client
        .get_validators_balances(&StateId::Head, &[549417, 549419])
        .await
        .unwrap();
    assert_eq!(balances.len(), 2);
    assert_eq!(balances[1].balance, u64::MAX);

    full_mock.assert_async().await;
    let _ = archive;
}

#[tokio::test]
async fn gate_stats_expose_capacity() {
    let archive = mockito::Server::new_async().await;
    let full = mockito::Server::new_async().await;
    let client =
        BeaconClient::new(&archive.url(), &full.url(), 7, 0, consensus_metrics()).unwrap();

    let stats = client.gate_stats(NodeKind::Primary);
    assert_eq!(stats.capacity, 7);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn execution_reward_comes_from_blockscout_first() {
    let mut blockscout = mockito::Server::new_async().await;
    let mut etherscan = mockito::Server::new_async().await;

    let blockscout_mock = blockscout
        .mock("GET", "/api/v2/blocks/12345678")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "miner": {"hash": "0x9dd134d14d1e65f84b706d6f205cd5b1cd03a46b"},
                "rewards": [{"type": "Miner Reward", "reward": "18232550050143929"}],
                "timestamp": "2025-10-21T14:22:20.000000Z",
                "height": 12345678
            }"#,
        )
        .create_async()
        .await;

    let client = ExecutionClient::new(
        &blockscout.url(),
        &etherscan.url(),
        "key",
        100,
        2,
        10,
        execution_metrics(),
    )
    .unwrap();
    let reward = client.get_block(12345678).await.unwrap();
    assert_eq!(reward.block_number, 12345678);
    assert_eq!(reward.miner_address.len(), 20);
    assert_eq!(reward.amount.to_string(), "18232550050143929");

    blockscout_mock.assert_async().await;
    let _ = etherscan;
}

#[tokio::test]
async fn execution_reward_falls_back_to_etherscan() {
    let mut blockscout = mockito::Server::new_async().await;
    let mut etherscan = mockito::Server::new_async().await;

    let blockscout_mock = blockscout
        .mock("GET", "/api/v2/blocks/12345678")
        .with_status(503)
        .create_async()
        .await;
    let etherscan_mock = etherscan
        .mock(
            "GET",
            "/api?chainid=100&module=block&action=getblockreward&blockno=12345678&apikey=key",
        )
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "status": "1",
                "result": {
                    "blockNumber": "12345678",
                    "timeStamp": "1761056540",
                    "blockMiner": "0x9dd134d14d1e65f84b706d6f205cd5b1cd03a46b",
                    "blockReward": "18232550050143929"
                }
            }"#,
        )
        .create_async()
        .await;

    let client = ExecutionClient::new(
        &blockscout.url(),
        &etherscan.url(),
        "key",
        100,
        2,
        10,
        execution_metrics(),
    )
    .unwrap();
    let reward = client.get_block(12345678).await.unwrap();
    assert_eq!(reward.block_number, 12345678);
    assert_eq!(reward.timestamp.timestamp(), 1761056540);

    blockscout_mock.assert_async().await;
    etherscan_mock.assert_async().await;
}
