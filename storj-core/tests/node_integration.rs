//! Two-node cluster tests over localhost HTTP: a renter joined to a
//! single farmer seed, driving the full publish → offer → consign →
//! retrieve → audit lifecycle.

use std::sync::Arc;
use std::time::Duration;

use storj_core::keys::KeyPair;
use storj_core::metrics::NodeMetrics;
use storj_core::net::HttpTransport;
use storj_core::rpc::{MessageAuth, Method, PingParams, RpcRequest};
use storj_core::{Node, NodeConfig, NodeError, ShardHash};

fn test_config() -> NodeConfig {
    let mut config = NodeConfig::ephemeral();
    config.offer_timeout_ms = 5_000;
    config.request_timeout_ms = 3_000;
    config
}

async fn farmer_node() -> Node {
    let node = Node::new(test_config()).expect("farmer node builds");
    node.join().await.expect("farmer joins");
    node
}

async fn renter_node(seed: &Node) -> Node {
    let mut config = test_config();
    config.farm = false;
    config.seeds = vec![seed.contact().to_uri()];
    let node = Node::new(config).expect("renter node builds");
    node.join().await.expect("renter joins");
    node
}

#[tokio::test]
async fn test_store_and_retrieve_round_trip() {
    let farmer = farmer_node().await;
    let renter = renter_node(&farmer).await;

    let hash = renter
        .store(b"hello".to_vec(), Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(hash, ShardHash::of(b"hello"));

    let data = renter.retrieve(&hash).await.unwrap();
    assert_eq!(data, b"hello");

    renter.leave().await.unwrap();
    farmer.leave().await.unwrap();
}

#[tokio::test]
async fn test_store_records_item_on_both_sides() {
    let farmer = farmer_node().await;
    let renter = renter_node(&farmer).await;

    let payload = b"bookkeeping shard".to_vec();
    let hash = renter
        .store(payload, Duration::from_secs(3600))
        .await
        .unwrap();

    let renter_item = renter.storage_item(&hash).await.unwrap().unwrap();
    assert!(renter_item.contracts.contains_key(&farmer.node_id()));
    assert!(renter_item.trees.contains_key(&farmer.node_id()));
    let challenges = &renter_item.challenges[&farmer.node_id()];
    assert_eq!(challenges.challenges.len(), 12);

    let farmer_item = farmer.storage_item(&hash).await.unwrap().unwrap();
    assert!(farmer_item.contracts.contains_key(&renter.node_id()));
    let contract = &farmer_item.contracts[&renter.node_id()];
    assert_eq!(contract.farmer_id(), Some(farmer.node_id()));
    assert_eq!(contract.renter_id(), Some(renter.node_id()));

    renter.leave().await.unwrap();
    farmer.leave().await.unwrap();
}

#[tokio::test]
async fn test_audit_passes_while_farmer_holds_shard() {
    let farmer = farmer_node().await;
    let renter = renter_node(&farmer).await;

    let hash = renter
        .store(b"audited bytes".to_vec(), Duration::from_secs(3600))
        .await
        .unwrap();

    assert!(renter.audit(&hash).await.unwrap());
    // One challenge spent out of the pre-committed twelve.
    let item = renter.storage_item(&hash).await.unwrap().unwrap();
    assert_eq!(item.challenges[&farmer.node_id()].challenges.len(), 11);

    renter.leave().await.unwrap();
    farmer.leave().await.unwrap();
}

#[tokio::test]
async fn test_audit_fails_after_farmer_discards_shard() {
    let farmer = farmer_node().await;
    let renter = renter_node(&farmer).await;

    let hash = renter
        .store(b"doomed bytes".to_vec(), Duration::from_secs(3600))
        .await
        .unwrap();
    assert!(renter.audit(&hash).await.unwrap());

    farmer.delete_shard(&hash).await.unwrap();
    assert!(!renter.audit(&hash).await.unwrap());

    // Both audits consumed a challenge, pass or fail.
    let item = renter.storage_item(&hash).await.unwrap().unwrap();
    assert_eq!(item.challenges[&farmer.node_id()].challenges.len(), 10);

    renter.leave().await.unwrap();
    farmer.leave().await.unwrap();
}

#[tokio::test]
async fn test_retrieve_of_unknown_shard_is_a_storage_error() {
    let farmer = farmer_node().await;
    let renter = renter_node(&farmer).await;

    let err = renter
        .retrieve(&ShardHash::of(b"never stored anywhere"))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::Storage(_)));

    renter.leave().await.unwrap();
    farmer.leave().await.unwrap();
}

#[tokio::test]
async fn test_store_without_reachable_farmers_is_rejected() {
    let mut config = test_config();
    config.farm = false;
    let loner = Node::new(config).unwrap();
    loner.join().await.unwrap();

    let err = loner
        .store(b"nowhere to go".to_vec(), Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::ContractRejected(_)));

    loner.leave().await.unwrap();
}

#[tokio::test]
async fn test_forged_identity_is_dropped_without_reply() {
    let farmer = farmer_node().await;
    let renter = renter_node(&farmer).await;
    let failures_before = farmer.metrics().auth_failures;

    // An attacker signs with its own key while claiming the renter's
    // identity. The farmer must drop the message without answering.
    let attacker = Arc::new(KeyPair::generate());
    let forged_auth = MessageAuth::new(attacker, 15_000, Arc::new(NodeMetrics::new()));
    let mut request = RpcRequest::new(
        Method::Ping,
        &PingParams {
            contact: renter.contact(),
        },
    )
    .unwrap();
    forged_auth.sign_request(&mut request).unwrap();

    let transport = HttpTransport::new(Duration::from_secs(2));
    let err = transport.send(&farmer.contact(), &request).await.unwrap_err();
    assert!(matches!(err, NodeError::Transport(_)));
    assert!(farmer.metrics().auth_failures > failures_before);

    renter.leave().await.unwrap();
    farmer.leave().await.unwrap();
}

#[tokio::test]
async fn test_second_node_instance_same_port_conflicts() {
    let farmer = farmer_node().await;
    let mut config = test_config();
    config.bind = farmer.contact().endpoint().parse().unwrap();
    let clone = Node::new(config).unwrap();
    let err = clone.join().await.unwrap_err();
    assert!(matches!(err, NodeError::Transport(_)));
    farmer.leave().await.unwrap();
}
