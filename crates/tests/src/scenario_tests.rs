//! Consumer-path scenarios: parse → policy → extensions → route.

use std::sync::Arc;
use std::time::Duration;

use relay_core::block::{compare_requested_block_in_batch, EARLIEST_BLOCK, LATEST_BLOCK};
use relay_core::extensions::{ExtensionInfo, ExtensionsChainMessage};
use relay_core::fetcher::ChainFetcher;
use relay_core::parser::{new_chain_parser_with_spec, EndpointService};
use relay_core::router::{
    relay_timeout, time_per_cu, ChainRouter, ChainRouterConfig, RouterEndpoint,
    AVERAGE_WORLD_LATENCY,
};
use relay_core::spec::{HeaderKind, API_INTERFACE_JSONRPC, API_INTERFACE_REST};
use relay_core::testutil;

fn single_endpoint_router(node_url: String) -> Arc<ChainRouter> {
    Arc::new(
        ChainRouter::new(ChainRouterConfig {
            chain_id: "TEST1".to_string(),
            endpoints: vec![RouterEndpoint {
                node_url,
                ws_url: None,
                extensions: vec![],
                connections: 2,
            }],
        })
        .unwrap(),
    )
}

#[tokio::test]
async fn block_number_relay_round_trip() {
    // Scenario: eth_blockNumber parses with no extensions, a CU-derived
    // timeout, and routes to the only connection.
    let node_url = crate::mock_node::spawn_json_rpc_node("0x10").await;
    let parser =
        new_chain_parser_with_spec(API_INTERFACE_JSONRPC, testutil::test_spec()).unwrap();
    parser.base().activate();
    let router = single_endpoint_router(node_url);

    let body = br#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":7}"#;
    let message =
        parser.parse_msg("", body, "POST", vec![], &ExtensionInfo::default()).unwrap();
    assert!(message.extensions().is_empty());
    parser.base().validate(&message).unwrap();

    let timeout = relay_timeout(&message, &parser.base().chain_block_stats(), 0);
    assert_eq!(timeout, time_per_cu(10) + AVERAGE_WORLD_LATENCY);

    let sent = router.send_node_msg(&message, &[], Duration::from_secs(5)).await.unwrap();
    let reply: serde_json::Value = serde_json::from_slice(&sent.reply.data).unwrap();
    assert_eq!(reply["result"], "0x10");
    assert_eq!(reply["id"], 7);
    assert_eq!(sent.chain_id, "TEST1");
}

#[tokio::test]
async fn chain_fetcher_reads_the_head_through_the_router() {
    let node_url = crate::mock_node::spawn_json_rpc_node("0x12d687").await;
    let parser =
        new_chain_parser_with_spec(API_INTERFACE_JSONRPC, testutil::test_spec()).unwrap();
    let router = single_endpoint_router(node_url);
    let fetcher = ChainFetcher::new(Arc::from(parser), router, None);
    let latest = fetcher.fetch_latest_block_num().await.unwrap();
    assert_eq!(latest, 0x12d687);
}

#[test]
fn batch_requested_block_combination() {
    // Scenario: [eth_getBlockByNumber(0x10), eth_getBlockByNumber("latest")]
    // combines to (LATEST, 16).
    let parser =
        new_chain_parser_with_spec(API_INTERFACE_JSONRPC, testutil::test_spec()).unwrap();
    let body = br#"[
        {"jsonrpc":"2.0","method":"eth_getBlockByNumber","params":["0x10", false],"id":1},
        {"jsonrpc":"2.0","method":"eth_getBlockByNumber","params":["latest", false],"id":2}
    ]"#;
    let message = parser.parse_msg("", body, "POST", vec![], &ExtensionInfo::default()).unwrap();
    assert_eq!(message.requested_block(), (LATEST_BLOCK, 16));
}

#[test]
fn batch_comparator_reduces_any_order_to_the_same_pair() {
    let blocks = [40, LATEST_BLOCK, 7, EARLIEST_BLOCK, 1000];
    let mut permutations: Vec<Vec<i64>> = vec![blocks.to_vec()];
    let mut reversed = blocks.to_vec();
    reversed.reverse();
    permutations.push(reversed);
    permutations.push(vec![7, 1000, EARLIEST_BLOCK, LATEST_BLOCK, 40]);

    for order in permutations {
        let mut latest = order[0];
        let mut earliest = order[0];
        for &block in &order[1..] {
            let (l, _) = compare_requested_block_in_batch(latest, block);
            let (_, e) = compare_requested_block_in_batch(earliest, block);
            latest = l;
            earliest = e;
        }
        assert_eq!((latest, earliest), (LATEST_BLOCK, EARLIEST_BLOCK));
    }
}

#[test]
fn rest_params_and_header_overwrite() {
    // Scenario: GET /cosmos/bank/v1beta1/balances/lava1abc?pagination.limit=10
    // yields the address and pagination params; an X-Cosmos-Block-Height
    // header overwrites the requested block and is forwarded.
    let parser = new_chain_parser_with_spec(API_INTERFACE_REST, testutil::test_spec()).unwrap();
    let message = parser
        .parse_msg(
            "/cosmos/bank/v1beta1/balances/lava1abc?pagination.limit=10",
            b"",
            "GET",
            vec![],
            &ExtensionInfo::default(),
        )
        .unwrap();
    let params = message.payload().params().unwrap();
    assert_eq!(params["address"], "lava1abc");
    assert_eq!(params["pagination.limit"], "10");

    let metadata = vec![relay_core::message::Metadata {
        name: "X-Cosmos-Block-Height".to_string(),
        value: "42".to_string(),
    }];
    let collection = message.api_collection();
    let handled = parser.base().handle_headers(&metadata, collection, HeaderKind::PassSend);
    assert_eq!(handled.overwrite_requested_block.as_deref(), Some("42"));
    assert_eq!(handled.filtered.len(), 1);
}

#[test]
fn verification_retrieval_with_an_unknown_service() {
    // Scenario: GetVerifications(["archive","debug","unknownX"]) returns the
    // verifications under the known keys and flags the unknown entry.
    let parser =
        new_chain_parser_with_spec(API_INTERFACE_JSONRPC, testutil::test_spec()).unwrap();
    let supported =
        vec!["archive".to_string(), "debug".to_string(), "unknownX".to_string()];
    let separated = parser.base().separate_addons_extensions(&supported);
    assert_eq!(separated.invalid, vec!["unknownX"]);

    let verifications = parser.base().get_verifications(&supported);
    assert!(verifications
        .iter()
        .any(|v| v.verification_key.extension.is_empty() && v.verification_key.addon.is_empty()));
    assert!(verifications
        .iter()
        .any(|v| v.verification_key.extension == "archive" && v.verification_key.addon == "debug"));
}

#[test]
fn policy_gates_addon_messages() {
    let parser =
        new_chain_parser_with_spec(API_INTERFACE_JSONRPC, testutil::test_spec()).unwrap();
    let message = testutil::jsonrpc_message(parser.base(), "eth_debugCall", "POST");
    assert!(parser.base().validate(&message).is_err());

    let policy = testutil::StaticPolicy {
        addons: vec!["debug".to_string()],
        extensions: vec![EndpointService {
            extension: "archive".to_string(),
            api_interface: API_INTERFACE_JSONRPC.to_string(),
        }],
    };
    parser.base().set_policy(&policy, "TEST1", API_INTERFACE_JSONRPC).unwrap();
    parser.base().validate(&message).unwrap();
}

#[tokio::test]
async fn archive_requests_need_an_archive_endpoint() {
    let parser =
        new_chain_parser_with_spec(API_INTERFACE_JSONRPC, testutil::test_spec()).unwrap();
    testutil::allow_archive(parser.base());

    let body =
        br#"{"jsonrpc":"2.0","method":"eth_getBlockByNumber","params":["0x1", false],"id":1}"#;
    let info = ExtensionInfo { latest_block: 1_000_000, ..Default::default() };
    let message = parser.parse_msg("", body, "POST", vec![], &info).unwrap();
    assert_eq!(message.extension_names(), vec!["archive".to_string()]);

    let plain_router = single_endpoint_router("http://127.0.0.1:1".to_string());
    assert!(!plain_router.extensions_supported(&message.extension_names()));
    let outcome = plain_router
        .send_node_msg(&message, &message.extension_names(), Duration::from_millis(100))
        .await;
    assert!(matches!(
        outcome,
        Err(relay_core::router::RouterError::NoSupportingEndpoint(_))
    ));
}
