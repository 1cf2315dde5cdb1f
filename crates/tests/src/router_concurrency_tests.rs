//! Router behavior under concurrent dispatch.

use std::sync::Arc;
use std::time::Duration;

use relay_core::extensions::ExtensionInfo;
use relay_core::parser::new_chain_parser_with_spec;
use relay_core::router::{ChainRouter, ChainRouterConfig, RouterEndpoint};
use relay_core::spec::API_INTERFACE_JSONRPC;
use relay_core::testutil;

fn router_with(endpoints: Vec<RouterEndpoint>) -> Arc<ChainRouter> {
    Arc::new(
        ChainRouter::new(ChainRouterConfig { chain_id: "TEST1".to_string(), endpoints })
            .unwrap(),
    )
}

fn endpoint(url: &str, connections: usize) -> RouterEndpoint {
    RouterEndpoint {
        node_url: url.to_string(),
        ws_url: None,
        extensions: vec![],
        connections,
    }
}

#[tokio::test]
async fn concurrent_dispatch_completes_for_every_caller() {
    // Pools bound concurrency: with 2 endpoints x 2 connections and 16
    // concurrent callers against a live node, every call must finish and
    // carry a valid reply (pool slots are exclusive, so replies cannot
    // interleave).
    let node_url = crate::mock_node::spawn_json_rpc_node("0xff").await;
    let router = router_with(vec![endpoint(&node_url, 2), endpoint(&node_url, 2)]);
    let parser = Arc::from(
        new_chain_parser_with_spec(API_INTERFACE_JSONRPC, testutil::test_spec()).unwrap(),
    );

    let mut tasks = tokio::task::JoinSet::new();
    for id in 0..16u32 {
        let router = Arc::clone(&router);
        let parser: Arc<dyn relay_core::parser::ChainParser> = Arc::clone(&parser);
        tasks.spawn(async move {
            let body = format!(
                r#"{{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":{id}}}"#
            );
            let message = parser
                .parse_msg("", body.as_bytes(), "POST", vec![], &ExtensionInfo::default())
                .unwrap();
            let sent =
                router.send_node_msg(&message, &[], Duration::from_secs(5)).await.unwrap();
            let reply: serde_json::Value = serde_json::from_slice(&sent.reply.data).unwrap();
            (id, reply)
        });
    }
    let mut completed = 0;
    while let Some(result) = tasks.join_next().await {
        let (id, reply) = result.unwrap();
        assert_eq!(reply["result"], "0xff");
        // Each caller gets the reply for its own request id.
        assert_eq!(reply["id"], id);
        completed += 1;
    }
    assert_eq!(completed, 16);
}

#[tokio::test]
async fn unreachable_endpoints_fail_without_wedging_the_pool() {
    let router = router_with(vec![endpoint("http://127.0.0.1:1", 1)]);
    let parser =
        new_chain_parser_with_spec(API_INTERFACE_JSONRPC, testutil::test_spec()).unwrap();
    let body = br#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}"#;
    let message =
        parser.parse_msg("", body, "POST", vec![], &ExtensionInfo::default()).unwrap();

    // Sequential failures must each release the single pooled connection.
    for _ in 0..3 {
        let outcome = router.send_node_msg(&message, &[], Duration::from_secs(2)).await;
        assert!(outcome.is_err());
    }
}

#[tokio::test]
async fn timeouts_release_the_connection() {
    // 127.0.0.1:1 refuses fast; an extremely short timeout may fire first.
    // Either way the pooled connection must come back for the next caller.
    let router = router_with(vec![endpoint("http://127.0.0.1:1", 1)]);
    let parser =
        new_chain_parser_with_spec(API_INTERFACE_JSONRPC, testutil::test_spec()).unwrap();
    let body = br#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}"#;
    let message =
        parser.parse_msg("", body, "POST", vec![], &ExtensionInfo::default()).unwrap();

    let first = router.send_node_msg(&message, &[], Duration::from_millis(1)).await;
    assert!(first.is_err());
    let second = tokio::time::timeout(
        Duration::from_secs(5),
        router.send_node_msg(&message, &[], Duration::from_secs(1)),
    )
    .await
    .expect("pool must not deadlock after a timed-out call");
    assert!(second.is_err());
}
