//! A minimal JSON-RPC node used as a relay target in tests.

use std::net::SocketAddr;

use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

/// Serves a single-method JSON-RPC node on an ephemeral port and returns its
/// base URL. The server lives as long as the test runtime.
pub async fn spawn_json_rpc_node(latest_block_hex: &'static str) -> String {
    let app = Router::new().route(
        "/",
        post(move |Json(request): Json<Value>| async move {
            let id = request.get("id").cloned().unwrap_or(Value::Null);
            let method = request["method"].as_str().unwrap_or_default().to_string();
            let result = match method.as_str() {
                "eth_blockNumber" => json!(latest_block_hex),
                "eth_getBlockByNumber" => json!({"number": request["params"][0]}),
                other => json!({ "unhandled": other }),
            };
            Json(json!({"jsonrpc": "2.0", "result": result, "id": id}))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("ephemeral port");
    let address: SocketAddr = listener.local_addr().expect("bound address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{address}")
}
