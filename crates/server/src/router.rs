//! Listener routes: dialect ingress, CORS/preflight, health and metrics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tracing::{debug, warn};

use relay_core::config::CorsConfig;
use relay_core::errors::RelayError;
use relay_core::extensions::ExtensionInfo;
use relay_core::health::HealthReporter;
use relay_core::message::Metadata;
use relay_core::metrics::ProviderMetricsManager;
use relay_core::parser::{ChainParser, ParserError};
use relay_core::router::{relay_timeout, ChainRouter, RouterError};
use relay_core::spec::{
    HeaderKind, API_INTERFACE_JSONRPC, API_INTERFACE_REST, API_INTERFACE_TENDERMINT_RPC,
};

pub const DEFAULT_DAPP_ID: &str = "DefaultDappID";

/// One served chain: its parser, router and the last head the relay saw.
pub struct ChainHandle {
    pub parser: Arc<dyn ChainParser>,
    pub router: Arc<ChainRouter>,
    pub latest_block: AtomicU64,
}

impl ChainHandle {
    pub fn observe_latest_block(&self, block: u64) {
        self.latest_block.fetch_max(block, Ordering::Relaxed);
    }
}

pub struct AppState {
    pub chains: HashMap<String, Arc<ChainHandle>>,
    pub cors: CorsConfig,
    pub metrics_enabled: bool,
    pub prometheus: Option<PrometheusHandle>,
    pub provider_metrics: Arc<ProviderMetricsManager>,
    pub health: Arc<dyn HealthReporter>,
}

/// Builds the axum application.
pub fn build_router(state: Arc<AppState>, health_check_path: &str, metrics_path: &str) -> Router {
    let mut router = Router::new()
        .route(health_check_path, get(handle_health))
        .route("/relay/:chain_id", post(handle_relay_root))
        .route("/relay/:chain_id/*path", any(handle_relay_path));
    if state.metrics_enabled {
        router = router.route(metrics_path, get(handle_metrics));
    }
    router
        .layer(axum::middleware::from_fn_with_state(Arc::clone(&state), cors_middleware))
        .with_state(state)
}

/// Wildcard-by-default CORS: every response carries the allow-origin header,
/// preflights answer 204 with the configured methods/headers/credentials and
/// cache duration, and DELETE short-circuits to 204.
async fn cors_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    if method == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        let headers = response.headers_mut();
        insert_header(headers, "access-control-allow-origin", &state.cors.origin);
        insert_header(headers, "access-control-allow-methods", &state.cors.methods);
        insert_header(headers, "access-control-allow-headers", &state.cors.headers);
        insert_header(headers, "access-control-allow-credentials", &state.cors.credentials);
        insert_header(
            headers,
            "access-control-max-age",
            &state.cors.max_age_seconds.to_string(),
        );
        return response;
    }
    if method == Method::DELETE {
        return StatusCode::NO_CONTENT.into_response();
    }
    let mut response = next.run(request).await;
    insert_header(response.headers_mut(), "access-control-allow-origin", &state.cors.origin);
    response
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    if state.health.is_healthy() {
        (StatusCode::OK, "Health status OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Health status Failure").into_response()
    }
}

async fn handle_metrics(State(state): State<Arc<AppState>>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

async fn handle_relay_root(
    State(state): State<Arc<AppState>>,
    Path(chain_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    relay(state, &chain_id, String::new(), Method::POST, headers, body).await
}

async fn handle_relay_path(
    State(state): State<Arc<AppState>>,
    Path((chain_id, path)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let url = match query {
        Some(query) => format!("/{path}?{query}"),
        None => format!("/{path}"),
    };
    relay(state, &chain_id, url, method, headers, body).await
}

/// The consumer request path: parse, validate, resolve extensions, route.
async fn relay(
    state: Arc<AppState>,
    chain_id: &str,
    url: String,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(chain) = state.chains.get(chain_id) else {
        return error_response(
            StatusCode::NOT_FOUND,
            &format!("chain {chain_id} is not served here"),
        );
    };
    let origin = ConsumerOrigin::from_headers(&headers, state.metrics_enabled);
    debug!(
        chain_id,
        dapp_id = %origin.dapp_id,
        url = %url,
        "incoming relay"
    );

    let api_interface = chain.parser.api_interface();
    let connection_type = connection_type_for(api_interface, &method);
    let metadata: Vec<Metadata> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| Metadata { name: name.to_string(), value: value.to_string() })
        })
        .collect();
    let extension_info = ExtensionInfo {
        latest_block: chain.latest_block.load(Ordering::Relaxed),
        ..Default::default()
    };

    let message =
        match chain.parser.parse_msg(&url, &body, &connection_type, metadata, &extension_info) {
            Ok(message) => message,
            Err(error) => {
                state.provider_metrics.add_error(chain_id, api_interface);
                return relay_error_response(&error.into());
            }
        };
    if let Err(error) = chain.parser.base().validate(&message) {
        state.provider_metrics.add_error(chain_id, api_interface);
        return relay_error_response(&error.into());
    }

    let timeout = relay_timeout(&message, &chain.parser.base().chain_block_stats(), 0);
    let extensions = message.extension_names();
    match chain.router.send_node_msg(&message, &extensions, timeout).await {
        Ok(sent) => {
            state.provider_metrics.add_relay(chain_id, api_interface, message.api().compute_units);
            let handled = chain.parser.base().handle_headers(
                &sent.reply.metadata,
                message.api_collection(),
                HeaderKind::PassReply,
            );
            let mut response = (StatusCode::OK, sent.reply.data).into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            for entry in handled.filtered {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(entry.name.as_bytes()),
                    HeaderValue::from_str(&entry.value),
                ) {
                    response.headers_mut().insert(name, value);
                }
            }
            response
        }
        Err(error) => {
            state.provider_metrics.add_error(chain_id, api_interface);
            warn!(chain_id, %error, "relay dispatch failed");
            relay_error_response(&error.into())
        }
    }
}

/// Who sent the request, from the consumer-facing headers. Tracking fields
/// are captured only when metrics collection is on.
struct ConsumerOrigin {
    dapp_id: String,
    referer: Option<String>,
    user_agent: Option<String>,
    origin: Option<String>,
}

impl ConsumerOrigin {
    fn from_headers(headers: &HeaderMap, metrics_enabled: bool) -> Self {
        let get = |name: &str| {
            headers.get(name).and_then(|value| value.to_str().ok()).map(str::to_string)
        };
        let origin = Self {
            dapp_id: get("dapp-id").unwrap_or_else(|| DEFAULT_DAPP_ID.to_string()),
            referer: metrics_enabled.then(|| get("referer")).flatten(),
            user_agent: metrics_enabled.then(|| get("user-agent")).flatten(),
            origin: metrics_enabled.then(|| get("origin")).flatten(),
        };
        if metrics_enabled {
            debug!(
                dapp_id = %origin.dapp_id,
                referer = origin.referer.as_deref().unwrap_or(""),
                user_agent = origin.user_agent.as_deref().unwrap_or(""),
                origin = origin.origin.as_deref().unwrap_or(""),
                "consumer origin"
            );
        }
        origin
    }
}

fn connection_type_for(api_interface: &str, method: &Method) -> String {
    match api_interface {
        API_INTERFACE_JSONRPC => "POST".to_string(),
        API_INTERFACE_REST => method.as_str().to_string(),
        API_INTERFACE_TENDERMINT_RPC => String::new(),
        _ => String::new(),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(json!({ "error": message }))).into_response()
}

fn relay_error_response(error: &RelayError) -> Response {
    let status = match error {
        RelayError::Parser(ParserError::ApiNotSupported { .. })
        | RelayError::Parser(ParserError::ApiDisabled { .. })
        | RelayError::Parser(ParserError::AddonNotAllowed(_))
        | RelayError::Parser(ParserError::MalformedRequest(_))
        | RelayError::Parser(ParserError::BlockParsing(_)) => StatusCode::BAD_REQUEST,
        RelayError::Router(RouterError::NoSupportingEndpoint(_)) => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::Router(RouterError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        RelayError::Router(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, &error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue as TestHeaderValue;
    use relay_core::health::HealthReporter;
    use relay_core::parser::new_chain_parser_with_spec;
    use relay_core::router::{ChainRouterConfig, RouterEndpoint};
    use relay_core::testutil;
    use tower::util::ServiceExt;

    struct AlwaysHealthy(bool);

    impl HealthReporter for AlwaysHealthy {
        fn is_healthy(&self) -> bool {
            self.0
        }
    }

    fn test_state(healthy: bool) -> Arc<AppState> {
        let parser = new_chain_parser_with_spec(API_INTERFACE_JSONRPC, testutil::test_spec())
            .unwrap();
        parser.base().activate();
        let router = ChainRouter::new(ChainRouterConfig {
            chain_id: "TEST1".to_string(),
            endpoints: vec![RouterEndpoint {
                node_url: "http://127.0.0.1:1".to_string(),
                ws_url: None,
                extensions: vec![],
                connections: 1,
            }],
        })
        .unwrap();
        let mut chains = HashMap::new();
        chains.insert(
            "TEST1".to_string(),
            Arc::new(ChainHandle {
                parser: Arc::from(parser),
                router: Arc::new(router),
                latest_block: AtomicU64::new(0),
            }),
        );
        Arc::new(AppState {
            chains,
            cors: CorsConfig::default(),
            metrics_enabled: false,
            prometheus: None,
            provider_metrics: Arc::new(ProviderMetricsManager::new()),
            health: Arc::new(AlwaysHealthy(healthy)),
        })
    }

    fn app(healthy: bool) -> Router {
        build_router(test_state(healthy), "/health", "/metrics")
    }

    #[tokio::test]
    async fn preflight_gets_the_configured_cors_headers() {
        let response = app(true)
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/relay/TEST1")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
        assert_eq!(
            headers.get("access-control-allow-methods").unwrap(),
            &TestHeaderValue::from_static("GET,POST,PUT,DELETE,OPTIONS")
        );
        assert!(headers.contains_key("access-control-allow-headers"));
        assert!(headers.contains_key("access-control-allow-credentials"));
        assert_eq!(headers.get("access-control-max-age").unwrap(), "86400");
    }

    #[tokio::test]
    async fn delete_short_circuits() {
        let response = app(true)
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri("/relay/TEST1")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn health_endpoint_reports_both_states() {
        let response = app(true)
            .oneshot(Request::builder().uri("/health").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"Health status OK");

        let response = app(false)
            .oneshot(Request::builder().uri("/health").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"Health status Failure");
    }

    #[tokio::test]
    async fn unknown_chain_is_a_json_error() {
        let response = app(true)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/relay/GHOST")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(
                        r#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(value["error"].as_str().unwrap().contains("GHOST"));
    }

    #[tokio::test]
    async fn unsupported_api_is_a_bad_request() {
        let response = app(true)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/relay/TEST1")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(
                        r#"{"jsonrpc":"2.0","method":"eth_nope","params":[],"id":1}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn dapp_id_defaults() {
        let mut headers = HeaderMap::new();
        let origin = ConsumerOrigin::from_headers(&headers, true);
        assert_eq!(origin.dapp_id, DEFAULT_DAPP_ID);

        headers.insert("dapp-id", HeaderValue::from_static("my-dapp"));
        headers.insert("referer", HeaderValue::from_static("https://site.example"));
        let origin = ConsumerOrigin::from_headers(&headers, true);
        assert_eq!(origin.dapp_id, "my-dapp");
        assert_eq!(origin.referer.as_deref(), Some("https://site.example"));

        // Tracking headers are only captured when metrics are enabled.
        let origin = ConsumerOrigin::from_headers(&headers, false);
        assert_eq!(origin.referer, None);
    }

    #[test]
    fn connection_types_per_dialect() {
        assert_eq!(connection_type_for(API_INTERFACE_JSONRPC, &Method::POST), "POST");
        assert_eq!(connection_type_for(API_INTERFACE_REST, &Method::GET), "GET");
        assert_eq!(connection_type_for(API_INTERFACE_REST, &Method::POST), "POST");
        assert_eq!(connection_type_for(API_INTERFACE_TENDERMINT_RPC, &Method::GET), "");
    }
}
