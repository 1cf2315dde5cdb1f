//! The normalized in-flight request.
//!
//! Every dialect parser reduces an incoming request to a [`ChainMessage`]:
//! the matched api and collection, the dialect payload, the requested block
//! pair, the activated extension set, the handled headers and an optional
//! timeout override. Downstream code (policy validation, routing, relaying)
//! only ever sees this shape.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::block::{self, RequestedBlock, LATEST_BLOCK};
use crate::extensions::{ExtensionParser, ExtensionsChainMessage};
use crate::spec::{Api, ApiCollection, Extension};

pub const JSONRPC_VERSION: &str = "2.0";
pub const JSONRPC_VERSION_COW: Cow<'static, str> = Cow::Borrowed(JSONRPC_VERSION);

/// A relay header, in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub value: String,
}

/// JSON-RPC 2.0 request envelope, shared by the JSON-RPC and Tendermint
/// dialects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_jsonrpc_version")]
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default = "default_request_id")]
    pub id: Arc<Value>,
}

fn default_jsonrpc_version() -> Cow<'static, str> {
    JSONRPC_VERSION_COW
}

fn default_request_id() -> Arc<Value> {
    Arc::new(Value::Number(1.into()))
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, method: method.into(), params, id: Arc::new(id) }
    }
}

/// Dialect-specific raw payload carried by a message.
#[derive(Debug, Clone)]
pub enum RpcPayload {
    JsonRpc(JsonRpcRequest),
    /// An ordered JSON-RPC batch; message order is preserved through
    /// dispatch.
    Batch(Vec<JsonRpcRequest>),
    Rest {
        /// Incoming URL path (without query string).
        path: String,
        /// The spec's path template the request matched, used for `{var}`
        /// parameter extraction.
        spec_path: String,
        query: Vec<(String, String)>,
        body: Option<Value>,
    },
    Grpc {
        /// Fully qualified `service/method`.
        path: String,
        body: Vec<u8>,
        /// Parameters resolved from the body (JSON directly, or decoded via
        /// the descriptor registry).
        params: Option<Value>,
    },
}

impl RpcPayload {
    /// Extracted request parameters, dialect-appropriate.
    pub fn params(&self) -> Option<Value> {
        match self {
            Self::JsonRpc(request) => request.params.clone(),
            Self::Batch(requests) => Some(Value::Array(
                requests.iter().map(|r| r.params.clone().unwrap_or(Value::Null)).collect(),
            )),
            Self::Rest { spec_path, path, query, .. } => rest_params(spec_path, path, query),
            Self::Grpc { params, .. } => params.clone(),
        }
    }
}

/// Zips the spec path template against the concrete path, extracting `{var}`
/// segments, then appends query parameters.
fn rest_params(spec_path: &str, path: &str, query: &[(String, String)]) -> Option<Value> {
    let mut parameters = serde_json::Map::new();
    let spec_segments: Vec<&str> = spec_path.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();
    for (index, segment) in spec_segments.iter().enumerate() {
        if segment.starts_with('{') && segment.ends_with('}') {
            if let Some(value) = path_segments.get(index) {
                let name = segment.trim_matches(|c| c == '{' || c == '}');
                parameters.insert(name.to_string(), Value::String((*value).to_string()));
            }
        }
    }
    for (key, value) in query {
        parameters.insert(key.clone(), Value::String(value.clone()));
    }
    if parameters.is_empty() {
        None
    } else {
        Some(Value::Object(parameters))
    }
}

/// The normalized request produced by a dialect parser.
#[derive(Debug, Clone)]
pub struct ChainMessage {
    api: Arc<Api>,
    api_collection: Arc<ApiCollection>,
    payload: RpcPayload,
    latest_requested_block: i64,
    earliest_requested_block: i64,
    extensions: Vec<Extension>,
    headers: Vec<Metadata>,
    timeout_override: Option<Duration>,
    error_handling_disabled: bool,
}

impl ChainMessage {
    pub fn new(
        api: Arc<Api>,
        api_collection: Arc<ApiCollection>,
        payload: RpcPayload,
        latest_requested_block: i64,
        earliest_requested_block: i64,
        headers: Vec<Metadata>,
    ) -> Self {
        Self {
            api,
            api_collection,
            payload,
            latest_requested_block,
            earliest_requested_block,
            extensions: Vec::new(),
            headers,
            timeout_override: None,
            error_handling_disabled: false,
        }
    }

    pub fn api(&self) -> &Arc<Api> {
        &self.api
    }

    pub fn api_collection(&self) -> &Arc<ApiCollection> {
        &self.api_collection
    }

    pub fn payload(&self) -> &RpcPayload {
        &self.payload
    }

    pub fn addon(&self) -> &str {
        &self.api_collection.collection_data.addon
    }

    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    pub fn extension_names(&self) -> Vec<String> {
        self.extensions.iter().map(|e| e.name.clone()).collect()
    }

    pub fn headers(&self) -> &[Metadata] {
        &self.headers
    }

    /// Appends headers that are not already present (by name).
    pub fn append_headers(&mut self, metadata: Vec<Metadata>) {
        for entry in metadata {
            if !self.headers.iter().any(|h| h.name == entry.name) {
                self.headers.push(entry);
            }
        }
    }

    /// Unconditionally replaces the extension set with the named extensions;
    /// unknown and disallowed names are dropped by the engine.
    pub fn override_extensions(&mut self, names: &[String], parser: &ExtensionParser) {
        self.extensions = parser.match_extensions(names);
    }

    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout_override
    }

    pub fn set_timeout_override(&mut self, timeout: Duration) {
        self.timeout_override = Some(timeout);
    }

    pub fn disable_error_handling(&mut self) {
        self.error_handling_disabled = true;
    }

    pub fn error_handling_disabled(&self) -> bool {
        self.error_handling_disabled
    }

    /// Rewrites the latest requested block into the payload so the relayed
    /// request pins the height the consumer observed.
    ///
    /// Only JSON-RPC payloads are rewritten. REST and gRPC payloads always
    /// return `false`: rewriting their height through headers disagreed with
    /// cosmos-sdk responses, so those dialects stay byte-transparent until
    /// the `cosmos-header-rewrite` feature lands a working setter.
    pub fn update_latest_block_in_message(&mut self, latest_block: u64, modify_content: bool) -> bool {
        match &mut self.payload {
            RpcPayload::JsonRpc(request) => {
                if self.latest_requested_block != LATEST_BLOCK || !modify_content {
                    return false;
                }
                let Some(index) = self
                    .api
                    .block_parsing
                    .parser_arg
                    .first()
                    .and_then(|arg| arg.parse::<usize>().ok())
                else {
                    return false;
                };
                let Some(Value::Array(params)) = request.params.as_mut() else {
                    return false;
                };
                let Some(slot) = params.get_mut(index) else {
                    return false;
                };
                *slot = Value::String(format!("0x{latest_block:x}"));
                self.latest_requested_block = latest_block as i64;
                if self.earliest_requested_block == LATEST_BLOCK {
                    self.earliest_requested_block = latest_block as i64;
                }
                true
            }
            RpcPayload::Batch(_) => false,
            RpcPayload::Rest { .. } | RpcPayload::Grpc { .. } => false,
        }
    }

    /// Widens the requested pair with another requested block (batch member).
    pub fn combine_requested_block(&mut self, requested: i64) {
        let (latest, _) =
            block::compare_requested_block_in_batch(self.latest_requested_block, requested);
        let (_, earliest) =
            block::compare_requested_block_in_batch(self.earliest_requested_block, requested);
        self.latest_requested_block = latest;
        self.earliest_requested_block = earliest;
    }

    pub fn requested_block_parsed(&self) -> (RequestedBlock, RequestedBlock) {
        (
            RequestedBlock::from_raw(self.latest_requested_block),
            RequestedBlock::from_raw(self.earliest_requested_block),
        )
    }
}

impl ExtensionsChainMessage for ChainMessage {
    fn requested_block(&self) -> (i64, i64) {
        (self.latest_requested_block, self.earliest_requested_block)
    }

    fn set_extension(&mut self, extension: Extension) {
        if !self.extensions.iter().any(|e| e.name == extension.name) {
            self.extensions.push(extension);
        }
    }
}
