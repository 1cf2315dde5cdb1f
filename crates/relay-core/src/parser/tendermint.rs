//! Tendermint-RPC dialect parser.
//!
//! Tendermint speaks JSON-RPC over POST bodies and a URI form over GET,
//! where the method is the path tail and arguments arrive as query
//! parameters. Both reduce to the same envelope.

use serde_json::{Map, Value};

use crate::extensions::ExtensionInfo;
use crate::message::{ChainMessage, JsonRpcRequest, Metadata};
use crate::spec::{ParseDirective, API_INTERFACE_TENDERMINT_RPC};

use super::jsonrpc::{craft_json_message, parse_json_envelope};
use super::{BaseChainParser, ChainParser, CraftData, ParserError};

pub struct TendermintChainParser {
    base: BaseChainParser,
}

impl TendermintChainParser {
    pub fn new() -> Self {
        Self { base: BaseChainParser::new(API_INTERFACE_TENDERMINT_RPC) }
    }
}

impl Default for TendermintChainParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainParser for TendermintChainParser {
    fn parse_msg(
        &self,
        url: &str,
        data: &[u8],
        connection_type: &str,
        metadata: Vec<Metadata>,
        extension_info: &ExtensionInfo,
    ) -> Result<ChainMessage, ParserError> {
        if !data.is_empty() {
            return parse_json_envelope(&self.base, data, connection_type, metadata, extension_info);
        }
        let request = uri_to_envelope(url)?;
        let body = serde_json::to_vec(&request)
            .map_err(|error| ParserError::MalformedRequest(error.to_string()))?;
        parse_json_envelope(&self.base, &body, connection_type, metadata, extension_info)
    }

    fn craft_message(
        &self,
        directive: &ParseDirective,
        connection_type: &str,
        craft_data: Option<&CraftData>,
        metadata: Vec<Metadata>,
    ) -> Result<ChainMessage, ParserError> {
        craft_json_message(&self.base, directive, connection_type, craft_data, metadata)
    }

    fn base(&self) -> &BaseChainParser {
        &self.base
    }

    fn api_interface(&self) -> &'static str {
        API_INTERFACE_TENDERMINT_RPC
    }
}

/// Converts a URI call (`/status`, `/block?height=5`) into the JSON-RPC
/// envelope the shared parser understands.
fn uri_to_envelope(url: &str) -> Result<JsonRpcRequest, ParserError> {
    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    };
    let method = path.trim_matches('/');
    if method.is_empty() {
        return Err(ParserError::MalformedRequest("empty tendermint uri".to_string()));
    }
    let params = query.map(|query| {
        let mut map = Map::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            map.insert(key.to_string(), Value::String(value.trim_matches('"').to_string()));
        }
        Value::Object(map)
    });
    Ok(JsonRpcRequest::new(method, params, Value::Number(1.into())))
}
