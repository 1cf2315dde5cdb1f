//! JSON-RPC dialect parser.

use std::sync::Arc;

use serde_json::Value;

use crate::block;
use crate::extensions::ExtensionInfo;
use crate::message::{ChainMessage, JsonRpcRequest, Metadata, RpcPayload};
use crate::spec::{HeaderKind, ParseDirective, API_INTERFACE_JSONRPC};

use super::{params, BaseChainParser, ChainParser, CraftData, ParserError};

pub struct JsonRpcChainParser {
    base: BaseChainParser,
}

impl JsonRpcChainParser {
    pub fn new() -> Self {
        Self { base: BaseChainParser::new(API_INTERFACE_JSONRPC) }
    }
}

impl Default for JsonRpcChainParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainParser for JsonRpcChainParser {
    fn parse_msg(
        &self,
        _url: &str,
        data: &[u8],
        connection_type: &str,
        metadata: Vec<Metadata>,
        extension_info: &ExtensionInfo,
    ) -> Result<ChainMessage, ParserError> {
        parse_json_envelope(&self.base, data, connection_type, metadata, extension_info)
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
        API_INTERFACE_JSONRPC
    }
}

/// Parses a JSON-RPC 2.0 envelope (single request or batch) into a message.
///
/// Shared with the Tendermint dialect, whose POST body is the same envelope.
pub(super) fn parse_json_envelope(
    base: &BaseChainParser,
    data: &[u8],
    connection_type: &str,
    metadata: Vec<Metadata>,
    extension_info: &ExtensionInfo,
) -> Result<ChainMessage, ParserError> {
    let value: Value = serde_json::from_slice(data)
        .map_err(|error| ParserError::MalformedRequest(error.to_string()))?;
    match value {
        Value::Array(entries) => {
            parse_batch(base, entries, connection_type, metadata, extension_info)
        }
        envelope => {
            let request: JsonRpcRequest = serde_json::from_value(envelope)
                .map_err(|error| ParserError::MalformedRequest(error.to_string()))?;
            parse_single(base, request, connection_type, metadata, extension_info)
        }
    }
}

fn parse_single(
    base: &BaseChainParser,
    request: JsonRpcRequest,
    connection_type: &str,
    metadata: Vec<Metadata>,
    extension_info: &ExtensionInfo,
) -> Result<ChainMessage, ParserError> {
    let container = base.get_supported_api(&request.method, connection_type)?;
    let collection = base.get_api_collection(&container.collection_key)?;
    let handled = base.handle_headers(&metadata, &collection, HeaderKind::PassSend);
    let requested = match &handled.overwrite_requested_block {
        Some(overwrite) => block::parse_block_parameter(overwrite)?,
        None => params::extract_requested_block(&container.api.block_parsing, request.params.as_ref())?,
    };
    let addon = collection.collection_data.addon.clone();
    let mut message = ChainMessage::new(
        Arc::clone(&container.api),
        collection,
        RpcPayload::JsonRpc(request),
        requested,
        requested,
        handled.filtered,
    );
    base.extension_parsing(&addon, &mut message, extension_info);
    Ok(message)
}

/// A batch produces one message whose requested pair is the reduction of
/// every member's requested block under the freshness order; member order is
/// preserved in the payload.
fn parse_batch(
    base: &BaseChainParser,
    entries: Vec<Value>,
    connection_type: &str,
    metadata: Vec<Metadata>,
    extension_info: &ExtensionInfo,
) -> Result<ChainMessage, ParserError> {
    if entries.is_empty() {
        return Err(ParserError::MalformedRequest("empty batch".to_string()));
    }
    let mut requests = Vec::with_capacity(entries.len());
    for entry in entries {
        let request: JsonRpcRequest = serde_json::from_value(entry)
            .map_err(|error| ParserError::MalformedRequest(error.to_string()))?;
        requests.push(request);
    }

    // The heaviest member anchors the message: its api drives validation,
    // compute units and timeouts for the whole batch.
    let mut container = base.get_supported_api(&requests[0].method, connection_type)?;
    let mut latest = params::extract_requested_block(
        &container.api.block_parsing,
        requests[0].params.as_ref(),
    )?;
    let mut earliest = latest;
    for request in &requests[1..] {
        let member = base.get_supported_api(&request.method, connection_type)?;
        let requested =
            params::extract_requested_block(&member.api.block_parsing, request.params.as_ref())?;
        (latest, _) = block::compare_requested_block_in_batch(latest, requested);
        (_, earliest) = block::compare_requested_block_in_batch(earliest, requested);
        if member.api.compute_units > container.api.compute_units {
            container = member;
        }
    }

    let collection = base.get_api_collection(&container.collection_key)?;
    let handled = base.handle_headers(&metadata, &collection, HeaderKind::PassSend);
    let (latest, earliest) = match &handled.overwrite_requested_block {
        Some(overwrite) => {
            let block = block::parse_block_parameter(overwrite)?;
            (block, block)
        }
        None => (latest, earliest),
    };
    let addon = collection.collection_data.addon.clone();
    let mut message = ChainMessage::new(
        Arc::clone(&container.api),
        collection,
        RpcPayload::Batch(requests),
        latest,
        earliest,
        handled.filtered,
    );
    base.extension_parsing(&addon, &mut message, extension_info);
    Ok(message)
}

/// Builds an outbound JSON-RPC message from a directive template. `%s`
/// placeholders take the craft data; an empty template falls back to a bare
/// method call.
pub(super) fn craft_json_message(
    base: &BaseChainParser,
    directive: &ParseDirective,
    connection_type: &str,
    craft_data: Option<&CraftData>,
    metadata: Vec<Metadata>,
) -> Result<ChainMessage, ParserError> {
    let request = if directive.function_template.is_empty() {
        JsonRpcRequest::new(directive.api_name.clone(), None, Value::Number(1.into()))
    } else {
        let rendered = match craft_data {
            Some(data) => directive
                .function_template
                .replace("%s", String::from_utf8_lossy(&data.data).as_ref()),
            None => directive.function_template.clone(),
        };
        serde_json::from_str(&rendered)
            .map_err(|error| ParserError::MalformedRequest(error.to_string()))?
    };
    parse_single(base, request, connection_type, metadata, &ExtensionInfo::default())
}
