//! gRPC dialect parser.
//!
//! Methods are fully qualified `service/method` paths. Parameters arrive
//! either as JSON (grpc-web style tooling) or as a protobuf-encoded body
//! decoded through a descriptor registry into a dynamic message.

use std::sync::Arc;

use parking_lot::RwLock;
use prost_reflect::{DescriptorPool, DynamicMessage, MethodDescriptor};
use serde_json::Value;
use tracing::debug;

use crate::block;
use crate::extensions::ExtensionInfo;
use crate::message::{ChainMessage, Metadata, RpcPayload};
use crate::spec::{HeaderKind, ParseDirective, API_INTERFACE_GRPC};

use super::{params, BaseChainParser, ChainParser, CraftData, ParserError};

/// Proto descriptor registry backing dynamic message decoding, built from a
/// `FileDescriptorSet` obtained via server reflection or a compiled
/// descriptor blob.
#[derive(Debug, Clone)]
pub struct DescriptorRegistry {
    pool: DescriptorPool,
}

impl DescriptorRegistry {
    pub fn from_file_descriptor_set(bytes: &[u8]) -> Result<Self, ParserError> {
        let pool = DescriptorPool::decode(bytes)
            .map_err(|error| ParserError::MalformedRequest(format!("descriptor set: {error}")))?;
        Ok(Self { pool })
    }

    fn find_method(&self, path: &str) -> Option<MethodDescriptor> {
        let (service, method) = split_method_path(path)?;
        self.pool
            .services()
            .find(|candidate| candidate.full_name() == service)
            .and_then(|candidate| candidate.methods().find(|m| m.name() == method))
    }

    /// Decodes a protobuf request body into JSON parameters using the
    /// method's input descriptor.
    pub fn decode_params(&self, path: &str, body: &[u8]) -> Result<Value, ParserError> {
        let method = self.find_method(path).ok_or_else(|| ParserError::ApiNotSupported {
            name: path.to_string(),
            connection_type: String::new(),
        })?;
        let message = DynamicMessage::decode(method.input(), body)
            .map_err(|error| ParserError::MalformedRequest(error.to_string()))?;
        serde_json::to_value(&message)
            .map_err(|error| ParserError::MalformedRequest(error.to_string()))
    }
}

/// Splits `cosmos.bank.v1beta1.Query/Balance` (or the dotted form) into
/// service and method names.
fn split_method_path(path: &str) -> Option<(&str, &str)> {
    if let Some(position) = path.rfind('/') {
        return Some((&path[..position], &path[position + 1..]));
    }
    let position = path.rfind('.')?;
    Some((&path[..position], &path[position + 1..]))
}

pub struct GrpcChainParser {
    base: BaseChainParser,
    registry: RwLock<Option<DescriptorRegistry>>,
}

impl GrpcChainParser {
    pub fn new() -> Self {
        Self { base: BaseChainParser::new(API_INTERFACE_GRPC), registry: RwLock::new(None) }
    }

    /// Installs the descriptor registry once reflection data is available.
    pub fn set_registry(&self, registry: DescriptorRegistry) {
        *self.registry.write() = Some(registry);
    }

    fn resolve_params(&self, path: &str, body: &[u8]) -> Option<Value> {
        if body.is_empty() {
            return None;
        }
        if body[0] == b'{' || body[0] == b'[' {
            return serde_json::from_slice(body).ok();
        }
        let registry = self.registry.read();
        match registry.as_ref() {
            Some(registry) => match registry.decode_params(path, body) {
                Ok(value) => Some(value),
                Err(error) => {
                    debug!(path, %error, "failed resolving grpc params dynamically");
                    None
                }
            },
            None => None,
        }
    }
}

impl Default for GrpcChainParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainParser for GrpcChainParser {
    fn parse_msg(
        &self,
        url: &str,
        data: &[u8],
        connection_type: &str,
        metadata: Vec<Metadata>,
        extension_info: &ExtensionInfo,
    ) -> Result<ChainMessage, ParserError> {
        let path = url.trim_matches('/');
        let container = self.base.get_supported_api(path, connection_type)?;
        let collection = self.base.get_api_collection(&container.collection_key)?;
        let handled = self.base.handle_headers(&metadata, &collection, HeaderKind::PassSend);
        let parameters = self.resolve_params(path, data);
        let requested = match &handled.overwrite_requested_block {
            Some(overwrite) => block::parse_block_parameter(overwrite)?,
            None => {
                params::extract_requested_block(&container.api.block_parsing, parameters.as_ref())?
            }
        };
        let addon = collection.collection_data.addon.clone();
        let mut message = ChainMessage::new(
            Arc::clone(&container.api),
            collection,
            RpcPayload::Grpc { path: path.to_string(), body: data.to_vec(), params: parameters },
            requested,
            requested,
            handled.filtered,
        );
        self.base.extension_parsing(&addon, &mut message, extension_info);
        Ok(message)
    }

    fn craft_message(
        &self,
        directive: &ParseDirective,
        connection_type: &str,
        craft_data: Option<&CraftData>,
        metadata: Vec<Metadata>,
    ) -> Result<ChainMessage, ParserError> {
        let body = craft_data.map(|data| data.data.clone()).unwrap_or_default();
        let path = directive.api_name.trim_matches('/');
        let container = self.base.get_supported_api(path, connection_type)?;
        let collection = self.base.get_api_collection(&container.collection_key)?;
        let handled = self.base.handle_headers(&metadata, &collection, HeaderKind::PassSend);
        let requested = params::extract_requested_block(&container.api.block_parsing, None)?;
        Ok(ChainMessage::new(
            Arc::clone(&container.api),
            collection,
            RpcPayload::Grpc { path: path.to_string(), body, params: None },
            requested,
            requested,
            handled.filtered,
        ))
    }

    fn base(&self) -> &BaseChainParser {
        &self.base
    }

    fn api_interface(&self) -> &'static str {
        API_INTERFACE_GRPC
    }
}
