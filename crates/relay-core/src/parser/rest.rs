//! REST dialect parser.
//!
//! REST apis are declared as URL path templates; lookup matches incoming
//! paths against the precompiled patterns and parameters come from the
//! template's `{var}` segments plus the query string.

use std::sync::Arc;

use serde_json::Value;

use crate::block;
use crate::extensions::ExtensionInfo;
use crate::message::{ChainMessage, Metadata, RpcPayload};
use crate::spec::{HeaderKind, ParseDirective, API_INTERFACE_REST};

use super::{params, BaseChainParser, ChainParser, CraftData, ParserError};

pub struct RestChainParser {
    base: BaseChainParser,
}

impl RestChainParser {
    pub fn new() -> Self {
        Self { base: BaseChainParser::new(API_INTERFACE_REST) }
    }

    fn build_message(
        &self,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<Value>,
        connection_type: &str,
        metadata: Vec<Metadata>,
        extension_info: &ExtensionInfo,
    ) -> Result<ChainMessage, ParserError> {
        let (container, spec_path) = self.base.get_supported_api_rest(path, connection_type)?;
        let collection = self.base.get_api_collection(&container.collection_key)?;
        let handled = self.base.handle_headers(&metadata, &collection, HeaderKind::PassSend);
        let payload = RpcPayload::Rest { path: path.to_string(), spec_path, query, body };
        let requested = match &handled.overwrite_requested_block {
            Some(overwrite) => block::parse_block_parameter(overwrite)?,
            None => {
                let parameters = payload.params();
                params::extract_requested_block(&container.api.block_parsing, parameters.as_ref())?
            }
        };
        let addon = collection.collection_data.addon.clone();
        let mut message = ChainMessage::new(
            Arc::clone(&container.api),
            collection,
            payload,
            requested,
            requested,
            handled.filtered,
        );
        self.base.extension_parsing(&addon, &mut message, extension_info);
        Ok(message)
    }
}

impl Default for RestChainParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainParser for RestChainParser {
    fn parse_msg(
        &self,
        url: &str,
        data: &[u8],
        connection_type: &str,
        metadata: Vec<Metadata>,
        extension_info: &ExtensionInfo,
    ) -> Result<ChainMessage, ParserError> {
        let (path, query_string) = match url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (url, None),
        };
        let query = query_string
            .map(|query| {
                query
                    .split('&')
                    .filter(|pair| !pair.is_empty())
                    .map(|pair| {
                        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                        (key.to_string(), value.to_string())
                    })
                    .collect()
            })
            .unwrap_or_default();
        let body = if data.is_empty() { None } else { serde_json::from_slice(data).ok() };
        self.build_message(path, query, body, connection_type, metadata, extension_info)
    }

    fn craft_message(
        &self,
        directive: &ParseDirective,
        connection_type: &str,
        craft_data: Option<&CraftData>,
        metadata: Vec<Metadata>,
    ) -> Result<ChainMessage, ParserError> {
        let path = match craft_data {
            Some(data) if !directive.function_template.is_empty() => directive
                .function_template
                .replace("%s", String::from_utf8_lossy(&data.data).as_ref()),
            _ => directive.api_name.clone(),
        };
        self.build_message(&path, vec![], None, connection_type, metadata, &ExtensionInfo::default())
    }

    fn base(&self) -> &BaseChainParser {
        &self.base
    }

    fn api_interface(&self) -> &'static str {
        API_INTERFACE_REST
    }
}
