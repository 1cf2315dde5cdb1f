//! Chain fetcher.
//!
//! Crafts tagged-directive messages (latest block, block by number) through
//! the dialect parser and dispatches them over the router, so the relay can
//! track the chain head of the nodes it fronts. Outcomes feed the
//! `lava_provider_fetch_*` series.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::block;
use crate::errors::RelayError;
use crate::metrics::ProviderMetricsManager;
use crate::parser::{extract_requested_block, ChainParser, CraftData, ParserError};
use crate::router::{relay_timeout, ChainRouter};
use crate::spec::{BlockParser, FunctionTag, API_INTERFACE_JSONRPC};

pub struct ChainFetcher {
    parser: Arc<dyn ChainParser>,
    router: Arc<ChainRouter>,
    metrics: Option<Arc<ProviderMetricsManager>>,
}

impl ChainFetcher {
    pub fn new(
        parser: Arc<dyn ChainParser>,
        router: Arc<ChainRouter>,
        metrics: Option<Arc<ProviderMetricsManager>>,
    ) -> Self {
        Self { parser, router, metrics }
    }

    /// Queries the node's latest block height via the chain's
    /// `GET_BLOCKNUM` directive.
    pub async fn fetch_latest_block_num(&self) -> Result<i64, RelayError> {
        let spec_id = self.parser.base().spec_index();
        match self.fetch_latest_inner().await {
            Ok(block) => {
                if let Some(metrics) = &self.metrics {
                    metrics.set_latest_block_fetch_success(&spec_id);
                    if block >= 0 {
                        metrics.set_latest_block(&spec_id, block as u64);
                    }
                }
                Ok(block)
            }
            Err(error) => {
                if let Some(metrics) = &self.metrics {
                    metrics.set_latest_block_fetch_error(&spec_id);
                }
                Err(error)
            }
        }
    }

    async fn fetch_latest_inner(&self) -> Result<i64, RelayError> {
        let (directive, collection_data) = self
            .parser
            .base()
            .get_parsing_by_tag(FunctionTag::GetBlocknum)
            .ok_or_else(|| ParserError::MissingDirective("GET_BLOCKNUM".to_string()))?;
        let message =
            self.parser.craft_message(&directive, &collection_data.connection_type, None, vec![])?;
        let timeout = relay_timeout(&message, &self.parser.base().chain_block_stats(), 0);
        let sent = self.router.send_node_msg(&message, &[], timeout).await?;
        let reply: Value = serde_json::from_slice(&sent.reply.data)
            .map_err(|error| ParserError::MalformedRequest(error.to_string()))?;
        let block = parse_block_from_reply(&directive.result_parsing, &reply)?;
        debug!(chain_id = %sent.chain_id, block, "fetched latest block");
        Ok(block)
    }

    /// Fetches a specific block via the chain's `GET_BLOCK_BY_NUM`
    /// directive, returning the raw reply.
    pub async fn fetch_block_by_num(&self, block: u64) -> Result<Value, RelayError> {
        let spec_id = self.parser.base().spec_index();
        match self.fetch_block_inner(block).await {
            Ok(value) => {
                if let Some(metrics) = &self.metrics {
                    metrics.set_specific_block_fetch_success(&spec_id);
                }
                Ok(value)
            }
            Err(error) => {
                if let Some(metrics) = &self.metrics {
                    metrics.set_specific_block_fetch_error(&spec_id);
                }
                Err(error)
            }
        }
    }

    async fn fetch_block_inner(&self, block: u64) -> Result<Value, RelayError> {
        let (directive, collection_data) = self
            .parser
            .base()
            .get_parsing_by_tag(FunctionTag::GetBlockByNum)
            .ok_or_else(|| ParserError::MissingDirective("GET_BLOCK_BY_NUM".to_string()))?;
        let rendered = if self.parser.api_interface() == API_INTERFACE_JSONRPC {
            format!("0x{block:x}")
        } else {
            block.to_string()
        };
        let craft = CraftData { data: rendered.into_bytes(), ..Default::default() };
        let message = self.parser.craft_message(
            &directive,
            &collection_data.connection_type,
            Some(&craft),
            vec![],
        )?;
        let timeout = relay_timeout(&message, &self.parser.base().chain_block_stats(), 0);
        let sent = self.router.send_node_msg(&message, &[], timeout).await?;
        serde_json::from_slice(&sent.reply.data)
            .map_err(|error| ParserError::MalformedRequest(error.to_string()).into())
    }
}

/// Applies a directive's result parser to a reply. JSON-RPC style replies
/// wrap the payload in a `result` field; bare replies are parsed directly.
fn parse_block_from_reply(result_parsing: &BlockParser, reply: &Value) -> Result<i64, RelayError> {
    let payload = reply.get("result").unwrap_or(reply);
    if let Value::String(text) = payload {
        return Ok(block::parse_block_parameter(text).map_err(ParserError::from)?);
    }
    Ok(extract_requested_block(result_parsing, Some(payload))?)
}
