//! Chain parsers.
//!
//! One parser per API interface, all composing the shared [`BaseChainParser`]:
//! the base owns the spec index, policy state and header handling, while each
//! dialect contributes request parsing, requested-block extraction and
//! outbound message crafting.

mod base;
mod grpc;
mod jsonrpc;
mod params;
mod rest;
mod tendermint;

pub use base::{ApiContainer, BaseChainParser, ChainBlockStats, HandledHeaders, SeparatedServices, TaggedContainer};
pub use grpc::{DescriptorRegistry, GrpcChainParser};
pub use jsonrpc::JsonRpcChainParser;
pub use params::extract_requested_block;
pub use rest::RestChainParser;
pub use tendermint::TendermintChainParser;

use thiserror::Error;

use crate::block::BlockParseError;
use crate::extensions::ExtensionInfo;
use crate::message::{ChainMessage, Metadata};
use crate::spec::{
    ParseDirective, Spec, API_INTERFACE_GRPC, API_INTERFACE_JSONRPC, API_INTERFACE_REST,
    API_INTERFACE_TENDERMINT_RPC,
};

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("api not supported: {name} ({connection_type})")]
    ApiNotSupported { name: String, connection_type: String },
    #[error("api is disabled: {name} ({connection_type})")]
    ApiDisabled { name: String, connection_type: String },
    #[error("consumer policy does not allow addon: {0}")]
    AddonNotAllowed(String),
    #[error("supported item is neither an addon nor an extension: {0}")]
    InvalidSupported(String),
    #[error("malformed request payload: {0}")]
    MalformedRequest(String),
    #[error(transparent)]
    BlockParsing(#[from] BlockParseError),
    #[error("policy query failed: {0}")]
    PolicyQuery(String),
    #[error("no parse directive tagged {0}")]
    MissingDirective(String),
    #[error("chain parser for api interface {0} not found")]
    UnknownApiInterface(String),
}

/// Query surface of the consumer's subscription policy.
pub trait PolicyInf: Send + Sync {
    fn get_supported_addons(&self, spec_id: &str) -> Result<Vec<String>, ParserError>;
    fn get_supported_extensions(&self, spec_id: &str) -> Result<Vec<EndpointService>, ParserError>;
}

/// One extension a policy grants, scoped to an api interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointService {
    pub extension: String,
    pub api_interface: String,
}

/// Inputs for crafting an outbound message from a parse directive.
#[derive(Debug, Clone, Default)]
pub struct CraftData {
    pub path: String,
    pub data: Vec<u8>,
    pub internal_path: String,
}

/// The dialect-facing parser contract. All read operations go through the
/// embedded base parser's reader lock; none block.
pub trait ChainParser: Send + Sync {
    /// Parses an incoming request into a normalized message: api match,
    /// header handling, requested-block extraction and extension resolution.
    fn parse_msg(
        &self,
        url: &str,
        data: &[u8],
        connection_type: &str,
        metadata: Vec<Metadata>,
        extension_info: &ExtensionInfo,
    ) -> Result<ChainMessage, ParserError>;

    /// Builds a dialect-appropriate outbound message from a parse directive
    /// (used by the health fetcher and data reliability probes).
    fn craft_message(
        &self,
        directive: &ParseDirective,
        connection_type: &str,
        craft_data: Option<&CraftData>,
        metadata: Vec<Metadata>,
    ) -> Result<ChainMessage, ParserError>;

    fn base(&self) -> &BaseChainParser;

    fn api_interface(&self) -> &'static str;
}

/// Constructs the parser for an api interface.
pub fn new_chain_parser(api_interface: &str) -> Result<Box<dyn ChainParser>, ParserError> {
    match api_interface {
        API_INTERFACE_JSONRPC => Ok(Box::new(JsonRpcChainParser::new())),
        API_INTERFACE_TENDERMINT_RPC => Ok(Box::new(TendermintChainParser::new())),
        API_INTERFACE_REST => Ok(Box::new(RestChainParser::new())),
        API_INTERFACE_GRPC => Ok(Box::new(GrpcChainParser::new())),
        other => Err(ParserError::UnknownApiInterface(other.to_string())),
    }
}

/// Constructs a parser and loads a spec snapshot into it.
pub fn new_chain_parser_with_spec(
    api_interface: &str,
    spec: Spec,
) -> Result<Box<dyn ChainParser>, ParserError> {
    let parser = new_chain_parser(api_interface)?;
    parser.base().set_spec(spec);
    Ok(parser)
}
