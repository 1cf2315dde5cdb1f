//! Spec snapshot model.
//!
//! A [`Spec`] is the declarative capability manifest for one chain: which
//! APIs exist on which interface, what they cost, which headers are handled,
//! which extensions and verifications apply. Snapshots are loaded from an
//! external store, deserialized once, and treated as immutable; a parser
//! swaps in a new snapshot wholesale via `set_spec`, never by patching.

use serde::{Deserialize, Serialize};

/// Supported API interfaces. These are wire-level identifiers and appear in
/// policy queries, metrics labels and endpoint service advertisements.
pub const API_INTERFACE_JSONRPC: &str = "jsonrpc";
pub const API_INTERFACE_TENDERMINT_RPC: &str = "tendermintrpc";
pub const API_INTERFACE_REST: &str = "rest";
pub const API_INTERFACE_GRPC: &str = "grpc";

/// All interfaces a chain may enable, in canonical order.
pub const ALL_API_INTERFACES: &[&str] = &[
    API_INTERFACE_JSONRPC,
    API_INTERFACE_TENDERMINT_RPC,
    API_INTERFACE_REST,
    API_INTERFACE_GRPC,
];

/// Function tags mark parse directives (and headers) with the role they play
/// for the chain: fetching the latest block number, fetching a block by
/// number, subscribing, or rewriting the requested block from a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionTag {
    GetBlocknum,
    GetBlockByNum,
    GetBlockhash,
    SetLatestInMetadata,
    Subscribe,
}

/// How a spec-declared header participates in a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderKind {
    PassSend,
    PassReply,
    PassBoth,
    PassIgnore,
}

/// Strategy for extracting a block reference out of request parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParserFunc {
    /// No block argument; the api is block-agnostic.
    #[default]
    Empty,
    /// Positional argument: `parser_arg[0]` is the index into the params array.
    ParseByArg,
    /// Positional then nested: `parser_arg[0]` indexes params, the remaining
    /// args walk object keys.
    ParseCanonical,
    /// Key lookup: `parser_arg[0]` is a key resolved in a params object or a
    /// `key=value` list, `parser_arg[1]` (optional) the separator.
    ParseDictionary,
    /// Always yields `default_value`.
    Default,
}

/// Recipe for extracting the requested block from an api's parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockParser {
    #[serde(default)]
    pub parser_arg: Vec<String>,
    #[serde(default)]
    pub parser_func: ParserFunc,
    #[serde(default)]
    pub default_value: String,
}

/// One callable api inside a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Api {
    pub enabled: bool,
    pub name: String,
    #[serde(default)]
    pub compute_units: u64,
    /// Per-api timeout in milliseconds; `0` falls back to the compute-unit
    /// derived timeout.
    #[serde(default)]
    pub timeout_ms: u64,
    /// Hanging apis may legitimately take up to a block time longer than a
    /// normal relay.
    #[serde(default)]
    pub hanging: bool,
    /// Subscription apis stream results over a websocket instead of
    /// returning a single reply.
    #[serde(default)]
    pub subscription: bool,
    #[serde(default)]
    pub block_parsing: BlockParser,
}

/// Activation rule for an extension: minimum distance of the requested block
/// from the chain head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtensionRule {
    #[serde(default)]
    pub min_distance: u64,
}

/// An orthogonal capability activated by request properties (e.g. `archive`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub name: String,
    #[serde(default)]
    pub rule: Option<ExtensionRule>,
}

/// A header the spec knows how to handle, with its pass direction and an
/// optional function tag (`SET_LATEST_IN_METADATA` headers rewrite the
/// requested block).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub kind: HeaderKind,
    #[serde(default)]
    pub function_tag: Option<FunctionTag>,
}

/// A recipe to extract a field from a request or response, tagged with the
/// function it implements for the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseDirective {
    pub function_tag: FunctionTag,
    /// Outbound payload template; `%s` placeholders are substituted when
    /// crafting messages.
    #[serde(default)]
    pub function_template: String,
    #[serde(default)]
    pub result_parsing: BlockParser,
    #[serde(default)]
    pub api_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationSeverity {
    #[default]
    Fail,
    Warning,
}

/// Expected value for a verification under a specific extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseValue {
    #[serde(default)]
    pub extension: String,
    pub expected_value: String,
    #[serde(default)]
    pub latest_distance: u64,
}

/// A provider-response check: run a parse directive, compare to an expected
/// value, act according to severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub name: String,
    pub parse_directive: ParseDirective,
    #[serde(default)]
    pub values: Vec<ParseValue>,
    #[serde(default)]
    pub severity: VerificationSeverity,
}

/// The identity of a collection: interface, connection type, internal path
/// and addon.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CollectionData {
    pub api_interface: String,
    #[serde(default)]
    pub internal_path: String,
    /// Connection type, e.g. `POST` or `GET`; empty means the dialect default.
    #[serde(default, rename = "type")]
    pub connection_type: String,
    #[serde(default, rename = "add_on")]
    pub addon: String,
}

/// A group of apis sharing `(ConnectionType, InternalPath, Addon)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCollection {
    pub enabled: bool,
    pub collection_data: CollectionData,
    #[serde(default)]
    pub apis: Vec<Api>,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub parse_directives: Vec<ParseDirective>,
    #[serde(default)]
    pub extensions: Vec<Extension>,
    #[serde(default)]
    pub verifications: Vec<Verification>,
}

/// Immutable-per-epoch description of one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    /// Chain id, e.g. `LAV1` or `ETH1`.
    pub index: String,
    #[serde(default)]
    pub name: String,
    pub enabled: bool,
    /// Average block time in milliseconds.
    #[serde(default)]
    pub average_block_time: i64,
    #[serde(default)]
    pub allowed_block_lag_for_qos_sync: i64,
    #[serde(default)]
    pub block_distance_for_finalized_data: u32,
    #[serde(default)]
    pub blocks_in_finalization_proof: u32,
    #[serde(default)]
    pub data_reliability_enabled: bool,
    #[serde(default)]
    pub reliability_threshold: u32,
    #[serde(default)]
    pub api_collections: Vec<ApiCollection>,
}

/// Lookup key for apis and headers: the (lowercased, for headers) name plus
/// the connection type it was declared under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApiKey {
    pub name: String,
    pub connection_type: String,
}

/// Lookup key for collections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionKey {
    pub connection_type: String,
    pub internal_path: String,
    pub addon: String,
}

impl CollectionKey {
    pub fn of(collection: &ApiCollection) -> Self {
        Self {
            connection_type: collection.collection_data.connection_type.clone(),
            internal_path: collection.collection_data.internal_path.clone(),
            addon: collection.collection_data.addon.clone(),
        }
    }
}

/// Lookup key for verifications: the extension/addon pair they apply under,
/// where empty strings denote the default collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VerificationKey {
    pub extension: String,
    pub addon: String,
}

/// A verification flattened out of the spec, ready to execute against a
/// provider response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationContainer {
    pub connection_type: String,
    pub name: String,
    pub parse_directive: ParseDirective,
    pub value: String,
    pub latest_distance: u64,
    pub severity: VerificationSeverity,
    pub verification_key: VerificationKey,
}
