//! Shared test fixtures: a small multi-interface spec and helpers used by
//! unit tests here and the scenario tests in the workspace test crate.

use std::sync::Arc;

use serde_json::Value;

use crate::block::NOT_APPLICABLE;
use crate::message::{ChainMessage, JsonRpcRequest, RpcPayload};
use crate::parser::{BaseChainParser, EndpointService, ParserError, PolicyInf};
use crate::spec::{
    Api, ApiCollection, BlockParser, CollectionData, Extension, ExtensionRule, FunctionTag, Header,
    HeaderKind, ParseDirective, ParseValue, ParserFunc, Spec, Verification, VerificationSeverity,
    ALL_API_INTERFACES, API_INTERFACE_GRPC, API_INTERFACE_JSONRPC, API_INTERFACE_REST,
    API_INTERFACE_TENDERMINT_RPC,
};

fn api(name: &str, compute_units: u64, block_parsing: BlockParser) -> Api {
    Api {
        enabled: true,
        name: name.to_string(),
        compute_units,
        timeout_ms: 0,
        hanging: false,
        subscription: false,
        block_parsing,
    }
}

fn by_arg(index: &str, default: &str) -> BlockParser {
    BlockParser {
        parser_arg: vec![index.to_string()],
        parser_func: ParserFunc::ParseByArg,
        default_value: default.to_string(),
    }
}

fn dictionary(key: &str, default: &str) -> BlockParser {
    BlockParser {
        parser_arg: vec![key.to_string()],
        parser_func: ParserFunc::ParseDictionary,
        default_value: default.to_string(),
    }
}

fn collection(
    api_interface: &str,
    connection_type: &str,
    internal_path: &str,
    addon: &str,
) -> ApiCollection {
    ApiCollection {
        enabled: true,
        collection_data: CollectionData {
            api_interface: api_interface.to_string(),
            internal_path: internal_path.to_string(),
            connection_type: connection_type.to_string(),
            addon: addon.to_string(),
        },
        apis: vec![],
        headers: vec![],
        parse_directives: vec![],
        extensions: vec![],
        verifications: vec![],
    }
}

/// A spec covering all four interfaces: a default and a `debug` JSON-RPC
/// collection, a Tendermint collection, a templated REST collection with a
/// block-height header, and a gRPC collection.
pub fn test_spec() -> Spec {
    let mut jsonrpc = collection(API_INTERFACE_JSONRPC, "POST", "", "");
    jsonrpc.apis = vec![
        api("eth_blockNumber", 10, BlockParser::default()),
        api("eth_getBlockByNumber", 20, by_arg("0", "latest")),
        Api { enabled: false, ..api("eth_disabledCall", 10, BlockParser::default()) },
    ];
    jsonrpc.headers = vec![
        Header { name: "x-both-ways".to_string(), kind: HeaderKind::PassBoth, function_tag: None },
        Header { name: "x-reply-only".to_string(), kind: HeaderKind::PassReply, function_tag: None },
    ];
    jsonrpc.extensions =
        vec![Extension { name: "archive".to_string(), rule: Some(ExtensionRule { min_distance: 128 }) }];
    jsonrpc.verifications = vec![Verification {
        name: "chain-id".to_string(),
        parse_directive: ParseDirective {
            function_tag: FunctionTag::GetBlocknum,
            function_template: r#"{"jsonrpc":"2.0","method":"eth_chainId","params":[],"id":1}"#
                .to_string(),
            result_parsing: BlockParser::default(),
            api_name: "eth_chainId".to_string(),
        },
        values: vec![ParseValue {
            extension: String::new(),
            expected_value: "0x1".to_string(),
            latest_distance: 0,
        }],
        severity: VerificationSeverity::Fail,
    }];
    jsonrpc.parse_directives = vec![
        ParseDirective {
            function_tag: FunctionTag::GetBlocknum,
            function_template: r#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}"#
                .to_string(),
            result_parsing: BlockParser::default(),
            api_name: "eth_blockNumber".to_string(),
        },
        ParseDirective {
            function_tag: FunctionTag::GetBlockByNum,
            function_template:
                r#"{"jsonrpc":"2.0","method":"eth_getBlockByNumber","params":["%s",false],"id":1}"#
                    .to_string(),
            result_parsing: by_arg("0", ""),
            api_name: "eth_getBlockByNumber".to_string(),
        },
    ];

    let mut jsonrpc_debug = collection(API_INTERFACE_JSONRPC, "POST", "", "debug");
    jsonrpc_debug.apis = vec![api("eth_debugCall", 100, BlockParser::default())];
    jsonrpc_debug.verifications = vec![Verification {
        name: "debug-archive".to_string(),
        parse_directive: ParseDirective {
            function_tag: FunctionTag::GetBlocknum,
            function_template: String::new(),
            result_parsing: BlockParser::default(),
            api_name: "eth_blockNumber".to_string(),
        },
        values: vec![ParseValue {
            extension: "archive".to_string(),
            expected_value: "enabled".to_string(),
            latest_distance: 0,
        }],
        severity: VerificationSeverity::Warning,
    }];

    let mut jsonrpc_disabled = collection(API_INTERFACE_JSONRPC, "POST", "/disabled", "");
    jsonrpc_disabled.enabled = false;
    jsonrpc_disabled.apis = vec![api("eth_fromDisabledCollection", 10, BlockParser::default())];

    let mut tendermint = collection(API_INTERFACE_TENDERMINT_RPC, "", "", "");
    tendermint.apis = vec![
        api("status", 10, BlockParser::default()),
        api("block", 20, dictionary("height", "latest")),
    ];
    tendermint.parse_directives = vec![ParseDirective {
        function_tag: FunctionTag::GetBlocknum,
        function_template: r#"{"jsonrpc":"2.0","method":"status","id":1}"#.to_string(),
        result_parsing: BlockParser::default(),
        api_name: "status".to_string(),
    }];

    let mut rest = collection(API_INTERFACE_REST, "GET", "", "");
    rest.apis = vec![
        api("/cosmos/bank/v1beta1/balances/{address}", 10, dictionary("height", "latest")),
        api(
            "/cosmos/base/tendermint/v1beta1/blocks/latest",
            10,
            BlockParser {
                parser_arg: vec![],
                parser_func: ParserFunc::Default,
                default_value: "latest".to_string(),
            },
        ),
    ];
    rest.headers = vec![
        Header {
            name: "X-Cosmos-Block-Height".to_string(),
            kind: HeaderKind::PassSend,
            function_tag: Some(FunctionTag::SetLatestInMetadata),
        },
        Header { name: "x-noisy".to_string(), kind: HeaderKind::PassIgnore, function_tag: None },
    ];
    rest.parse_directives = vec![ParseDirective {
        function_tag: FunctionTag::GetBlocknum,
        function_template: String::new(),
        result_parsing: dictionary("height", ""),
        api_name: "/cosmos/base/tendermint/v1beta1/blocks/latest".to_string(),
    }];

    let mut grpc = collection(API_INTERFACE_GRPC, "", "", "");
    grpc.apis = vec![
        api("cosmos.bank.v1beta1.Query/AllBalances", 10, dictionary("height", "latest")),
        api("cosmos.base.tendermint.v1beta1.Service/GetLatestBlock", 10, BlockParser::default()),
    ];

    Spec {
        index: "TEST1".to_string(),
        name: "test chain".to_string(),
        enabled: true,
        average_block_time: 10_000,
        allowed_block_lag_for_qos_sync: 5,
        block_distance_for_finalized_data: 7,
        blocks_in_finalization_proof: 3,
        data_reliability_enabled: true,
        reliability_threshold: 268_435_455,
        api_collections: vec![jsonrpc, jsonrpc_debug, jsonrpc_disabled, tendermint, rest, grpc],
    }
}

/// A policy backed by fixed lists.
pub struct StaticPolicy {
    pub addons: Vec<String>,
    pub extensions: Vec<EndpointService>,
}

impl PolicyInf for StaticPolicy {
    fn get_supported_addons(&self, _spec_id: &str) -> Result<Vec<String>, ParserError> {
        Ok(self.addons.clone())
    }

    fn get_supported_extensions(&self, _spec_id: &str) -> Result<Vec<EndpointService>, ParserError> {
        Ok(self.extensions.clone())
    }
}

/// Applies a policy granting the `archive` extension on every interface.
pub fn allow_archive(base: &BaseChainParser) {
    let policy = StaticPolicy {
        addons: vec![],
        extensions: ALL_API_INTERFACES
            .iter()
            .map(|api_interface| EndpointService {
                extension: "archive".to_string(),
                api_interface: api_interface.to_string(),
            })
            .collect(),
    };
    base.set_policy(&policy, "TEST1", base.api_interface()).expect("static policy cannot fail");
}

/// Builds a bare message for an indexed api, bypassing request parsing.
pub fn jsonrpc_message(base: &BaseChainParser, name: &str, connection_type: &str) -> ChainMessage {
    let container = base.get_supported_api(name, connection_type).expect("api is indexed");
    let api_collection = base.get_api_collection(&container.collection_key).expect("collection exists");
    ChainMessage::new(
        Arc::clone(&container.api),
        api_collection,
        RpcPayload::JsonRpc(JsonRpcRequest::new(name, None, Value::Number(1.into()))),
        NOT_APPLICABLE,
        NOT_APPLICABLE,
        vec![],
    )
}
