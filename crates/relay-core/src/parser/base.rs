//! The shared chain parser state.
//!
//! Indexes a spec snapshot into lookup tables and serves every dialect's
//! common operations: api lookup, header handling, policy application,
//! verification retrieval and message validation. One reader-writer lock
//! guards the whole index; readers never hold it across I/O, writers
//! (`set_spec`, `set_policy`, `update_block_time`) rebuild state wholesale.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::extensions::{ExtensionInfo, ExtensionKey, ExtensionParser};
use crate::message::{ChainMessage, Metadata};
use crate::spec::{
    Api, ApiCollection, ApiKey, CollectionData, CollectionKey, FunctionTag, Header, HeaderKind,
    ParseDirective, Spec, VerificationContainer, VerificationKey, API_INTERFACE_REST,
};

use super::{EndpointService, ParserError, PolicyInf};

/// An indexed api with the key of the collection that declared it.
#[derive(Debug, Clone)]
pub struct ApiContainer {
    pub api: Arc<Api>,
    pub collection_key: CollectionKey,
}

/// A parse directive together with its declaring collection.
#[derive(Debug, Clone)]
pub struct TaggedContainer {
    pub parsing: ParseDirective,
    pub collection: Arc<ApiCollection>,
}

/// A REST api name precompiled into an anchored pattern; `{var}` segments
/// match any single path segment.
#[derive(Debug)]
struct RestApiPattern {
    pattern: Regex,
    api_key: ApiKey,
    /// The original templated name, kept for `{var}` parameter extraction.
    spec_path: String,
    container: ApiContainer,
}

/// Outcome of filtering relay headers against the spec's directives.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HandledHeaders {
    pub filtered: Vec<Metadata>,
    /// Value of the last `SET_LATEST_IN_METADATA` header seen, if any.
    pub overwrite_requested_block: Option<String>,
    pub ignored: Vec<Metadata>,
}

/// Classification of an endpoint's supported-services list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeparatedServices {
    pub addons: Vec<String>,
    pub extensions: Vec<String>,
    /// Entries that are neither addons nor extensions of this spec.
    pub invalid: Vec<String>,
}

/// Chain timing parameters exposed to routers and QoS bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainBlockStats {
    pub allowed_block_lag_for_qos_sync: i64,
    pub average_block_time: Duration,
    pub block_distance_for_finalized_data: u32,
    pub blocks_in_finalization_proof: u32,
}

#[derive(Default)]
struct ParserIndex {
    spec_index: String,
    spec_enabled: bool,
    average_block_time_ms: i64,
    allowed_block_lag_for_qos_sync: i64,
    block_distance_for_finalized_data: u32,
    blocks_in_finalization_proof: u32,
    data_reliability_enabled: bool,
    reliability_threshold: u32,
    server_apis: AHashMap<ApiKey, ApiContainer>,
    rest_apis: Vec<RestApiPattern>,
    api_collections: AHashMap<CollectionKey, Arc<ApiCollection>>,
    tagged_apis: AHashMap<FunctionTag, TaggedContainer>,
    headers: AHashMap<ApiKey, Header>,
    verifications: AHashMap<VerificationKey, Vec<VerificationContainer>>,
    allowed_addons: AHashMap<String, bool>,
    extension_parser: ExtensionParser,
}

/// Spec-indexed parser state shared by all four dialects.
pub struct BaseChainParser {
    api_interface: &'static str,
    index: RwLock<ParserIndex>,
    active: AtomicBool,
}

impl BaseChainParser {
    pub fn new(api_interface: &'static str) -> Self {
        Self { api_interface, index: RwLock::new(ParserIndex::default()), active: AtomicBool::new(false) }
    }

    pub fn api_interface(&self) -> &'static str {
        self.api_interface
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Replaces the spec snapshot, rebuilding every lookup table under the
    /// writer lock. Requests observe either the old index or the new one,
    /// never a mix.
    pub fn set_spec(&self, spec: Spec) {
        let rebuilt = index_spec(&spec, self.api_interface);
        let mut index = self.index.write();
        *index = rebuilt;
    }

    pub fn spec_index(&self) -> String {
        self.index.read().spec_index.clone()
    }

    pub fn spec_enabled(&self) -> bool {
        self.index.read().spec_enabled
    }

    pub fn update_block_time(&self, new_block_time: Duration) {
        let mut index = self.index.write();
        info!(
            spec = %index.spec_index,
            old_ms = index.average_block_time_ms,
            new_ms = new_block_time.as_millis() as i64,
            "chain parser updated block time"
        );
        index.average_block_time_ms = new_block_time.as_millis() as i64;
    }

    /// Whether data-reliability sampling is on for this chain, and its
    /// probability threshold.
    pub fn data_reliability_params(&self) -> (bool, u32) {
        let index = self.index.read();
        (index.data_reliability_enabled, index.reliability_threshold)
    }

    pub fn chain_block_stats(&self) -> ChainBlockStats {
        let index = self.index.read();
        ChainBlockStats {
            allowed_block_lag_for_qos_sync: index.allowed_block_lag_for_qos_sync,
            average_block_time: Duration::from_millis(index.average_block_time_ms.max(0) as u64),
            block_distance_for_finalized_data: index.block_distance_for_finalized_data,
            blocks_in_finalization_proof: index.blocks_in_finalization_proof,
        }
    }

    /// Fetches an api container by exact name. REST lookups go through
    /// [`Self::get_supported_api_rest`] instead.
    pub fn get_supported_api(
        &self,
        name: &str,
        connection_type: &str,
    ) -> Result<ApiContainer, ParserError> {
        let index = self.index.read();
        let container = index
            .server_apis
            .get(&ApiKey { name: name.to_string(), connection_type: connection_type.to_string() })
            .ok_or_else(|| {
                debug!(name, connection_type, "api not supported");
                ParserError::ApiNotSupported {
                    name: name.to_string(),
                    connection_type: connection_type.to_string(),
                }
            })?;
        if !container.api.enabled {
            return Err(ParserError::ApiDisabled {
                name: name.to_string(),
                connection_type: connection_type.to_string(),
            });
        }
        Ok(container.clone())
    }

    /// Matches an incoming URL path against the precompiled REST patterns in
    /// spec order; returns the container and the templated spec path.
    pub fn get_supported_api_rest(
        &self,
        path: &str,
        connection_type: &str,
    ) -> Result<(ApiContainer, String), ParserError> {
        let index = self.index.read();
        let mut found_on_other_connection_type: Option<&str> = None;
        for entry in &index.rest_apis {
            if !entry.pattern.is_match(path) {
                continue;
            }
            if entry.api_key.connection_type != connection_type {
                found_on_other_connection_type = Some(&entry.api_key.connection_type);
                continue;
            }
            if !entry.container.api.enabled {
                return Err(ParserError::ApiDisabled {
                    name: path.to_string(),
                    connection_type: connection_type.to_string(),
                });
            }
            return Ok((entry.container.clone(), entry.spec_path.clone()));
        }
        if let Some(other) = found_on_other_connection_type {
            warn!(
                requested_api = path,
                connection_type_requested = connection_type,
                connection_type_found = other,
                "api was found on a different connection type"
            );
        }
        Err(ParserError::ApiNotSupported {
            name: path.to_string(),
            connection_type: connection_type.to_string(),
        })
    }

    pub fn get_api_collection(&self, key: &CollectionKey) -> Result<Arc<ApiCollection>, ParserError> {
        let index = self.index.read();
        index.api_collections.get(key).cloned().ok_or_else(|| ParserError::ApiNotSupported {
            name: key.internal_path.clone(),
            connection_type: key.connection_type.clone(),
        })
    }

    pub fn get_parsing_by_tag(&self, tag: FunctionTag) -> Option<(ParseDirective, CollectionData)> {
        let index = self.index.read();
        index
            .tagged_apis
            .get(&tag)
            .map(|tagged| (tagged.parsing.clone(), tagged.collection.collection_data.clone()))
    }

    /// Filters relay headers by the spec's directives for one direction.
    ///
    /// Unknown headers are dropped, `pass_ignore` headers are set aside, and
    /// a `SET_LATEST_IN_METADATA` header surfaces its value as the requested
    /// block overwrite (last one wins).
    pub fn handle_headers(
        &self,
        metadata: &[Metadata],
        api_collection: &ApiCollection,
        direction: HeaderKind,
    ) -> HandledHeaders {
        if metadata.is_empty() {
            return HandledHeaders::default();
        }
        let index = self.index.read();
        let mut handled = HandledHeaders::default();
        for header in metadata {
            let api_key = ApiKey {
                name: header.name.to_lowercase(),
                connection_type: api_collection.collection_data.connection_type.clone(),
            };
            let Some(directive) = index.headers.get(&api_key) else {
                // not a header this spec handles
                continue;
            };
            if directive.kind == direction || directive.kind == HeaderKind::PassBoth {
                if directive.function_tag == Some(FunctionTag::SetLatestInMetadata) {
                    handled.overwrite_requested_block = Some(header.value.clone());
                }
                handled.filtered.push(header.clone());
            } else if directive.kind == HeaderKind::PassIgnore {
                handled.ignored.push(header.clone());
            }
        }
        handled
    }

    /// Applies a consumer policy: queries the supported addons and
    /// (interface-relevant) extensions, then rebuilds the configured
    /// extension table and the addon allowlist under the writer lock.
    pub fn set_policy(
        &self,
        policy: &dyn PolicyInf,
        chain_id: &str,
        api_interface: &str,
    ) -> Result<(), ParserError> {
        let addons = policy.get_supported_addons(chain_id)?;
        let extensions = policy.get_supported_extensions(chain_id)?;
        let mut allowed: AHashSet<String> = addons.into_iter().collect();
        allowed.extend(
            extensions
                .into_iter()
                .filter(|service: &EndpointService| service.api_interface == api_interface)
                .map(|service| service.extension),
        );
        self.set_policy_from_services(&allowed);
        Ok(())
    }

    fn set_policy_from_services(&self, allowed: &AHashSet<String>) {
        let mut index = self.index.write();
        debug!(spec = %index.spec_index, services = ?allowed, "applying consumer policy");
        // Rebuild from scratch so no entry of a previous policy survives.
        let mut configured: AHashMap<ExtensionKey, crate::spec::Extension> = AHashMap::new();
        for (collection_key, api_collection) in &index.api_collections {
            for extension in &api_collection.extensions {
                if extension.name.is_empty() || !allowed.contains(&extension.name) {
                    continue;
                }
                configured.insert(
                    ExtensionKey {
                        extension: extension.name.clone(),
                        connection_type: collection_key.connection_type.clone(),
                        internal_path: collection_key.internal_path.clone(),
                        addon: collection_key.addon.clone(),
                    },
                    extension.clone(),
                );
            }
        }
        index.extension_parser.set_configured_extensions(configured);
        for (addon, enabled) in index.allowed_addons.iter_mut() {
            *enabled = allowed.contains(addon);
        }
    }

    /// Splits an endpoint's supported-services list into addons and
    /// extensions. Empty strings and duplicates are discarded; unknown
    /// entries are collected rather than aborting.
    pub fn separate_addons_extensions(&self, supported: &[String]) -> SeparatedServices {
        let index = self.index.read();
        let mut separated = SeparatedServices::default();
        let mut checked: AHashSet<&str> = AHashSet::new();
        for entry in supported {
            if !checked.insert(entry.as_str()) {
                continue;
            }
            if index.allowed_addons.contains_key(entry) {
                separated.addons.push(entry.clone());
            } else if entry.is_empty() {
                continue;
            } else if index.extension_parser.allowed_extension(entry) {
                separated.extensions.push(entry.clone());
            } else {
                warn!(spec = %index.spec_index, supported = %entry, "supported item is neither an addon nor an extension");
                separated.invalid.push(entry.clone());
            }
        }
        separated
    }

    /// All verifications an endpoint supporting the given addons and
    /// extensions must pass: the union over the Cartesian product of
    /// `(addons ∪ {""}) × (extensions ∪ {""})`, without deduplication.
    pub fn get_verifications(&self, supported: &[String]) -> Vec<VerificationContainer> {
        let separated = self.separate_addons_extensions(supported);
        let mut addons = separated.addons;
        addons.push(String::new());
        let mut extensions = separated.extensions;
        extensions.push(String::new());

        let index = self.index.read();
        let mut verifications = Vec::new();
        for addon in &addons {
            for extension in &extensions {
                let key = VerificationKey { extension: extension.clone(), addon: addon.clone() };
                if let Some(found) = index.verifications.get(&key) {
                    verifications.extend(found.iter().cloned());
                }
            }
        }
        verifications
    }

    /// Confirms the message's addon is allowed by the active policy. The
    /// extension engine already filtered extensions at construction, so only
    /// addon validation happens here.
    pub fn validate(&self, message: &ChainMessage) -> Result<(), ParserError> {
        let addon = message.addon();
        if addon.is_empty() {
            return Ok(());
        }
        let index = self.index.read();
        if !index.allowed_addons.get(addon).copied().unwrap_or(false) {
            return Err(ParserError::AddonNotAllowed(addon.to_string()));
        }
        Ok(())
    }

    /// Resolves the message's extension set: rule evaluation on the consumer
    /// side, an unconditional override on the provider side, plus any
    /// flag-forced additions afterwards.
    pub fn extension_parsing(
        &self,
        addon: &str,
        message: &mut ChainMessage,
        extension_info: &ExtensionInfo,
    ) {
        let (connection_type, internal_path) = {
            let data = &message.api_collection().collection_data;
            (data.connection_type.clone(), data.internal_path.clone())
        };
        let index = self.index.read();
        match &extension_info.extension_override {
            None => index.extension_parser.extension_parsing(
                addon,
                &connection_type,
                &internal_path,
                message,
                extension_info.latest_block,
            ),
            Some(names) => message.override_extensions(names, &index.extension_parser),
        }
        if let Some(additional) = &extension_info.additional_extensions {
            for extension in index.extension_parser.match_extensions(additional) {
                use crate::extensions::ExtensionsChainMessage;
                message.set_extension(extension);
            }
        }
    }

    pub fn allowed_addons(&self) -> AHashMap<String, bool> {
        self.index.read().allowed_addons.clone()
    }

    pub fn configured_extension_keys(&self) -> Vec<ExtensionKey> {
        self.index.read().extension_parser.configured_extensions().keys().cloned().collect()
    }
}

/// REST api names declare `{var}` path parameters; a pattern matches one
/// concrete path segment in their place, the rest of the name literally.
fn compile_rest_pattern(name: &str) -> Result<(String, Regex), regex::Error> {
    const MARKER: &str = "\u{1}segment\u{1}";
    let template = Regex::new(r"\{[^}]+\}").expect("static pattern");
    let replaced = template.replace_all(name, MARKER);
    let quoted = regex::escape(&replaced);
    let processed = quoted.replace(&regex::escape(MARKER), r"[^\/\s]+");
    let compiled = Regex::new(&format!("^{processed}$"))?;
    Ok((processed, compiled))
}

fn index_spec(spec: &Spec, api_interface: &str) -> ParserIndex {
    let mut index = ParserIndex {
        spec_index: spec.index.clone(),
        spec_enabled: spec.enabled,
        average_block_time_ms: spec.average_block_time,
        allowed_block_lag_for_qos_sync: spec.allowed_block_lag_for_qos_sync,
        block_distance_for_finalized_data: spec.block_distance_for_finalized_data,
        blocks_in_finalization_proof: spec.blocks_in_finalization_proof,
        data_reliability_enabled: spec.data_reliability_enabled,
        reliability_threshold: spec.reliability_threshold,
        ..ParserIndex::default()
    };
    if !spec.enabled {
        return index;
    }
    let mut allowed_extensions: AHashSet<String> = AHashSet::new();
    for api_collection in &spec.api_collections {
        if !api_collection.enabled {
            continue;
        }
        if api_collection.collection_data.api_interface != api_interface {
            continue;
        }
        let collection = Arc::new(api_collection.clone());
        let collection_key = CollectionKey::of(&collection);

        for parsing in &collection.parse_directives {
            index.tagged_apis.insert(
                parsing.function_tag,
                TaggedContainer { parsing: parsing.clone(), collection: Arc::clone(&collection) },
            );
        }

        for api in &collection.apis {
            let container =
                ApiContainer { api: Arc::new(api.clone()), collection_key: collection_key.clone() };
            if api_interface == API_INTERFACE_REST {
                match compile_rest_pattern(&api.name) {
                    Ok((processed, pattern)) => index.rest_apis.push(RestApiPattern {
                        pattern,
                        api_key: ApiKey {
                            name: processed,
                            connection_type: collection_key.connection_type.clone(),
                        },
                        spec_path: api.name.clone(),
                        container,
                    }),
                    Err(error) => {
                        warn!(api = %api.name, %error, "failed compiling rest api pattern, skipping");
                    }
                }
            } else {
                index.server_apis.insert(
                    ApiKey {
                        name: api.name.clone(),
                        connection_type: collection_key.connection_type.clone(),
                    },
                    container,
                );
            }
        }

        for header in &collection.headers {
            index.headers.insert(
                ApiKey {
                    name: header.name.to_lowercase(),
                    connection_type: collection_key.connection_type.clone(),
                },
                header.clone(),
            );
        }

        for verification in &collection.verifications {
            for parse_value in &verification.values {
                let verification_key = VerificationKey {
                    extension: parse_value.extension.clone(),
                    addon: collection.collection_data.addon.clone(),
                };
                index.verifications.entry(verification_key.clone()).or_default().push(
                    VerificationContainer {
                        connection_type: collection.collection_data.connection_type.clone(),
                        name: verification.name.clone(),
                        parse_directive: verification.parse_directive.clone(),
                        value: parse_value.expected_value.clone(),
                        latest_distance: parse_value.latest_distance,
                        severity: verification.severity,
                        verification_key,
                    },
                );
            }
        }

        for extension in &collection.extensions {
            allowed_extensions.insert(extension.name.clone());
        }
        index.allowed_addons.insert(collection.collection_data.addon.clone(), false);

        index.api_collections.insert(collection_key, collection);
    }
    index.extension_parser = ExtensionParser::new(allowed_extensions);
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::API_INTERFACE_JSONRPC;
    use crate::testutil;

    fn jsonrpc_parser() -> BaseChainParser {
        let parser = BaseChainParser::new(API_INTERFACE_JSONRPC);
        parser.set_spec(testutil::test_spec());
        parser
    }

    fn rest_parser() -> BaseChainParser {
        let parser = BaseChainParser::new(API_INTERFACE_REST);
        parser.set_spec(testutil::test_spec());
        parser
    }

    #[test]
    fn indexed_apis_reference_existing_collections() {
        let parser = jsonrpc_parser();
        let index = parser.index.read();
        for container in index.server_apis.values() {
            assert!(
                index.api_collections.contains_key(&container.collection_key),
                "api {} points at a missing collection",
                container.api.name
            );
        }
    }

    #[test]
    fn every_enabled_api_resolves_to_its_collection_key() {
        let spec = testutil::test_spec();
        let parser = jsonrpc_parser();
        for collection in
            spec.api_collections.iter().filter(|c| c.enabled && c.collection_data.api_interface == API_INTERFACE_JSONRPC)
        {
            for api in collection.apis.iter().filter(|a| a.enabled) {
                let container = parser
                    .get_supported_api(&api.name, &collection.collection_data.connection_type)
                    .unwrap();
                assert_eq!(container.collection_key, CollectionKey::of(collection));
            }
        }
    }

    #[test]
    fn unknown_api_is_not_supported() {
        let parser = jsonrpc_parser();
        let err = parser.get_supported_api("eth_unknown", "POST").unwrap_err();
        assert!(matches!(err, ParserError::ApiNotSupported { .. }));
    }

    #[test]
    fn disabled_api_is_reported_disabled() {
        let parser = jsonrpc_parser();
        let err = parser.get_supported_api("eth_disabledCall", "POST").unwrap_err();
        assert!(matches!(err, ParserError::ApiDisabled { .. }));
    }

    #[test]
    fn disabled_collections_are_skipped() {
        let parser = jsonrpc_parser();
        let err = parser.get_supported_api("eth_fromDisabledCollection", "POST").unwrap_err();
        assert!(matches!(err, ParserError::ApiNotSupported { .. }));
    }

    #[test]
    fn rest_pattern_matches_exact_segment_count() {
        let parser = rest_parser();
        let (container, spec_path) = parser
            .get_supported_api_rest("/cosmos/bank/v1beta1/balances/lava1xyz", "GET")
            .unwrap();
        assert_eq!(spec_path, "/cosmos/bank/v1beta1/balances/{address}");
        assert!(container.api.enabled);

        // An extra path suffix must not match the templated pattern.
        assert!(parser
            .get_supported_api_rest("/cosmos/bank/v1beta1/balances/lava1xyz/by-denom/uatom", "GET")
            .is_err());
    }

    #[test]
    fn handle_headers_filters_by_direction() {
        let parser = rest_parser();
        let collection = parser
            .get_api_collection(&CollectionKey {
                connection_type: "GET".to_string(),
                internal_path: String::new(),
                addon: String::new(),
            })
            .unwrap();
        let metadata = vec![
            Metadata { name: "X-Cosmos-Block-Height".to_string(), value: "42".to_string() },
            Metadata { name: "x-unknown".to_string(), value: "drop-me".to_string() },
            Metadata { name: "x-noisy".to_string(), value: "aside".to_string() },
        ];
        let handled = parser.handle_headers(&metadata, &collection, HeaderKind::PassSend);
        assert_eq!(handled.overwrite_requested_block.as_deref(), Some("42"));
        assert_eq!(handled.filtered.len(), 1);
        assert_eq!(handled.filtered[0].name, "X-Cosmos-Block-Height");
        assert_eq!(handled.ignored.len(), 1);
        assert_eq!(handled.ignored[0].name, "x-noisy");
    }

    #[test]
    fn handle_headers_union_covers_pass_both() {
        let parser = jsonrpc_parser();
        let collection = parser
            .get_api_collection(&CollectionKey {
                connection_type: "POST".to_string(),
                internal_path: String::new(),
                addon: String::new(),
            })
            .unwrap();
        let metadata = vec![
            Metadata { name: "x-both-ways".to_string(), value: "1".to_string() },
            Metadata { name: "x-reply-only".to_string(), value: "2".to_string() },
            Metadata { name: "x-unknown".to_string(), value: "3".to_string() },
        ];
        let sent = parser.handle_headers(&metadata, &collection, HeaderKind::PassSend);
        let replied = parser.handle_headers(&metadata, &collection, HeaderKind::PassReply);
        let union: Vec<&str> = sent
            .filtered
            .iter()
            .chain(replied.filtered.iter())
            .map(|h| h.name.as_str())
            .collect();
        assert!(union.contains(&"x-both-ways"));
        assert!(union.contains(&"x-reply-only"));
        assert!(!union.contains(&"x-unknown"));
    }

    #[test]
    fn set_policy_narrows_addons_and_rebuilds_extensions() {
        let parser = jsonrpc_parser();
        let policy = testutil::StaticPolicy {
            addons: vec!["debug".to_string()],
            extensions: vec![EndpointService {
                extension: "archive".to_string(),
                api_interface: API_INTERFACE_JSONRPC.to_string(),
            }],
        };
        parser.set_policy(&policy, "TEST1", API_INTERFACE_JSONRPC).unwrap();

        let addons = parser.allowed_addons();
        assert_eq!(addons.get("debug"), Some(&true));
        assert_eq!(addons.get(""), Some(&false));
        assert_eq!(parser.configured_extension_keys().len(), 1);

        // Narrowing the policy removes previously configured entries.
        let narrowed = testutil::StaticPolicy { addons: vec![], extensions: vec![] };
        parser.set_policy(&narrowed, "TEST1", API_INTERFACE_JSONRPC).unwrap();
        assert_eq!(parser.allowed_addons().get("debug"), Some(&false));
        assert!(parser.configured_extension_keys().is_empty());
    }

    #[test]
    fn set_policy_is_idempotent() {
        let parser = jsonrpc_parser();
        let policy = testutil::StaticPolicy {
            addons: vec!["debug".to_string()],
            extensions: vec![EndpointService {
                extension: "archive".to_string(),
                api_interface: API_INTERFACE_JSONRPC.to_string(),
            }],
        };
        parser.set_policy(&policy, "TEST1", API_INTERFACE_JSONRPC).unwrap();
        let addons_first = parser.allowed_addons();
        let mut keys_first = parser.configured_extension_keys();
        parser.set_policy(&policy, "TEST1", API_INTERFACE_JSONRPC).unwrap();
        let addons_second = parser.allowed_addons();
        let mut keys_second = parser.configured_extension_keys();
        keys_first.sort_by(|a, b| a.extension.cmp(&b.extension));
        keys_second.sort_by(|a, b| a.extension.cmp(&b.extension));
        assert_eq!(addons_first, addons_second);
        assert_eq!(keys_first, keys_second);
    }

    #[test]
    fn policy_extensions_filtered_by_api_interface() {
        let parser = jsonrpc_parser();
        let policy = testutil::StaticPolicy {
            addons: vec![],
            extensions: vec![EndpointService {
                extension: "archive".to_string(),
                api_interface: API_INTERFACE_REST.to_string(),
            }],
        };
        parser.set_policy(&policy, "TEST1", API_INTERFACE_JSONRPC).unwrap();
        assert!(parser.configured_extension_keys().is_empty());
    }

    #[test]
    fn separate_addons_extensions_classifies_and_keeps_going() {
        let parser = jsonrpc_parser();
        let separated = parser.separate_addons_extensions(&[
            "archive".to_string(),
            "debug".to_string(),
            "unknownX".to_string(),
            "archive".to_string(),
            String::new(),
        ]);
        assert_eq!(separated.addons, vec!["debug"]);
        assert_eq!(separated.extensions, vec!["archive"]);
        assert_eq!(separated.invalid, vec!["unknownX"]);
    }

    #[test]
    fn get_verifications_covers_the_default_keys() {
        let parser = jsonrpc_parser();
        let verifications = parser.get_verifications(&[
            "archive".to_string(),
            "debug".to_string(),
            "unknownX".to_string(),
        ]);
        // The test spec declares one verification under ("", "") and one
        // under ("archive", "debug").
        let keys: Vec<&VerificationKey> =
            verifications.iter().map(|v| &v.verification_key).collect();
        assert!(keys.iter().any(|k| k.extension.is_empty() && k.addon.is_empty()));
        assert!(keys.iter().any(|k| k.extension == "archive" && k.addon == "debug"));
    }

    #[test]
    fn validate_follows_the_policy() {
        let parser = jsonrpc_parser();
        let message = testutil::jsonrpc_message(&parser, "eth_debugCall", "POST");
        assert!(matches!(parser.validate(&message), Err(ParserError::AddonNotAllowed(_))));

        let policy =
            testutil::StaticPolicy { addons: vec!["debug".to_string()], extensions: vec![] };
        parser.set_policy(&policy, "TEST1", API_INTERFACE_JSONRPC).unwrap();
        assert!(parser.validate(&message).is_ok());

        // Addon-less messages always validate.
        let plain = testutil::jsonrpc_message(&parser, "eth_blockNumber", "POST");
        assert!(parser.validate(&plain).is_ok());
    }

    #[test]
    fn tagged_directives_are_indexed() {
        let parser = jsonrpc_parser();
        let (directive, collection_data) =
            parser.get_parsing_by_tag(FunctionTag::GetBlocknum).unwrap();
        assert_eq!(directive.api_name, "eth_blockNumber");
        assert_eq!(collection_data.api_interface, API_INTERFACE_JSONRPC);
        assert!(parser.get_parsing_by_tag(FunctionTag::GetBlockhash).is_none());
    }

    #[test]
    fn activation_flag() {
        let parser = jsonrpc_parser();
        assert!(!parser.active());
        parser.activate();
        assert!(parser.active());
    }
}
