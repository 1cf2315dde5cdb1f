//! Extension engine.
//!
//! Extensions are orthogonal capabilities (e.g. `archive`) a message may
//! require from the provider serving it. The engine holds the extensions the
//! spec allows plus the subset the consumer's policy configured, and decides
//! per message which ones activate.

use ahash::{AHashMap, AHashSet};
use tracing::debug;

use crate::block::RequestedBlock;
use crate::spec::{Extension, ExtensionRule};

/// Identity of a configured extension: the extension name scoped to the
/// collection it was declared on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtensionKey {
    pub extension: String,
    pub connection_type: String,
    pub internal_path: String,
    pub addon: String,
}

/// Per-message inputs to extension resolution.
///
/// On the consumer side `latest_block` drives rule evaluation; on the
/// provider side `extension_override` replaces the set outright because the
/// consumer already decided. `additional_extensions` are appended after
/// either path (flag-forced extensions).
#[derive(Debug, Clone, Default)]
pub struct ExtensionInfo {
    pub latest_block: u64,
    pub extension_override: Option<Vec<String>>,
    pub additional_extensions: Option<Vec<String>>,
}

/// The message surface the engine needs: the requested block pair and a way
/// to attach an activated extension.
pub trait ExtensionsChainMessage {
    fn requested_block(&self) -> (i64, i64);
    fn set_extension(&mut self, extension: Extension);
}

/// Holds the spec-declared (allowed) and policy-configured extension sets.
///
/// `configured` is rebuilt wholesale on every policy update; no entry
/// survives from a previous policy.
#[derive(Debug, Default, Clone)]
pub struct ExtensionParser {
    allowed: AHashSet<String>,
    configured: AHashMap<ExtensionKey, Extension>,
}

impl ExtensionParser {
    pub fn new(allowed: AHashSet<String>) -> Self {
        Self { allowed, configured: AHashMap::new() }
    }

    pub fn allowed_extension(&self, extension: &str) -> bool {
        self.allowed.contains(extension)
    }

    /// Replaces the configured set (policy update).
    pub fn set_configured_extensions(&mut self, configured: AHashMap<ExtensionKey, Extension>) {
        self.configured = configured;
    }

    pub fn configured_extensions(&self) -> &AHashMap<ExtensionKey, Extension> {
        &self.configured
    }

    /// Activates every configured extension whose key matches the message's
    /// collection scope and whose rule passes. Matching extensions are
    /// orthogonal and activate simultaneously.
    pub fn extension_parsing<M: ExtensionsChainMessage>(
        &self,
        addon: &str,
        connection_type: &str,
        internal_path: &str,
        message: &mut M,
        latest_block: u64,
    ) {
        if self.configured.is_empty() {
            return;
        }
        let (_, earliest) = message.requested_block();
        let requested = RequestedBlock::from_raw(earliest);
        for (key, extension) in &self.configured {
            if key.connection_type != connection_type
                || key.internal_path != internal_path
                || key.addon != addon
            {
                continue;
            }
            if rule_applies(extension.rule, latest_block, requested) {
                debug!(extension = %extension.name, requested_block = earliest, "extension activated");
                message.set_extension(extension.clone());
            }
        }
    }

    /// Unconditionally replaces a message's extension set with the named
    /// extensions. Unknown or disallowed names are dropped silently.
    pub fn match_extensions(&self, names: &[String]) -> Vec<Extension> {
        let mut matched = Vec::new();
        for name in names {
            if name.is_empty() || !self.allowed_extension(name) {
                continue;
            }
            // Prefer the configured declaration so rule metadata travels
            // with the override.
            let extension = self
                .configured
                .values()
                .find(|extension| &extension.name == name)
                .cloned()
                .unwrap_or_else(|| Extension { name: name.clone(), rule: None });
            matched.push(extension);
        }
        matched
    }
}

/// Archive-distance rule: activate when the requested block sits at least
/// `min_distance` behind the head. Head-relative sentinels count as distance
/// zero; `earliest` is maximally distant and always activates.
fn rule_applies(rule: Option<ExtensionRule>, latest_block: u64, requested: RequestedBlock) -> bool {
    let Some(rule) = rule else {
        // An extension without a rule activates whenever it is configured.
        return true;
    };
    let distance = match requested {
        RequestedBlock::Number(n) => latest_block.saturating_sub(n),
        RequestedBlock::Earliest => latest_block,
        RequestedBlock::Latest
        | RequestedBlock::Pending
        | RequestedBlock::Safe
        | RequestedBlock::Finalized
        | RequestedBlock::NotApplicable => 0,
    };
    distance >= rule.min_distance
}
