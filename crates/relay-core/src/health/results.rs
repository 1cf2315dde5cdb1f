//! Thread-safe aggregation of health probe outcomes.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::spec::Spec;

/// Identity of one probed service: provider address, chain and interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LavaEntity {
    pub address: String,
    pub spec_id: String,
    pub api_interface: String,
}

impl fmt::Display for LavaEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.spec_id.is_empty() && self.api_interface.is_empty() {
            return write!(f, "{}", self.address);
        }
        write!(f, "{} | {} | {}", self.address, self.spec_id, self.api_interface)
    }
}

/// Successful probe data for one service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyData {
    pub block: i64,
    pub latency: Duration,
}

/// Consumer subscription standing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SubscriptionData {
    pub full_months_left: u64,
    pub usage_percentage_left_this_month: f64,
    pub duration_left: Duration,
}

#[derive(Default)]
struct Inner {
    latest_blocks: HashMap<String, i64>,
    provider_data: HashMap<LavaEntity, ReplyData>,
    unhealthy_providers: HashMap<LavaEntity, String>,
    frozen_providers: HashSet<LavaEntity>,
    subscriptions: HashMap<String, SubscriptionData>,
    specs: HashMap<String, Arc<Spec>>,
}

/// Probe results for an entire run, safe for concurrent writers. Callers
/// read snapshots only after the probing tasks have completed.
#[derive(Default)]
pub struct HealthResults {
    inner: Mutex<Inner>,
}

impl HealthResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_spec(&self, spec: Arc<Spec>) {
        self.inner.lock().specs.insert(spec.index.clone(), spec);
    }

    pub fn get_spec(&self, spec_id: &str) -> Option<Arc<Spec>> {
        self.inner.lock().specs.get(spec_id).cloned()
    }

    pub fn spec_ids(&self) -> Vec<String> {
        self.inner.lock().specs.keys().cloned().collect()
    }

    /// Overwrites the service's probe data.
    pub fn set_provider_data(&self, entity: LavaEntity, data: ReplyData) {
        self.inner.lock().provider_data.insert(entity, data);
    }

    pub fn get_provider_data(&self, entity: &LavaEntity) -> Option<ReplyData> {
        self.inner.lock().provider_data.get(entity).copied()
    }

    /// Marks a service unhealthy. Frozen providers stay frozen; repeated
    /// calls keep the latest reason.
    pub fn set_unhealthy_provider(&self, entity: LavaEntity, reason: String) {
        let mut inner = self.inner.lock();
        if inner.frozen_providers.contains(&entity) {
            return;
        }
        inner.unhealthy_providers.insert(entity, reason);
    }

    /// Marks a provider frozen; freezing wins over (and clears) any
    /// unhealthy reason.
    pub fn freeze_provider(&self, entity: LavaEntity) {
        let mut inner = self.inner.lock();
        inner.unhealthy_providers.remove(&entity);
        inner.frozen_providers.insert(entity);
    }

    pub fn is_frozen(&self, entity: &LavaEntity) -> bool {
        self.inner.lock().frozen_providers.contains(entity)
    }

    /// Keeps the maximum block seen for the chain.
    pub fn update_latest_block(&self, spec_id: &str, block: i64) {
        let mut inner = self.inner.lock();
        let entry = inner.latest_blocks.entry(spec_id.to_string()).or_insert(block);
        if block > *entry {
            *entry = block;
        }
    }

    pub fn latest_block(&self, spec_id: &str) -> Option<i64> {
        self.inner.lock().latest_blocks.get(spec_id).copied()
    }

    pub fn set_subscription_data(&self, address: String, data: SubscriptionData) {
        self.inner.lock().subscriptions.insert(address, data);
    }

    pub fn subscription_data(&self, address: &str) -> Option<SubscriptionData> {
        self.inner.lock().subscriptions.get(address).copied()
    }

    pub fn unhealthy_providers(&self) -> HashMap<LavaEntity, String> {
        self.inner.lock().unhealthy_providers.clone()
    }

    pub fn frozen_providers(&self) -> HashSet<LavaEntity> {
        self.inner.lock().frozen_providers.clone()
    }

    pub fn provider_data(&self) -> HashMap<LavaEntity, ReplyData> {
        self.inner.lock().provider_data.clone()
    }
}
