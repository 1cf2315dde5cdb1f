//! Provider metrics.
//!
//! Dual-path recording: lock-free Prometheus series via the `metrics` facade
//! for scraping, plus internal tallies for tests and admin introspection.
//! Series names and labels are part of the operational contract and must not
//! change.

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;
use tracing::warn;

use crate::spec::ALL_API_INTERFACES;
use crate::version::version_to_integer;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global Prometheus recorder once and returns the render
/// handle backing `GET /metrics`.
pub fn install_recorder() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("prometheus recorder installs once at startup")
        })
        .clone()
}

/// Per-(spec, api interface) relay metrics for a provider process.
#[derive(Default)]
pub struct ProviderMetricsManager {
    registered: DashMap<(String, String), ()>,
    relays_serviced: DashMap<(String, String), u64>,
    cu_serviced: DashMap<(String, String), u64>,
    errored: DashMap<(String, String), u64>,
    cu_paid: DashMap<String, u64>,
    latest_blocks: DashMap<String, i64>,
    protocol_version: Mutex<Option<(String, u64)>>,
}

impl ProviderMetricsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a chain/interface pair so payments and relays can find it.
    pub fn add_provider_metrics(&self, spec_id: &str, api_interface: &str) {
        self.registered.insert((spec_id.to_string(), api_interface.to_string()), ());
    }

    pub fn is_registered(&self, spec_id: &str, api_interface: &str) -> bool {
        self.registered.contains_key(&(spec_id.to_string(), api_interface.to_string()))
    }

    /// Records one serviced relay and its compute units.
    pub fn add_relay(&self, spec_id: &str, api_interface: &str, compute_units: u64) {
        let key = (spec_id.to_string(), api_interface.to_string());
        *self.relays_serviced.entry(key.clone()).or_insert(0) += 1;
        *self.cu_serviced.entry(key).or_insert(0) += compute_units;
        counter!(
            "lava_provider_total_relays_serviced",
            "spec" => spec_id.to_string(),
            "apiInterface" => api_interface.to_string()
        )
        .increment(1);
        counter!(
            "lava_provider_total_cu_serviced",
            "spec" => spec_id.to_string(),
            "apiInterface" => api_interface.to_string()
        )
        .increment(compute_units);
    }

    pub fn add_error(&self, spec_id: &str, api_interface: &str) {
        let key = (spec_id.to_string(), api_interface.to_string());
        *self.errored.entry(key).or_insert(0) += 1;
        counter!(
            "lava_provider_total_errored",
            "spec" => spec_id.to_string(),
            "apiInterface" => api_interface.to_string()
        )
        .increment(1);
    }

    /// Records a payment for a chain. The paid-CU series is keyed by spec
    /// only, so the interface loop stops at the first registered pair: one
    /// payment, one increment, however many interfaces serve the chain.
    pub fn add_payment(&self, spec_id: &str, compute_units: u64) {
        for api_interface in ALL_API_INTERFACES {
            if self.is_registered(spec_id, api_interface) {
                *self.cu_paid.entry(spec_id.to_string()).or_insert(0) += compute_units;
                counter!("lava_provider_total_cu_paid", "spec" => spec_id.to_string())
                    .increment(compute_units);
                break;
            }
        }
    }

    pub fn set_qos(&self, spec_id: &str, consumer_address: &str, qos_metric: &str, value: f64) {
        gauge!(
            "lava_consumer_QoS",
            "spec" => spec_id.to_string(),
            "consumer_address" => consumer_address.to_string(),
            "qos_metric" => qos_metric.to_string()
        )
        .set(value);
    }

    /// Updates the chain's latest serviced block and stamps the update time.
    pub fn set_latest_block(&self, spec_id: &str, block: u64) {
        self.latest_blocks.insert(spec_id.to_string(), block as i64);
        gauge!("lava_latest_block", "spec" => spec_id.to_string()).set(block as f64);
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
        gauge!(
            "lava_provider_last_serviced_block_update_time_seconds",
            "spec" => spec_id.to_string()
        )
        .set(now);
    }

    pub fn set_disabled_chain(&self, spec_id: &str, api_interface: &str) {
        gauge!(
            "lava_provider_disabled_chains",
            "chainID" => spec_id.to_string(),
            "apiInterface" => api_interface.to_string()
        )
        .set(1.0);
    }

    pub fn set_enabled_chain(&self, spec_id: &str, api_interface: &str) {
        gauge!(
            "lava_provider_disabled_chains",
            "chainID" => spec_id.to_string(),
            "apiInterface" => api_interface.to_string()
        )
        .set(0.0);
    }

    pub fn set_latest_block_fetch_error(&self, spec_id: &str) {
        counter!("lava_provider_fetch_latest_fails", "spec" => spec_id.to_string()).increment(1);
    }

    pub fn set_latest_block_fetch_success(&self, spec_id: &str) {
        counter!("lava_provider_fetch_latest_success", "spec" => spec_id.to_string()).increment(1);
    }

    pub fn set_specific_block_fetch_error(&self, spec_id: &str) {
        counter!("lava_provider_fetch_block_fails", "spec" => spec_id.to_string()).increment(1);
    }

    pub fn set_specific_block_fetch_success(&self, spec_id: &str) {
        counter!("lava_provider_fetch_block_success", "spec" => spec_id.to_string()).increment(1);
    }

    pub fn set_virtual_epoch(&self, spec_id: &str, virtual_epoch: u64) {
        gauge!("virtual_epoch", "spec" => spec_id.to_string()).set(virtual_epoch as f64);
    }

    /// Publishes the running protocol version, encoded for comparison.
    pub fn set_version(&self, version: &str) {
        match version_to_integer(version) {
            Ok(encoded) => {
                *self.protocol_version.lock() = Some((version.to_string(), encoded));
                gauge!("lava_provider_protocol_version", "version" => version.to_string())
                    .set(encoded as f64);
            }
            Err(error) => warn!(%version, %error, "refusing to publish malformed protocol version"),
        }
    }

    pub fn protocol_version(&self) -> Option<(String, u64)> {
        self.protocol_version.lock().clone()
    }

    pub fn relays_serviced(&self, spec_id: &str, api_interface: &str) -> u64 {
        self.relays_serviced
            .get(&(spec_id.to_string(), api_interface.to_string()))
            .map(|entry| *entry)
            .unwrap_or(0)
    }

    pub fn cu_serviced(&self, spec_id: &str, api_interface: &str) -> u64 {
        self.cu_serviced
            .get(&(spec_id.to_string(), api_interface.to_string()))
            .map(|entry| *entry)
            .unwrap_or(0)
    }

    pub fn errored(&self, spec_id: &str, api_interface: &str) -> u64 {
        self.errored
            .get(&(spec_id.to_string(), api_interface.to_string()))
            .map(|entry| *entry)
            .unwrap_or(0)
    }

    pub fn cu_paid(&self, spec_id: &str) -> u64 {
        self.cu_paid.get(spec_id).map(|entry| *entry).unwrap_or(0)
    }

    pub fn latest_block(&self, spec_id: &str) -> Option<i64> {
        self.latest_blocks.get(spec_id).map(|entry| *entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{API_INTERFACE_JSONRPC, API_INTERFACE_REST};

    #[test]
    fn relay_accounting_accumulates() {
        let manager = ProviderMetricsManager::new();
        manager.add_provider_metrics("ETH1", API_INTERFACE_JSONRPC);
        manager.add_relay("ETH1", API_INTERFACE_JSONRPC, 10);
        manager.add_relay("ETH1", API_INTERFACE_JSONRPC, 20);
        manager.add_error("ETH1", API_INTERFACE_JSONRPC);
        assert_eq!(manager.relays_serviced("ETH1", API_INTERFACE_JSONRPC), 2);
        assert_eq!(manager.cu_serviced("ETH1", API_INTERFACE_JSONRPC), 30);
        assert_eq!(manager.errored("ETH1", API_INTERFACE_JSONRPC), 1);
        assert_eq!(manager.relays_serviced("ETH1", API_INTERFACE_REST), 0);
    }

    #[test]
    fn payment_counts_once_across_interfaces() {
        let manager = ProviderMetricsManager::new();
        manager.add_provider_metrics("LAV1", API_INTERFACE_REST);
        manager.add_provider_metrics("LAV1", API_INTERFACE_JSONRPC);
        manager.add_payment("LAV1", 50);
        assert_eq!(manager.cu_paid("LAV1"), 50);

        // An unregistered chain records nothing.
        manager.add_payment("GHOST", 50);
        assert_eq!(manager.cu_paid("GHOST"), 0);
    }

    #[test]
    fn latest_block_is_tracked() {
        let manager = ProviderMetricsManager::new();
        manager.set_latest_block("ETH1", 18_000_000);
        assert_eq!(manager.latest_block("ETH1"), Some(18_000_000));
    }

    #[test]
    fn version_publishing_rejects_garbage() {
        let manager = ProviderMetricsManager::new();
        manager.set_version("0.33.3");
        let (version, encoded) = manager.protocol_version().unwrap();
        assert_eq!(version, "0.33.3");
        assert_eq!(encoded, version_to_integer("0.33.3").unwrap());

        manager.set_version("not-a-version");
        // The previous good value stays.
        assert_eq!(manager.protocol_version().unwrap().0, "0.33.3");
    }
}
