//! Chain router.
//!
//! Holds the provider connections configured for one chain and dispatches
//! normalized messages to a connection whose endpoint advertises every
//! extension the message requires. Selection prefers the least recently used
//! matching endpoint; per-endpoint connection pools bound concurrency and a
//! cancelled call still returns its connection to the pool.

mod connection;

pub use connection::{ChainProxy, NodeSubscription, PoolGuard};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashSet;
use thiserror::Error;
use tracing::debug;

use crate::message::{ChainMessage, Metadata};
use crate::parser::ChainBlockStats;

/// Worst-case one-way latency budget added to every relay timeout.
pub const AVERAGE_WORLD_LATENCY: Duration = Duration::from_millis(300);

/// Baseline processing time granted per compute unit.
pub const TIME_PER_CU: Duration = Duration::from_millis(100);

/// Interval between re-dial attempts after a transport failure.
pub const REDIAL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no endpoint supports the required extensions: {0:?}")]
    NoSupportingEndpoint(Vec<String>),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("node request timed out")]
    Timeout,
    #[error("operation cancelled")]
    Cancelled,
    #[error("endpoint has no websocket url for subscription api")]
    SubscriptionUnsupported,
    #[error("invalid endpoint configuration: {0}")]
    InvalidEndpoint(String),
}

/// A provider reply: raw response bytes plus reply-direction headers.
#[derive(Debug, Clone, Default)]
pub struct RelayReply {
    pub data: Vec<u8>,
    pub metadata: Vec<Metadata>,
}

/// The outcome of a dispatched message.
pub struct SentNodeMsg {
    pub reply: RelayReply,
    /// Present (with a non-empty id) only for subscription apis; the caller
    /// owns the stream's lifetime.
    pub subscription: Option<NodeSubscription>,
    pub proxy_url: String,
    pub chain_id: String,
}

/// One provider endpoint: its URLs and the services it advertises.
#[derive(Debug, Clone)]
pub struct RouterEndpoint {
    pub node_url: String,
    pub ws_url: Option<String>,
    /// Extension names this endpoint serves (the empty default set is always
    /// implied).
    pub extensions: Vec<String>,
    /// Pool size for this endpoint.
    pub connections: usize,
}

#[derive(Debug, Clone)]
pub struct ChainRouterConfig {
    pub chain_id: String,
    pub endpoints: Vec<RouterEndpoint>,
}

struct RouterEntry {
    supported_extensions: AHashSet<String>,
    proxy: Arc<ChainProxy>,
    last_used: AtomicU64,
}

/// Fan-out proxy over the endpoints configured for one chain.
pub struct ChainRouter {
    chain_id: String,
    entries: Vec<RouterEntry>,
    use_clock: AtomicU64,
}

impl ChainRouter {
    /// Builds the router, creating every endpoint's connection pool eagerly.
    pub fn new(config: ChainRouterConfig) -> Result<Self, RouterError> {
        if config.endpoints.is_empty() {
            return Err(RouterError::InvalidEndpoint("no endpoints configured".to_string()));
        }
        let mut entries = Vec::with_capacity(config.endpoints.len());
        for endpoint in config.endpoints {
            let proxy = Arc::new(ChainProxy::new(
                endpoint.node_url.clone(),
                endpoint.ws_url.clone(),
                config.chain_id.clone(),
                endpoint.connections.max(1),
            )?);
            entries.push(RouterEntry {
                supported_extensions: endpoint.extensions.into_iter().collect(),
                proxy,
                last_used: AtomicU64::new(0),
            });
        }
        Ok(Self { chain_id: config.chain_id, entries, use_clock: AtomicU64::new(1) })
    }

    /// Whether any configured endpoint advertises all of the extensions.
    pub fn extensions_supported(&self, extensions: &[String]) -> bool {
        self.entries.iter().any(|entry| supports(&entry.supported_extensions, extensions))
    }

    fn select(&self, extensions: &[String]) -> Result<&RouterEntry, RouterError> {
        let entry = self
            .entries
            .iter()
            .filter(|entry| supports(&entry.supported_extensions, extensions))
            .min_by_key(|entry| entry.last_used.load(Ordering::Relaxed))
            .ok_or_else(|| RouterError::NoSupportingEndpoint(extensions.to_vec()))?;
        entry.last_used.store(self.use_clock.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
        Ok(entry)
    }

    /// Dispatches the message to an endpoint supporting the requested
    /// extension set.
    pub async fn send_node_msg(
        &self,
        message: &ChainMessage,
        extensions: &[String],
        timeout: Duration,
    ) -> Result<SentNodeMsg, RouterError> {
        let entry = self.select(extensions)?;
        debug!(chain_id = %self.chain_id, url = %entry.proxy.node_url(), "dispatching node message");
        let (reply, subscription) = entry.proxy.send_node_msg(message, timeout).await?;
        Ok(SentNodeMsg {
            reply,
            subscription,
            proxy_url: entry.proxy.node_url().to_string(),
            chain_id: self.chain_id.clone(),
        })
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }
}

fn supports(advertised: &AHashSet<String>, required: &[String]) -> bool {
    required.iter().filter(|e| !e.is_empty()).all(|extension| advertised.contains(extension))
}

/// Effective relay timeout for a message.
///
/// The override wins when set; otherwise the api's own timeout (or the
/// compute-unit derived one) scales with the retry count, plus the world
/// latency budget and a block time for hanging apis.
pub fn relay_timeout(message: &ChainMessage, stats: &ChainBlockStats, timeouts: u32) -> Duration {
    if let Some(timeout_override) = message.timeout_override() {
        return timeout_override;
    }
    let hanging_extra =
        if message.api().hanging { stats.average_block_time } else { Duration::ZERO };
    let per_attempt = if message.api().timeout_ms > 0 {
        Duration::from_millis(message.api().timeout_ms)
    } else {
        time_per_cu(message.api().compute_units)
    };
    hanging_extra + per_attempt * (timeouts + 1) + AVERAGE_WORLD_LATENCY
}

pub fn time_per_cu(compute_units: u64) -> Duration {
    TIME_PER_CU.saturating_mul(compute_units.min(u32::MAX as u64) as u32)
}
