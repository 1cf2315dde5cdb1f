//! Application configuration with layered loading.
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. Compiled defaults from the struct `Default`/`serde(default)` values.
//! 2. An optional TOML file.
//! 3. `RELAY_*` environment variables (`__` separates nesting levels).
//!
//! Invalid configurations fail at load time rather than surfacing later as
//! broken routing.

use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::router::{ChainRouterConfig, RouterEndpoint};

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the listener binds, e.g. `127.0.0.1:3340`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Path serving the liveness check.
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
}

fn default_bind_address() -> String {
    "127.0.0.1:3340".to_string()
}

fn default_health_check_path() -> String {
    "/health".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            health_check_path: default_health_check_path(),
        }
    }
}

/// CORS and preflight caching settings, echoed verbatim on `OPTIONS`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_cors_origin")]
    pub origin: String,
    #[serde(default = "default_cors_methods")]
    pub methods: String,
    #[serde(default = "default_cors_headers")]
    pub headers: String,
    #[serde(default = "default_cors_credentials")]
    pub credentials: String,
    /// Preflight cache duration in seconds.
    #[serde(default = "default_cors_max_age")]
    pub max_age_seconds: u64,
}

fn default_cors_origin() -> String {
    "*".to_string()
}

fn default_cors_methods() -> String {
    "GET,POST,PUT,DELETE,OPTIONS".to_string()
}

fn default_cors_headers() -> String {
    "Content-Type,Authorization,dapp-id".to_string()
}

fn default_cors_credentials() -> String {
    "true".to_string()
}

fn default_cors_max_age() -> u64 {
    86_400
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origin: default_cors_origin(),
            methods: default_cors_methods(),
            headers: default_cors_headers(),
            credentials: default_cors_credentials(),
            max_age_seconds: default_cors_max_age(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: default_metrics_enabled(), path: default_metrics_path() }
    }
}

/// One provider node endpoint for a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEndpoint {
    pub node_url: String,
    #[serde(default)]
    pub ws_url: Option<String>,
    /// Extensions this endpoint advertises (e.g. `archive`).
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default = "default_connections")]
    pub connections: usize,
}

fn default_connections() -> usize {
    5
}

/// Router configuration for one chain and interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: String,
    pub api_interface: String,
    /// Path to the chain's spec snapshot (JSON), loaded at startup until the
    /// on-chain spec feed takes over.
    #[serde(default)]
    pub spec_file: Option<String>,
    pub endpoints: Vec<ChainEndpoint>,
}

impl ChainConfig {
    pub fn router_config(&self) -> ChainRouterConfig {
        ChainRouterConfig {
            chain_id: self.chain_id.clone(),
            endpoints: self
                .endpoints
                .iter()
                .map(|endpoint| RouterEndpoint {
                    node_url: endpoint.node_url.clone(),
                    ws_url: endpoint.ws_url.clone(),
                    extensions: endpoint.extensions.clone(),
                    connections: endpoint.connections,
                })
                .collect(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

impl RelayConfig {
    /// Loads configuration from an optional TOML file plus `RELAY_*`
    /// environment overrides, then validates it.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let loaded: Self = builder
            .add_source(Environment::with_prefix("RELAY").separator("__"))
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_address.is_empty() {
            return Err(ConfigError::Message("server.bind_address cannot be empty".to_string()));
        }
        if !self.server.health_check_path.starts_with('/') {
            return Err(ConfigError::Message(
                "server.health_check_path must start with '/'".to_string(),
            ));
        }
        for chain in &self.chains {
            if chain.endpoints.is_empty() {
                return Err(ConfigError::Message(format!(
                    "chain {} has no endpoints",
                    chain.chain_id
                )));
            }
            for endpoint in &chain.endpoints {
                url::Url::parse(&endpoint.node_url).map_err(|error| {
                    ConfigError::Message(format!(
                        "chain {} endpoint {}: {error}",
                        chain.chain_id, endpoint.node_url
                    ))
                })?;
            }
        }
        Ok(())
    }
}
