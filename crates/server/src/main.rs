//! Relay listener binary.
//!
//! Loads the configuration, builds one parser/router pair per served chain,
//! starts the per-chain head fetchers and serves the consumer-facing HTTP
//! surface.

mod router;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use relay_core::config::RelayConfig;
use relay_core::fetcher::ChainFetcher;
use relay_core::health::HealthReporter;
use relay_core::metrics::{install_recorder, ProviderMetricsManager};
use relay_core::parser::new_chain_parser;
use relay_core::router::ChainRouter;
use relay_core::spec::Spec;

use crate::router::{build_router, AppState, ChainHandle};

#[derive(Parser, Debug)]
#[command(name = "relay-server", about = "Decentralized RPC relay listener")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured bind address.
    #[arg(long)]
    listen: Option<String>,
}

/// Healthy while every configured chain has an active parser.
struct ChainsHealth {
    chains: Vec<Arc<ChainHandle>>,
}

impl HealthReporter for ChainsHealth {
    fn is_healthy(&self) -> bool {
        !self.chains.is_empty() && self.chains.iter().all(|chain| chain.parser.base().active())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut config = RelayConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(listen) = args.listen {
        config.server.bind_address = listen;
    }

    let prometheus = config.metrics.enabled.then(install_recorder);
    let provider_metrics = Arc::new(ProviderMetricsManager::new());
    provider_metrics.set_version(relay_core::version::TARGET_VERSION);

    let mut chains = HashMap::new();
    for chain_config in &config.chains {
        let parser = new_chain_parser(&chain_config.api_interface)
            .with_context(|| format!("building parser for {}", chain_config.chain_id))?;
        let spec = load_spec(chain_config.spec_file.as_deref(), &chain_config.chain_id)?;
        let enabled = spec.enabled;
        parser.base().set_spec(spec);
        if enabled {
            parser.base().activate();
            provider_metrics.set_enabled_chain(&chain_config.chain_id, &chain_config.api_interface);
        } else {
            warn!(chain_id = %chain_config.chain_id, "spec is disabled, chain will not serve");
            provider_metrics
                .set_disabled_chain(&chain_config.chain_id, &chain_config.api_interface);
        }
        provider_metrics.add_provider_metrics(&chain_config.chain_id, &chain_config.api_interface);

        let chain_router = Arc::new(
            ChainRouter::new(chain_config.router_config())
                .with_context(|| format!("building router for {}", chain_config.chain_id))?,
        );
        let handle = Arc::new(ChainHandle {
            parser: Arc::from(parser),
            router: chain_router,
            latest_block: AtomicU64::new(0),
        });
        spawn_head_fetcher(Arc::clone(&handle), Arc::clone(&provider_metrics));
        chains.insert(chain_config.chain_id.clone(), handle);
    }

    let health = Arc::new(ChainsHealth { chains: chains.values().cloned().collect() });
    let state = Arc::new(AppState {
        chains,
        cors: config.cors.clone(),
        metrics_enabled: config.metrics.enabled,
        prometheus,
        provider_metrics,
        health,
    });

    let app = build_router(state, &config.server.health_check_path, &config.metrics.path);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("binding {}", config.server.bind_address))?;
    info!(address = %config.server.bind_address, "relay listener serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("serving")?;
    Ok(())
}

fn load_spec(path: Option<&str>, chain_id: &str) -> anyhow::Result<Spec> {
    let Some(path) = path else {
        anyhow::bail!("chain {chain_id} has no spec_file configured");
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading spec file {path} for {chain_id}"))?;
    let spec: Spec =
        serde_json::from_str(&raw).with_context(|| format!("parsing spec file {path}"))?;
    if spec.index != chain_id {
        anyhow::bail!("spec file {path} is for {} but chain is {chain_id}", spec.index);
    }
    Ok(spec)
}

/// Polls the node head once per block time so extension rules see a fresh
/// latest block.
fn spawn_head_fetcher(handle: Arc<ChainHandle>, metrics: Arc<ProviderMetricsManager>) {
    let fetcher = ChainFetcher::new(
        Arc::clone(&handle.parser),
        Arc::clone(&handle.router),
        Some(metrics),
    );
    tokio::spawn(async move {
        let block_time = handle.parser.base().chain_block_stats().average_block_time;
        let period = if block_time.is_zero() { Duration::from_secs(10) } else { block_time };
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match fetcher.fetch_latest_block_num().await {
                Ok(block) if block >= 0 => {
                    handle.observe_latest_block(block as u64);
                }
                Ok(_) => {}
                Err(error) => {
                    error!(chain_id = %handle.router.chain_id(), %error, "head fetch failed");
                }
            }
        }
    });
}
