//! Health prober.
//!
//! For every service a staked provider advertises, the prober opens a raw
//! connection, issues a GUID-echo probe, runs a CORS preflight, sends an
//! unsigned relay that must fail with an epoch mismatch, and checks the
//! provider's protocol version against the accepted range. Results land in
//! the shared [`HealthResults`] aggregator; one endpoint's failure never
//! aborts another's probe.

mod probe;
mod results;

pub use probe::{
    parse_abci_code, GrpcProbeTransport, ProbeOutcome, ProbeReply, ProbeRequest, ProbeTransport,
    RelayPrivateData, RelayProbeOutcome, RelayReplyMsg, RelayRequest, RelaySession,
    DISABLED_RELAY_RECEIVER_CODE, EPOCH_MISMATCH_CODE, UNHANDLED_RELAY_RECEIVER_CODE,
    VERSION_METADATA_KEY,
};
pub use results::{HealthResults, LavaEntity, ReplyData, SubscriptionData};

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::version::VersionParams;

pub const BASIC_QUERY_RETRIES: u32 = 3;
pub const QUERY_RETRIES: u32 = 3;
pub const QUERY_SLEEP_TIME: Duration = Duration::from_millis(100);
pub const NICE_OUTPUT_LENGTH: usize = 40;

/// Liveness surface consumed by the listener's health endpoint.
pub trait HealthReporter: Send + Sync {
    fn is_healthy(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("query error: {0}")]
    Query(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Version(#[from] crate::version::VersionError),
}

/// One service advertised by a provider endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointService {
    pub api_interface: String,
    pub addon: String,
}

/// A provider endpoint from a stake entry.
#[derive(Debug, Clone)]
pub struct StakeEndpoint {
    /// Network address (`host:port` or a full URL).
    pub address: String,
    pub services: Vec<EndpointService>,
}

/// A staked provider to probe.
#[derive(Debug, Clone)]
pub struct StakeEntry {
    pub address: String,
    pub chain: String,
    pub endpoints: Vec<StakeEndpoint>,
    /// Stake activation height; entries not yet active are frozen, not
    /// probed.
    pub stake_applied_block: u64,
}

/// Probes every advertised service of every stake entry in parallel.
///
/// Version params are validated up front (a fatal error); per-provider
/// failures become unhealthy reasons in the aggregator. A bounded channel
/// surfaces the first fatal task error without blocking the rest.
pub async fn check_providers(
    transport: Arc<dyn ProbeTransport>,
    version: VersionParams,
    entries: Vec<StakeEntry>,
    current_block: u64,
    results: Arc<HealthResults>,
) -> Result<(), HealthError> {
    version.validate()?;
    let version = Arc::new(version);
    let (error_sender, mut error_receiver) = mpsc::channel::<HealthError>(1);

    let mut tasks = JoinSet::new();
    for entry in entries {
        let transport = Arc::clone(&transport);
        let version = Arc::clone(&version);
        let results = Arc::clone(&results);
        let error_sender = error_sender.clone();
        tasks.spawn(async move {
            if entry.stake_applied_block > current_block {
                for endpoint in &entry.endpoints {
                    for service in &endpoint.services {
                        results.freeze_provider(LavaEntity {
                            address: entry.address.clone(),
                            spec_id: entry.chain.clone(),
                            api_interface: service.api_interface.clone(),
                        });
                    }
                }
                return;
            }
            for endpoint in &entry.endpoints {
                if endpoint.services.is_empty() {
                    warn!(address = %endpoint.address, "endpoint has no supported services");
                    continue;
                }
                for service in &endpoint.services {
                    let provider_key = LavaEntity {
                        address: entry.address.clone(),
                        spec_id: entry.chain.clone(),
                        api_interface: service.api_interface.clone(),
                    };
                    match check_one_provider(transport.as_ref(), &entry, endpoint, service).await {
                        Ok((latency, reported_version, latest_block)) => {
                            if !version.provider_version_accepted(&reported_version) {
                                results.set_unhealthy_provider(
                                    provider_key,
                                    format!(
                                        "Version:{} should be: {}",
                                        reported_version, version.provider_target
                                    ),
                                );
                                continue;
                            }
                            results.update_latest_block(&entry.chain, latest_block);
                            results.set_provider_data(
                                provider_key,
                                ReplyData { block: latest_block, latency },
                            );
                        }
                        Err(ProbeFailure::Unhealthy(reason)) => {
                            results.set_unhealthy_provider(provider_key, reason);
                        }
                        Err(ProbeFailure::Fatal(error)) => {
                            results.set_unhealthy_provider(
                                provider_key,
                                prettify_provider_error(None, &error.to_string()),
                            );
                            let _ = error_sender.try_send(error);
                        }
                    }
                }
            }
        });
    }
    drop(error_sender);
    while tasks.join_next().await.is_some() {}

    if let Ok(error) = error_receiver.try_recv() {
        return Err(error);
    }
    Ok(())
}

enum ProbeFailure {
    /// The provider misbehaved; record a reason and move on.
    Unhealthy(String),
    /// The orchestration itself failed (bad configuration, cancelled).
    Fatal(HealthError),
}

/// The probe sequence for one `(endpoint, api interface, addon)` service.
async fn check_one_provider(
    transport: &dyn ProbeTransport,
    entry: &StakeEntry,
    endpoint: &StakeEndpoint,
    service: &EndpointService,
) -> Result<(Duration, String, i64), ProbeFailure> {
    let guid: u64 = rand::random();
    let request = ProbeRequest {
        guid,
        spec_id: entry.chain.clone(),
        api_interface: service.api_interface.clone(),
    };
    // Transient transport errors retry with fixed backoff; anything else
    // fails the probe immediately.
    let mut attempts = 0;
    let (outcome, latency) = loop {
        attempts += 1;
        let sent_at = Instant::now();
        match transport.probe(&endpoint.address, request.clone()).await {
            Ok(outcome) => break (outcome, sent_at.elapsed()),
            Err(HealthError::Query(message)) => {
                return Err(ProbeFailure::Fatal(HealthError::Query(message)))
            }
            Err(error) => {
                debug!(
                    address = %endpoint.address,
                    api_interface = %service.api_interface,
                    chain = %entry.chain,
                    attempts,
                    %error,
                    "failed probing provider endpoint"
                );
                if attempts >= QUERY_RETRIES {
                    return Err(ProbeFailure::Unhealthy(prettify_provider_error(
                        None,
                        &error.to_string(),
                    )));
                }
                tokio::time::sleep(QUERY_SLEEP_TIME).await;
            }
        }
    };
    if outcome.reply.guid != guid {
        return Err(ProbeFailure::Unhealthy("probe returned invalid value".to_string()));
    }

    if let Err(error) = transport.cors_check(&endpoint.address).await {
        return Err(ProbeFailure::Unhealthy(prettify_provider_error(None, &error.to_string())));
    }

    // An unsigned relay must be rejected with an epoch mismatch; anything
    // else means the receiver is missing, disabled or too permissive.
    let relay = RelayRequest {
        relay_session: Some(RelaySession { spec_id: entry.chain.clone() }),
        relay_data: Some(RelayPrivateData {
            api_interface: service.api_interface.clone(),
            addon: service.addon.clone(),
        }),
    };
    match transport.relay(&endpoint.address, relay).await {
        Ok(RelayProbeOutcome::Failed { code: Some(EPOCH_MISMATCH_CODE), .. }) => {}
        Ok(RelayProbeOutcome::Failed { code, message }) => {
            return Err(ProbeFailure::Unhealthy(prettify_provider_error(code, &message)));
        }
        Ok(RelayProbeOutcome::UnexpectedSuccess) => {
            return Err(ProbeFailure::Unhealthy(
                "relay without signature did not error, unexpected".to_string(),
            ));
        }
        Err(error) => {
            return Err(ProbeFailure::Unhealthy(prettify_provider_error(None, &error.to_string())));
        }
    }

    Ok((latency, outcome.version.unwrap_or_default(), outcome.reply.latest_block))
}

/// Maps known rejection codes to their reasons and truncates everything else
/// to a displayable length.
pub fn prettify_provider_error(code: Option<u32>, message: &str) -> String {
    match code {
        Some(UNHANDLED_RELAY_RECEIVER_CODE) => "provider running with unhandled support".to_string(),
        Some(DISABLED_RELAY_RECEIVER_CODE) => {
            "provider running with disabled support due to verification".to_string()
        }
        _ => {
            if message.len() <= NICE_OUTPUT_LENGTH {
                message.to_string()
            } else {
                let mut cut = NICE_OUTPUT_LENGTH;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message[..cut].to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Clone, Default)]
    struct MockBehavior {
        wrong_guid: bool,
        probe_error: bool,
        fatal_probe: bool,
        relay_outcome: Option<RelayProbeOutcome>,
        version: Option<String>,
        latest_block: i64,
    }

    #[derive(Default)]
    struct MockTransport {
        behaviors: Mutex<HashMap<String, MockBehavior>>,
    }

    impl MockTransport {
        fn with(mut self, address: &str, behavior: MockBehavior) -> Self {
            self.behaviors.get_mut().insert(address.to_string(), behavior);
            self
        }

        fn behavior(&self, address: &str) -> MockBehavior {
            self.behaviors.lock().get(address).cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl ProbeTransport for MockTransport {
        async fn probe(
            &self,
            address: &str,
            request: ProbeRequest,
        ) -> Result<ProbeOutcome, HealthError> {
            let behavior = self.behavior(address);
            if behavior.fatal_probe {
                return Err(HealthError::Query("malformed endpoint configuration".to_string()));
            }
            if behavior.probe_error {
                return Err(HealthError::Transport("connection refused".to_string()));
            }
            let guid = if behavior.wrong_guid { request.guid.wrapping_add(1) } else { request.guid };
            Ok(ProbeOutcome {
                reply: ProbeReply { guid, latest_block: behavior.latest_block },
                version: behavior.version.clone(),
            })
        }

        async fn relay(
            &self,
            address: &str,
            _request: RelayRequest,
        ) -> Result<RelayProbeOutcome, HealthError> {
            Ok(self.behavior(address).relay_outcome.unwrap_or(RelayProbeOutcome::Failed {
                code: Some(EPOCH_MISMATCH_CODE),
                message: "epoch mismatch".to_string(),
            }))
        }

        async fn cors_check(&self, _address: &str) -> Result<(), HealthError> {
            Ok(())
        }
    }

    fn entry(address: &str, endpoint_address: &str) -> StakeEntry {
        StakeEntry {
            address: address.to_string(),
            chain: "TEST1".to_string(),
            endpoints: vec![StakeEndpoint {
                address: endpoint_address.to_string(),
                services: vec![EndpointService {
                    api_interface: "jsonrpc".to_string(),
                    addon: String::new(),
                }],
            }],
            stake_applied_block: 0,
        }
    }

    fn entity(address: &str) -> LavaEntity {
        LavaEntity {
            address: address.to_string(),
            spec_id: "TEST1".to_string(),
            api_interface: "jsonrpc".to_string(),
        }
    }

    fn healthy_behavior() -> MockBehavior {
        MockBehavior {
            version: Some(crate::version::TARGET_VERSION.to_string()),
            latest_block: 1234,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn healthy_provider_reports_data() {
        let transport =
            Arc::new(MockTransport::default().with("1.2.3.4:2220", healthy_behavior()));
        let results = Arc::new(HealthResults::new());
        check_providers(
            transport,
            VersionParams::default(),
            vec![entry("provider1", "1.2.3.4:2220")],
            100,
            Arc::clone(&results),
        )
        .await
        .unwrap();
        let data = results.get_provider_data(&entity("provider1")).unwrap();
        assert_eq!(data.block, 1234);
        assert_eq!(results.latest_block("TEST1"), Some(1234));
        assert!(results.unhealthy_providers().is_empty());
    }

    #[tokio::test]
    async fn guid_mismatch_marks_unhealthy() {
        let behavior = MockBehavior { wrong_guid: true, ..healthy_behavior() };
        let transport = Arc::new(MockTransport::default().with("1.2.3.4:2220", behavior));
        let results = Arc::new(HealthResults::new());
        check_providers(
            transport,
            VersionParams::default(),
            vec![entry("provider1", "1.2.3.4:2220")],
            100,
            Arc::clone(&results),
        )
        .await
        .unwrap();
        let unhealthy = results.unhealthy_providers();
        assert_eq!(unhealthy.get(&entity("provider1")).unwrap(), "probe returned invalid value");
    }

    #[tokio::test]
    async fn epoch_mismatch_is_success_but_other_relay_outcomes_are_not() {
        let accepted = MockBehavior {
            relay_outcome: Some(RelayProbeOutcome::UnexpectedSuccess),
            ..healthy_behavior()
        };
        let unhandled = MockBehavior {
            relay_outcome: Some(RelayProbeOutcome::Failed {
                code: Some(UNHANDLED_RELAY_RECEIVER_CODE),
                message: "no receiver".to_string(),
            }),
            ..healthy_behavior()
        };
        let transport = Arc::new(
            MockTransport::default()
                .with("a:1", accepted)
                .with("b:1", unhandled)
                .with("c:1", healthy_behavior()),
        );
        let results = Arc::new(HealthResults::new());
        check_providers(
            transport,
            VersionParams::default(),
            vec![entry("pa", "a:1"), entry("pb", "b:1"), entry("pc", "c:1")],
            100,
            Arc::clone(&results),
        )
        .await
        .unwrap();
        let unhealthy = results.unhealthy_providers();
        assert_eq!(
            unhealthy.get(&entity("pa")).unwrap(),
            "relay without signature did not error, unexpected"
        );
        assert_eq!(
            unhealthy.get(&entity("pb")).unwrap(),
            "provider running with unhandled support"
        );
        assert!(results.get_provider_data(&entity("pc")).is_some());
    }

    #[tokio::test]
    async fn version_outside_range_marks_unhealthy() {
        let behavior = MockBehavior { version: Some("0.1.0".to_string()), ..healthy_behavior() };
        let transport = Arc::new(MockTransport::default().with("1.2.3.4:2220", behavior));
        let results = Arc::new(HealthResults::new());
        check_providers(
            transport,
            VersionParams::default(),
            vec![entry("provider1", "1.2.3.4:2220")],
            100,
            Arc::clone(&results),
        )
        .await
        .unwrap();
        let unhealthy = results.unhealthy_providers();
        assert!(unhealthy.get(&entity("provider1")).unwrap().starts_with("Version:0.1.0"));
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_other_probes() {
        let failing = MockBehavior { probe_error: true, ..Default::default() };
        let transport = Arc::new(
            MockTransport::default()
                .with("bad:1", failing)
                .with("good:1", healthy_behavior()),
        );
        let results = Arc::new(HealthResults::new());
        check_providers(
            transport,
            VersionParams::default(),
            vec![entry("bad", "bad:1"), entry("good", "good:1")],
            100,
            Arc::clone(&results),
        )
        .await
        .unwrap();
        assert!(results.unhealthy_providers().contains_key(&entity("bad")));
        assert!(results.get_provider_data(&entity("good")).is_some());
    }

    #[tokio::test]
    async fn pending_stake_freezes_instead_of_probing() {
        let transport = Arc::new(MockTransport::default().with("1.2.3.4:2220", healthy_behavior()));
        let results = Arc::new(HealthResults::new());
        let mut pending = entry("provider1", "1.2.3.4:2220");
        pending.stake_applied_block = 500;
        check_providers(transport, VersionParams::default(), vec![pending], 100, Arc::clone(&results))
            .await
            .unwrap();
        assert!(results.is_frozen(&entity("provider1")));
        assert!(results.get_provider_data(&entity("provider1")).is_none());
    }

    #[tokio::test]
    async fn fatal_query_error_surfaces_after_all_probes() {
        let fatal = MockBehavior { fatal_probe: true, ..Default::default() };
        let transport = Arc::new(
            MockTransport::default()
                .with("fatal:1", fatal)
                .with("good:1", healthy_behavior()),
        );
        let results = Arc::new(HealthResults::new());
        let outcome = check_providers(
            transport,
            VersionParams::default(),
            vec![entry("broken", "fatal:1"), entry("good", "good:1")],
            100,
            Arc::clone(&results),
        )
        .await;
        assert!(matches!(outcome, Err(HealthError::Query(_))));
        // The healthy provider was still probed.
        assert!(results.get_provider_data(&entity("good")).is_some());
    }

    #[tokio::test]
    async fn invalid_version_params_fail_fast() {
        let transport = Arc::new(MockTransport::default());
        let params = VersionParams {
            provider_target: "0.1.0".to_string(),
            provider_min: "0.2.0".to_string(),
            consumer_target: "0.1.0".to_string(),
            consumer_min: "0.2.0".to_string(),
        };
        let outcome = check_providers(
            transport,
            params,
            vec![],
            100,
            Arc::new(HealthResults::new()),
        )
        .await;
        assert!(matches!(outcome, Err(HealthError::Version(_))));
    }

    #[test]
    fn prettify_truncates_long_messages() {
        let long = "x".repeat(120);
        assert_eq!(prettify_provider_error(None, &long).len(), NICE_OUTPUT_LENGTH);
        assert_eq!(prettify_provider_error(None, "short"), "short");
        assert_eq!(
            prettify_provider_error(Some(DISABLED_RELAY_RECEIVER_CODE), "whatever"),
            "provider running with disabled support due to verification"
        );
    }
}
