//! Probe wire protocol and transports.
//!
//! The relayer protocol is plain gRPC with hand-rolled prost messages: a
//! `Probe` echoing a GUID and reporting the latest block, and an unsigned
//! `Relay` that a healthy provider must reject with an epoch mismatch. The
//! transport sits behind a trait so the prober can be exercised without a
//! network.

use std::time::Duration;

use async_trait::async_trait;
use http::uri::PathAndQuery;
use tonic::transport::Endpoint;

use super::HealthError;

/// Trailer/metadata key carrying the provider's protocol version.
pub const VERSION_METADATA_KEY: &str = "lavap-version";

/// ABCI error codes surfaced through relay rejections.
pub const EPOCH_MISMATCH_CODE: u32 = 668;
pub const UNHANDLED_RELAY_RECEIVER_CODE: u32 = 669;
pub const DISABLED_RELAY_RECEIVER_CODE: u32 = 670;

const PROBE_PATH: &str = "/relay.Relayer/Probe";
const RELAY_PATH: &str = "/relay.Relayer/Relay";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProbeRequest {
    #[prost(uint64, tag = "1")]
    pub guid: u64,
    #[prost(string, tag = "2")]
    pub spec_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub api_interface: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProbeReply {
    #[prost(uint64, tag = "1")]
    pub guid: u64,
    #[prost(int64, tag = "2")]
    pub latest_block: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RelaySession {
    #[prost(string, tag = "1")]
    pub spec_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RelayPrivateData {
    #[prost(string, tag = "1")]
    pub api_interface: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub addon: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RelayRequest {
    #[prost(message, optional, tag = "1")]
    pub relay_session: ::core::option::Option<RelaySession>,
    #[prost(message, optional, tag = "2")]
    pub relay_data: ::core::option::Option<RelayPrivateData>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RelayReplyMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}

/// A probe response plus the version string the provider attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub reply: ProbeReply,
    pub version: Option<String>,
}

/// Outcome of the unsigned relay attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayProbeOutcome {
    /// The provider accepted an unsigned relay, which is itself a failure.
    UnexpectedSuccess,
    Failed { code: Option<u32>, message: String },
}

/// Wire transport for health probes.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn probe(&self, address: &str, request: ProbeRequest) -> Result<ProbeOutcome, HealthError>;

    async fn relay(&self, address: &str, request: RelayRequest)
        -> Result<RelayProbeOutcome, HealthError>;

    /// Preflight check that the endpoint answers CORS OPTIONS requests.
    async fn cors_check(&self, address: &str) -> Result<(), HealthError>;
}

/// Production transport: raw tonic channels with a short connect timeout and
/// a reqwest CORS preflight.
pub struct GrpcProbeTransport {
    connect_timeout: Duration,
    http: reqwest::Client,
}

impl GrpcProbeTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout, http: reqwest::Client::new() }
    }

    async fn dial(&self, address: &str) -> Result<tonic::transport::Channel, HealthError> {
        let target = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let endpoint = Endpoint::from_shared(target)
            .map_err(|error| HealthError::Query(error.to_string()))?
            .connect_timeout(self.connect_timeout);
        endpoint.connect().await.map_err(|error| HealthError::Transport(error.to_string()))
    }
}

impl Default for GrpcProbeTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl ProbeTransport for GrpcProbeTransport {
    async fn probe(
        &self,
        address: &str,
        request: ProbeRequest,
    ) -> Result<ProbeOutcome, HealthError> {
        let channel = self.dial(address).await?;
        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready().await.map_err(|error| HealthError::Transport(error.to_string()))?;
        let codec = tonic::codec::ProstCodec::<ProbeRequest, ProbeReply>::default();
        let path = PathAndQuery::from_static(PROBE_PATH);
        let response = grpc
            .unary(tonic::Request::new(request), path, codec)
            .await
            .map_err(|status| HealthError::Transport(status.to_string()))?;
        let version = response
            .metadata()
            .get(VERSION_METADATA_KEY)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        Ok(ProbeOutcome { reply: response.into_inner(), version })
    }

    async fn relay(
        &self,
        address: &str,
        request: RelayRequest,
    ) -> Result<RelayProbeOutcome, HealthError> {
        let channel = self.dial(address).await?;
        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready().await.map_err(|error| HealthError::Transport(error.to_string()))?;
        let codec = tonic::codec::ProstCodec::<RelayRequest, RelayReplyMsg>::default();
        let path = PathAndQuery::from_static(RELAY_PATH);
        match grpc.unary(tonic::Request::new(request), path, codec).await {
            Ok(_) => Ok(RelayProbeOutcome::UnexpectedSuccess),
            Err(status) => Ok(RelayProbeOutcome::Failed {
                code: parse_abci_code(status.message()),
                message: status.message().to_string(),
            }),
        }
    }

    async fn cors_check(&self, address: &str) -> Result<(), HealthError> {
        let target = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let response = self
            .http
            .request(reqwest::Method::OPTIONS, &target)
            .timeout(self.connect_timeout)
            .send()
            .await
            .map_err(|error| HealthError::Transport(error.to_string()))?;
        if response.headers().contains_key("access-control-allow-origin") {
            Ok(())
        } else {
            Err(HealthError::Transport("endpoint missing CORS preflight headers".to_string()))
        }
    }
}

/// Extracts the ABCI error code embedded in a rejection message
/// (`"... code = 668 ..."` or `"... code: 668 ..."`).
pub fn parse_abci_code(message: &str) -> Option<u32> {
    let position = message.find("code")?;
    message[position + 4..]
        .chars()
        .skip_while(|c| *c == ' ' || *c == '=' || *c == ':')
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()
}
