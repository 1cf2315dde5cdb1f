//! Provider connections: per-endpoint pools and dialect dispatch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut};
use futures_util::{SinkExt, StreamExt};
use http::uri::PathAndQuery;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::transport::{Channel, Endpoint};
use tonic::Status;
use tracing::{debug, warn};

use crate::message::{ChainMessage, Metadata, RpcPayload};

use super::{RelayReply, RouterError, REDIAL_INTERVAL};

const GRPC_DIAL_ATTEMPTS: u32 = 3;
const SUBSCRIPTION_BUFFER: usize = 64;

/// A live subscription: its provider-assigned id and the stream of
/// notifications. Dropping the handle tears the forwarding task down.
pub struct NodeSubscription {
    pub id: String,
    pub stream: mpsc::Receiver<Value>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for NodeSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

static CLIENT_IDS: AtomicUsize = AtomicUsize::new(0);

struct NodeClient {
    id: usize,
    http: reqwest::Client,
    /// Established on first gRPC dispatch, dropped on transport error so the
    /// next call re-dials.
    grpc: Option<Channel>,
}

impl NodeClient {
    fn new() -> Result<Self, RouterError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|error| RouterError::Transport(error.to_string()))?;
        Ok(Self { id: CLIENT_IDS.fetch_add(1, Ordering::Relaxed), http, grpc: None })
    }
}

struct PoolInner {
    clients: Mutex<Vec<NodeClient>>,
    semaphore: Arc<Semaphore>,
}

/// Exclusive hold on one pooled connection. The connection returns to the
/// pool on drop, which also covers cancelled calls.
pub struct PoolGuard {
    client: Option<NodeClient>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PoolGuard {
    fn client_mut(&mut self) -> &mut NodeClient {
        self.client.as_mut().expect("client held until drop")
    }

    #[cfg(test)]
    pub(crate) fn client_id(&self) -> usize {
        self.client.as_ref().expect("client held until drop").id
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.clients.lock().push(client);
        }
    }
}

/// One provider endpoint with an eagerly created connection pool.
pub struct ChainProxy {
    node_url: String,
    ws_url: Option<String>,
    chain_id: String,
    pool: Arc<PoolInner>,
}

impl ChainProxy {
    pub(crate) fn new(
        node_url: String,
        ws_url: Option<String>,
        chain_id: String,
        connections: usize,
    ) -> Result<Self, RouterError> {
        url::Url::parse(&node_url)
            .map_err(|error| RouterError::InvalidEndpoint(format!("{node_url}: {error}")))?;
        let mut clients = Vec::with_capacity(connections);
        for _ in 0..connections {
            clients.push(NodeClient::new()?);
        }
        let pool = Arc::new(PoolInner {
            clients: Mutex::new(clients),
            semaphore: Arc::new(Semaphore::new(connections)),
        });
        Ok(Self { node_url, ws_url, chain_id, pool })
    }

    pub(crate) fn node_url(&self) -> &str {
        &self.node_url
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    async fn acquire(&self) -> PoolGuard {
        let permit = Arc::clone(&self.pool.semaphore)
            .acquire_owned()
            .await
            .expect("pool semaphore is never closed");
        let client = self.pool.clients.lock().pop().expect("permit guarantees an idle client");
        PoolGuard { client: Some(client), pool: Arc::clone(&self.pool), _permit: permit }
    }

    #[cfg(test)]
    pub(crate) async fn acquire_for_test(&self) -> PoolGuard {
        self.acquire().await
    }

    pub(crate) async fn send_node_msg(
        &self,
        message: &ChainMessage,
        timeout: Duration,
    ) -> Result<(RelayReply, Option<NodeSubscription>), RouterError> {
        if message.api().subscription {
            let (reply, subscription) = tokio::time::timeout(timeout, self.subscribe(message))
                .await
                .map_err(|_| RouterError::Timeout)??;
            return Ok((reply, Some(subscription)));
        }
        let mut guard = self.acquire().await;
        let reply = tokio::time::timeout(timeout, self.dispatch(guard.client_mut(), message))
            .await
            .map_err(|_| RouterError::Timeout)??;
        Ok((reply, None))
    }

    async fn dispatch(
        &self,
        client: &mut NodeClient,
        message: &ChainMessage,
    ) -> Result<RelayReply, RouterError> {
        match message.payload() {
            RpcPayload::JsonRpc(request) => {
                let body = serde_json::to_value(request)
                    .map_err(|error| RouterError::Transport(error.to_string()))?;
                self.post_json(client, &self.node_url, &body).await
            }
            RpcPayload::Batch(requests) => {
                let body = serde_json::to_value(requests)
                    .map_err(|error| RouterError::Transport(error.to_string()))?;
                self.post_json(client, &self.node_url, &body).await
            }
            RpcPayload::Rest { path, query, body, .. } => {
                let url = build_rest_url(&self.node_url, path, query);
                let connection_type =
                    message.api_collection().collection_data.connection_type.as_str();
                if connection_type == "POST" {
                    let body = body.clone().unwrap_or(Value::Null);
                    self.post_json(client, &url, &body).await
                } else {
                    let response = client
                        .http
                        .get(&url)
                        .send()
                        .await
                        .map_err(|error| RouterError::Transport(error.to_string()))?;
                    into_relay_reply(response).await
                }
            }
            RpcPayload::Grpc { path, body, .. } => self.grpc_unary(client, path, body).await,
        }
    }

    async fn post_json(
        &self,
        client: &NodeClient,
        url: &str,
        body: &Value,
    ) -> Result<RelayReply, RouterError> {
        let response = client
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|error| RouterError::Transport(error.to_string()))?;
        into_relay_reply(response).await
    }

    async fn grpc_unary(
        &self,
        client: &mut NodeClient,
        path: &str,
        body: &[u8],
    ) -> Result<RelayReply, RouterError> {
        if client.grpc.is_none() {
            client.grpc = Some(dial_grpc(&self.node_url).await?);
        }
        let channel = client.grpc.clone().expect("channel dialed above");
        let mut grpc = tonic::client::Grpc::new(channel);
        if let Err(error) = grpc.ready().await {
            client.grpc = None;
            return Err(RouterError::Transport(error.to_string()));
        }
        let path = PathAndQuery::try_from(format!("/{path}"))
            .map_err(|error| RouterError::Transport(error.to_string()))?;
        match grpc.unary(tonic::Request::new(body.to_vec()), path, RawCodec).await {
            Ok(response) => {
                let metadata = response
                    .metadata()
                    .iter()
                    .filter_map(|entry| match entry {
                        tonic::metadata::KeyAndValueRef::Ascii(key, value) => {
                            value.to_str().ok().map(|value| Metadata {
                                name: key.as_str().to_string(),
                                value: value.to_string(),
                            })
                        }
                        tonic::metadata::KeyAndValueRef::Binary(..) => None,
                    })
                    .collect();
                Ok(RelayReply { data: response.into_inner(), metadata })
            }
            Err(status) => {
                client.grpc = None;
                Err(RouterError::Transport(status.to_string()))
            }
        }
    }

    /// Opens a websocket subscription: sends the request, takes the first
    /// reply as the subscription id and forwards notifications until the
    /// caller drops the handle.
    async fn subscribe(
        &self,
        message: &ChainMessage,
    ) -> Result<(RelayReply, NodeSubscription), RouterError> {
        let ws_url = self.ws_url.as_deref().ok_or(RouterError::SubscriptionUnsupported)?;
        let request = match message.payload() {
            RpcPayload::JsonRpc(request) => serde_json::to_string(request)
                .map_err(|error| RouterError::Transport(error.to_string()))?,
            _ => return Err(RouterError::SubscriptionUnsupported),
        };
        let (mut socket, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|error| RouterError::Transport(error.to_string()))?;
        socket
            .send(WsMessage::Text(request))
            .await
            .map_err(|error| RouterError::Transport(error.to_string()))?;

        let first = loop {
            match socket.next().await {
                Some(Ok(WsMessage::Text(text))) => break text,
                Some(Ok(_)) => continue,
                Some(Err(error)) => return Err(RouterError::Transport(error.to_string())),
                None => {
                    return Err(RouterError::Transport(
                        "websocket closed before subscription reply".to_string(),
                    ))
                }
            }
        };
        let reply_value: Value = serde_json::from_str(&first)
            .map_err(|error| RouterError::Transport(error.to_string()))?;
        let subscription_id = match &reply_value["result"] {
            Value::String(id) => id.clone(),
            other => other.to_string(),
        };
        if subscription_id.is_empty() || subscription_id == "null" {
            return Err(RouterError::Transport("provider returned no subscription id".to_string()));
        }

        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let url = self.node_url.clone();
        let handle = tokio::spawn(async move {
            while let Some(next) = socket.next().await {
                match next {
                    Ok(WsMessage::Text(text)) => {
                        let Ok(value) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if sender.send(value).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
            debug!(%url, "subscription stream ended");
        });

        Ok((
            RelayReply { data: first.into_bytes(), metadata: vec![] },
            NodeSubscription { id: subscription_id, stream: receiver, handle },
        ))
    }
}

async fn into_relay_reply(response: reqwest::Response) -> Result<RelayReply, RouterError> {
    let metadata = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| Metadata { name: name.to_string(), value: value.to_string() })
        })
        .collect();
    let data = response
        .bytes()
        .await
        .map_err(|error| RouterError::Transport(error.to_string()))?
        .to_vec();
    Ok(RelayReply { data, metadata })
}

fn build_rest_url(node_url: &str, path: &str, query: &[(String, String)]) -> String {
    let mut url = format!("{}{}", node_url.trim_end_matches('/'), path);
    let mut separator = '?';
    for (key, value) in query {
        url.push(separator);
        url.push_str(key);
        url.push('=');
        url.push_str(value);
        separator = '&';
    }
    url
}

/// Dials a gRPC channel with bounded retries.
async fn dial_grpc(node_url: &str) -> Result<Channel, RouterError> {
    let endpoint = Endpoint::from_shared(node_url.to_string())
        .map_err(|error| RouterError::InvalidEndpoint(error.to_string()))?
        .connect_timeout(Duration::from_secs(2));
    let mut last_error = String::new();
    for attempt in 0..GRPC_DIAL_ATTEMPTS {
        match endpoint.connect().await {
            Ok(channel) => return Ok(channel),
            Err(error) => {
                warn!(%node_url, attempt, %error, "grpc dial failed");
                last_error = error.to_string();
            }
        }
        if attempt + 1 < GRPC_DIAL_ATTEMPTS {
            tokio::time::sleep(REDIAL_INTERVAL).await;
        }
    }
    Err(RouterError::Transport(last_error))
}

/// Pass-through codec: the router relays already-encoded protobuf frames.
#[derive(Debug, Clone, Copy, Default)]
struct RawCodec;

impl Codec for RawCodec {
    type Encode = Vec<u8>;
    type Decode = Vec<u8>;
    type Encoder = RawCoder;
    type Decoder = RawCoder;

    fn encoder(&mut self) -> Self::Encoder {
        RawCoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        RawCoder
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RawCoder;

impl Encoder for RawCoder {
    type Item = Vec<u8>;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        dst.put_slice(&item);
        Ok(())
    }
}

impl Decoder for RawCoder {
    type Item = Vec<u8>;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let remaining = src.remaining();
        Ok(Some(src.copy_to_bytes(remaining).to_vec()))
    }
}
