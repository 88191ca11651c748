use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use telemon_common::proto::metrics_client::MetricsClient;
use telemon_common::proto::{self, Ack, PingRequest, UpdateBatchRequest, UpdateRequest};
use telemon_common::types::Metric;
use telemon_common::{hash, REAL_IP_METADATA, SIGNATURE_METADATA};
use tokio_util::sync::CancellationToken;
use tonic::codec::CompressionEncoding;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::interceptor::InterceptedService;
use tonic::service::Interceptor;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Status};

use crate::error::{Result, TransportError};
use crate::retry::{self, RetryPolicy};
use crate::MetricsTransport;

/// Full method path signed for client-streaming calls, whose body is not
/// known when the call starts.
pub const STREAM_METHOD: &str = "/telemon.Metrics/StreamMetrics";

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);
const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bytes an outgoing call is signed over.
///
/// Set as a request extension; [`MetadataInterceptor`] turns it into the
/// `hashsha256` metadata.
#[derive(Debug, Clone)]
pub struct SigningPayload(pub Bytes);

/// Adds the agent's real IP and, with a key, the HMAC signature of the
/// request's [`SigningPayload`] to every outgoing call.
#[derive(Clone, Default)]
pub struct MetadataInterceptor {
    real_ip: Option<MetadataValue<Ascii>>,
    signing_key: Option<String>,
}

impl MetadataInterceptor {
    pub fn new(real_ip: Option<&str>) -> Result<Self> {
        let real_ip = real_ip
            .filter(|ip| !ip.is_empty())
            .map(|ip| {
                ip.parse::<MetadataValue<Ascii>>()
                    .map_err(|e| TransportError::Other(format!("invalid real IP {ip:?}: {e}")))
            })
            .transpose()?;
        Ok(Self {
            real_ip,
            signing_key: None,
        })
    }

    pub fn with_signing_key(mut self, key: Option<String>) -> Self {
        self.signing_key = key.filter(|k| !k.is_empty());
        self
    }
}

impl Interceptor for MetadataInterceptor {
    fn call(&mut self, mut request: Request<()>) -> std::result::Result<Request<()>, Status> {
        if let Some(ip) = &self.real_ip {
            request.metadata_mut().insert(REAL_IP_METADATA, ip.clone());
        }
        if let Some(key) = &self.signing_key {
            let payload = request
                .extensions()
                .get::<SigningPayload>()
                .ok_or_else(|| Status::internal("outgoing call has no signing payload"))?;
            let signature = hash::sign(&payload.0, key)
                .parse::<MetadataValue<Ascii>>()
                .map_err(|e| Status::internal(format!("invalid signature metadata: {e}")))?;
            request.metadata_mut().insert(SIGNATURE_METADATA, signature);
        }
        Ok(request)
    }
}

type Inner = MetricsClient<InterceptedService<Channel, MetadataInterceptor>>;

/// Builds the endpoint URI, choosing `https` when TLS is configured.
pub fn endpoint_uri(address: &str, tls: bool) -> String {
    let addr = address.trim();
    if addr.contains("://") {
        return addr.to_string();
    }
    let scheme = if tls { "https" } else { "http" };
    format!("{scheme}://{addr}")
}

fn check_ack(ack: Ack) -> Result<()> {
    if ack.success {
        Ok(())
    } else {
        Err(TransportError::Rejected(ack.error))
    }
}

/// Everything short of cancellation or a local failure is worth retrying.
fn grpc_retriable(err: &TransportError) -> bool {
    !err.is_terminal()
}

/// Client for the `telemon.Metrics` gRPC service.
///
/// The channel connects lazily and is shared by every call, so one
/// `GrpcClient` serves all dispatcher workers. [`MetricsTransport::close`]
/// drops it, which tears the connection down.
pub struct GrpcClient {
    channel: Mutex<Option<Channel>>,
    interceptor: MetadataInterceptor,
    retry: RetryPolicy,
    closing: CancellationToken,
}

impl GrpcClient {
    /// Configures a lazily connecting channel to `address`.
    ///
    /// With `tls_ca` the channel uses TLS and trusts the PEM certificate at
    /// that path. Must be called within a tokio runtime.
    pub fn connect_lazy(
        address: &str,
        timeout: Duration,
        tls_ca: Option<&Path>,
        real_ip: Option<&str>,
    ) -> Result<Self> {
        let mut endpoint = Endpoint::from_shared(endpoint_uri(address, tls_ca.is_some()))?
            .timeout(timeout)
            .connect_timeout(timeout)
            .http2_keep_alive_interval(KEEP_ALIVE_INTERVAL)
            .keep_alive_timeout(KEEP_ALIVE_TIMEOUT)
            .keep_alive_while_idle(true);

        if let Some(path) = tls_ca {
            let pem = std::fs::read(path).map_err(|source| TransportError::Certificate {
                path: path.display().to_string(),
                source,
            })?;
            let tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem));
            endpoint = endpoint.tls_config(tls)?;
        }

        Ok(Self::from_channel(endpoint.connect_lazy(), MetadataInterceptor::new(real_ip)?))
    }

    pub fn from_channel(channel: Channel, interceptor: MetadataInterceptor) -> Self {
        Self {
            channel: Mutex::new(Some(channel)),
            interceptor,
            retry: RetryPolicy::default(),
            closing: CancellationToken::new(),
        }
    }

    pub fn with_signing_key(mut self, key: Option<String>) -> Self {
        self.interceptor = self.interceptor.with_signing_key(key);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Ties the client to an outer shutdown signal. [`MetricsTransport::close`]
    /// cancels only the client's own child token, never `shutdown`.
    pub fn with_shutdown(mut self, shutdown: &CancellationToken) -> Self {
        self.closing = shutdown.child_token();
        self
    }

    /// Generated client over the shared channel, or `Closed` once the
    /// channel has been dropped.
    fn client(&self) -> Result<Inner> {
        let channel = self
            .channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TransportError::Closed)?;
        Ok(MetricsClient::with_interceptor(channel, self.interceptor.clone())
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.channel.lock().unwrap_or_else(PoisonError::into_inner).is_some() {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    fn request<T>(message: T, payload: &Bytes) -> Request<T> {
        let mut request = Request::new(message);
        request.extensions_mut().insert(SigningPayload(payload.clone()));
        request
    }

    async fn update_once(&self, message: &UpdateRequest, payload: &Bytes) -> Result<()> {
        let ack = self
            .client()?
            .update(Self::request(message.clone(), payload))
            .await?
            .into_inner();
        check_ack(ack)
    }

    async fn update_batch_once(&self, message: &UpdateBatchRequest, payload: &Bytes) -> Result<()> {
        let ack = self
            .client()?
            .update_batch(Self::request(message.clone(), payload))
            .await?
            .into_inner();
        check_ack(ack)
    }

    async fn stream_once(&self, metrics: &[proto::Metric]) -> Result<()> {
        let stream = tokio_stream::iter(metrics.to_vec());
        let payload = Bytes::from_static(STREAM_METHOD.as_bytes());
        let ack = self
            .client()?
            .stream_metrics(Self::request(stream, &payload))
            .await?
            .into_inner();
        check_ack(ack)
    }
}

#[async_trait]
impl MetricsTransport for GrpcClient {
    async fn update_metric(&self, metric: &Metric) -> Result<()> {
        self.ensure_open()?;
        let message = UpdateRequest {
            metric: Some(proto::Metric::from(metric)),
        };
        let payload = Bytes::from(message.encode_to_vec());
        let (message, payload) = (&message, &payload);
        retry::retry(&self.retry, &self.closing, grpc_retriable, move |_| {
            self.update_once(message, payload)
        })
        .await
    }

    async fn update_batch(&self, metrics: &[Metric]) -> Result<()> {
        if metrics.is_empty() {
            return Ok(());
        }
        self.ensure_open()?;

        let message = UpdateBatchRequest {
            metrics: metrics.iter().map(proto::Metric::from).collect(),
        };
        let payload = Bytes::from(message.encode_to_vec());
        let (message, payload) = (&message, &payload);
        retry::retry(&self.retry, &self.closing, grpc_retriable, move |_| {
            self.update_batch_once(message, payload)
        })
        .await?;

        tracing::debug!(count = metrics.len(), "Metrics delivered over gRPC");
        Ok(())
    }

    async fn stream_metrics(&self, metrics: &[Metric]) -> Result<()> {
        if metrics.is_empty() {
            return Ok(());
        }
        self.ensure_open()?;

        let messages: Vec<proto::Metric> = metrics.iter().map(proto::Metric::from).collect();
        let messages = messages.as_slice();
        retry::retry(&self.retry, &self.closing, grpc_retriable, move |_| {
            self.stream_once(messages)
        })
        .await?;

        tracing::debug!(count = metrics.len(), "Metrics streamed over gRPC");
        Ok(())
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn ping(&self) -> Result<()> {
        let message = PingRequest {};
        let payload = Bytes::from(message.encode_to_vec());
        let ack = self
            .client()?
            .ping(Self::request(message, &payload))
            .await?
            .into_inner();
        check_ack(ack)
    }

    async fn close(&self) -> Result<()> {
        self.closing.cancel();
        let channel = self.channel.lock().unwrap_or_else(PoisonError::into_inner).take();
        if channel.is_some() {
            tracing::debug!("gRPC channel closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_scheme_follows_tls() {
        assert_eq!(endpoint_uri("localhost:3200", false), "http://localhost:3200");
        assert_eq!(endpoint_uri("localhost:3200", true), "https://localhost:3200");
        assert_eq!(endpoint_uri("http://10.0.0.1:1", true), "http://10.0.0.1:1");
    }

    #[test]
    fn cancellation_and_local_failures_stop_grpc_retries() {
        assert!(grpc_retriable(&TransportError::Grpc(Status::internal("oops"))));
        assert!(grpc_retriable(&TransportError::Rejected("nope".to_string())));
        assert!(!grpc_retriable(&TransportError::Cancelled));
        assert!(!grpc_retriable(&TransportError::Closed));
    }

    #[test]
    fn interceptor_adds_real_ip() {
        let mut interceptor = MetadataInterceptor::new(Some("10.1.2.3")).unwrap();
        let request = interceptor.call(Request::new(())).unwrap();
        assert_eq!(request.metadata().get("x-real-ip").unwrap().to_str().unwrap(), "10.1.2.3");
        assert!(request.metadata().get("hashsha256").is_none());

        let mut empty = MetadataInterceptor::new(Some("")).unwrap();
        let request = empty.call(Request::new(())).unwrap();
        assert!(request.metadata().get("x-real-ip").is_none());
    }

    #[test]
    fn interceptor_signs_the_request_payload() {
        let mut interceptor = MetadataInterceptor::new(None)
            .unwrap()
            .with_signing_key(Some("secret".to_string()));
        let payload = Bytes::from_static(STREAM_METHOD.as_bytes());

        let request = interceptor.call(GrpcClient::request((), &payload)).unwrap();
        assert_eq!(
            request.metadata().get("hashsha256").unwrap().to_str().unwrap(),
            hash::sign(STREAM_METHOD.as_bytes(), "secret")
        );

        // A signing interceptor refuses calls it cannot sign.
        let status = interceptor.call(Request::new(())).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
    }

    #[tokio::test]
    async fn close_drops_the_channel() {
        let channel = Endpoint::from_static("http://127.0.0.1:1").connect_lazy();
        let client = GrpcClient::from_channel(channel, MetadataInterceptor::default());
        assert!(client.ensure_open().is_ok());

        client.close().await.unwrap();
        assert!(client.channel.lock().unwrap().is_none());
        assert!(matches!(client.ping().await, Err(TransportError::Closed)));
        assert!(matches!(
            client.stream_metrics(&[Metric::gauge("Load", 1.0)]).await,
            Err(TransportError::Closed)
        ));
    }
}
