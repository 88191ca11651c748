//! Delivery of metric batches to a remote sink.
//!
//! Two interchangeable transports implement [`MetricsTransport`]:
//! [`http::HttpClient`] posts signed, optionally encrypted and gzipped JSON
//! arrays, [`grpc::GrpcClient`] uses the `telemon.Metrics` service with
//! unary and client-streaming calls. [`factory::build_client`] picks one
//! from configuration and returns it as a [`factory::TransportClient`].

pub mod compress;
pub mod error;
pub mod factory;
pub mod grpc;
pub mod http;
pub mod retry;

use async_trait::async_trait;
use telemon_common::types::Metric;

use crate::error::Result;

pub use crate::factory::{build_client, ClientConfig, TransportClient};

/// Uniform send/ping/close contract over the HTTP and gRPC sinks.
///
/// Implementations are safe to share between dispatcher workers.
#[async_trait]
pub trait MetricsTransport: Send + Sync {
    /// Sends one metric.
    async fn update_metric(&self, metric: &Metric) -> Result<()> {
        self.update_batch(std::slice::from_ref(metric)).await
    }

    /// Sends a batch in one logical call, retrying transient failures.
    /// An empty batch succeeds without touching the network.
    async fn update_batch(&self, metrics: &[Metric]) -> Result<()>;

    /// Sends a batch over a client stream, one message per metric.
    ///
    /// Transports without streaming return
    /// [`error::TransportError::NotSupported`] for non-empty batches; check
    /// [`MetricsTransport::supports_streaming`] first.
    async fn stream_metrics(&self, metrics: &[Metric]) -> Result<()>;

    fn supports_streaming(&self) -> bool;

    /// Checks that the sink is reachable.
    async fn ping(&self) -> Result<()>;

    /// Releases transport resources.
    async fn close(&self) -> Result<()>;
}
