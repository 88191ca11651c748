//! Shared building blocks for the telemon agent and its sinks.
//!
//! - [`types`]: the metric data model and the job/batch types moved between
//!   the collector, the dispatcher and the transports.
//! - [`hash`]: HMAC-SHA256 request signing.
//! - [`crypto`]: RSA-OAEP chunked payload encryption.
//! - [`proto`]: generated gRPC bindings for the `telemon.Metrics` service.

pub mod crypto;
pub mod error;
pub mod hash;
pub mod types;

pub mod proto {
    #![allow(clippy::pedantic)]
    #![allow(clippy::missing_errors_doc)]
    #![allow(clippy::doc_markdown)]
    #![allow(clippy::default_trait_access)]
    tonic::include_proto!("telemon");
}

/// HTTP header carrying the hex HMAC-SHA256 of the request body.
pub const SIGNATURE_HEADER: &str = "HashSHA256";

/// gRPC metadata key carrying the signature (metadata keys are lowercase).
pub const SIGNATURE_METADATA: &str = "hashsha256";

/// HTTP header set to `true` when the body is a chunked RSA frame.
pub const ENCRYPTED_HEADER: &str = "Content-Encrypted";

/// Header with the agent's advertised IP.
pub const REAL_IP_HEADER: &str = "X-Real-IP";

/// gRPC metadata key with the agent's advertised IP.
pub const REAL_IP_METADATA: &str = "x-real-ip";
