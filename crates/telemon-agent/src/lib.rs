//! The telemon agent: periodic collection, batching and delivery.
//!
//! [`agent::Agent`] owns two tickers. The poll ticker runs the collectors
//! into a shared [`telemon_collector::store::MetricStore`]; the report ticker
//! snapshots the store into a [`telemon_common::types::Job`] and queues it for
//! the [`dispatcher::WorkerPool`], which sends it through whichever transport
//! the configuration selected.

pub mod agent;
pub mod config;
pub mod dispatcher;

pub use crate::agent::Agent;
pub use crate::config::AgentConfig;
pub use crate::dispatcher::{DeliveryStats, JobResult, WorkerPool};
