//! Metric collection for the telemon agent.
//!
//! Each [`Collector`] gathers one family of metrics and returns them as
//! [`Metric`]s. The [`sampler::Sampler`] drives the collectors on every poll
//! tick and folds their output into the shared [`store::MetricStore`].

pub mod alloc;
pub mod cpu;
pub mod memory;
pub mod runtime;
pub mod sampler;
pub mod store;

use std::time::Duration;

use anyhow::Result;
use telemon_common::types::Metric;

/// A metric source polled by the agent.
///
/// Gauges returned by `collect` overwrite earlier values in the store,
/// counters are added to the running total.
pub trait Collector: Send + Sync {
    /// Collector name used in log fields (e.g. `"cpu"`).
    fn name(&self) -> &str;

    /// How long the caller should wait before `collect` returns meaningful
    /// values. Collectors that measure over a window return the remainder of
    /// that window.
    fn settle_time(&self) -> Duration {
        Duration::ZERO
    }

    /// Samples the source.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system query fails. Implementations
    /// may still have produced partial data, which the caller keeps.
    fn collect(&mut self) -> Result<Vec<Metric>>;
}
