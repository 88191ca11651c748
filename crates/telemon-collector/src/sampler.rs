use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cpu::CpuCollector;
use crate::memory::MemoryCollector;
use crate::runtime::RuntimeCollector;
use crate::store::MetricStore;
use crate::Collector;

/// Drives the collectors on each poll tick and writes into the shared store.
///
/// Every operation is a no-op once `shutdown` is cancelled, so a draining
/// agent does not spend time sampling data nobody will send.
pub struct Sampler {
    store: Arc<Mutex<MetricStore>>,
    runtime: Box<dyn Collector>,
    host: Vec<Box<dyn Collector>>,
    shutdown: CancellationToken,
}

impl Sampler {
    pub fn new(store: Arc<Mutex<MetricStore>>, shutdown: CancellationToken) -> Self {
        Self::with_collectors(
            store,
            shutdown,
            Box::new(RuntimeCollector::new()),
            vec![Box::new(MemoryCollector::new()), Box::new(CpuCollector::new())],
        )
    }

    pub fn with_collectors(
        store: Arc<Mutex<MetricStore>>,
        shutdown: CancellationToken,
        runtime: Box<dyn Collector>,
        host: Vec<Box<dyn Collector>>,
    ) -> Self {
        Self {
            store,
            runtime,
            host,
            shutdown,
        }
    }

    pub fn store(&self) -> &Arc<Mutex<MetricStore>> {
        &self.store
    }

    /// Samples process, allocator and scheduler statistics and bumps
    /// `PollCount`.
    pub async fn collect_runtime_metrics(&mut self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        match self.runtime.collect() {
            Ok(metrics) => {
                tracing::debug!(count = metrics.len(), "Collected runtime metrics");
                self.store.lock().await.apply(metrics);
            }
            Err(e) => {
                tracing::warn!(collector = self.runtime.name(), error = %e, "Collection failed");
            }
        }
    }

    /// Samples host memory and per-core CPU utilization.
    ///
    /// Waits for the CPU measurement window first; the wait ends early on
    /// shutdown. A failing collector is logged and skipped, the others still
    /// write their values.
    pub async fn collect_additional_metrics(&mut self) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let settle = self.host.iter().map(|c| c.settle_time()).max().unwrap_or_default();
        if !settle.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(settle) => {}
                _ = self.shutdown.cancelled() => return,
            }
        }

        let mut collected = Vec::new();
        for collector in &mut self.host {
            match collector.collect() {
                Ok(metrics) => collected.extend(metrics),
                Err(e) => tracing::warn!(collector = collector.name(), error = %e, "Collection failed"),
            }
        }

        tracing::debug!(count = collected.len(), "Collected host metrics");
        self.store.lock().await.apply(collected);
    }

    /// Clears every gauge and counter.
    pub async fn reset_metrics(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.store.lock().await.reset();
    }
}
