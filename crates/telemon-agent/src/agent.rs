use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use telemon_collector::sampler::Sampler;
use telemon_collector::store::MetricStore;
use telemon_common::types::Job;
use telemon_transport::MetricsTransport;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::dispatcher::{collect_results, DeliveryStats, WorkerPool};

/// Polls metrics into the store and reports snapshots through the worker
/// pool until `stop` is cancelled.
pub struct Agent {
    poll_interval: Duration,
    report_interval: Duration,
    workers: usize,
    queue_size: usize,
    sampler: Sampler,
    transport: Arc<dyn MetricsTransport>,
    stop: CancellationToken,
}

impl Agent {
    pub fn new(config: &AgentConfig, transport: Arc<dyn MetricsTransport>, stop: CancellationToken) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(Mutex::new(MetricStore::new()));
        Ok(Self {
            poll_interval: config.poll_interval(),
            report_interval: config.report_interval(),
            workers: config.workers,
            queue_size: config.queue_size(),
            sampler: Sampler::new(store, stop.clone()),
            transport,
            stop,
        })
    }

    /// Replaces the default collectors. The sampler should share the agent's
    /// stop token.
    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = sampler;
        self
    }

    /// Intervals in whole seconds are too coarse for tests.
    pub fn with_intervals(mut self, poll: Duration, report: Duration) -> Self {
        self.poll_interval = poll;
        self.report_interval = report;
        self
    }

    pub fn store(&self) -> Arc<Mutex<MetricStore>> {
        self.sampler.store().clone()
    }

    /// Runs until `stop` is cancelled and every task has finished.
    pub async fn run(self) -> DeliveryStats {
        let Agent {
            poll_interval,
            report_interval,
            workers,
            queue_size,
            sampler,
            transport,
            stop,
        } = self;

        let (job_tx, job_rx) = mpsc::channel(queue_size);
        let (result_tx, result_rx) = mpsc::channel(queue_size);
        let pool = WorkerPool::start(transport, workers, job_rx, result_tx, stop.clone());
        let collector = tokio::spawn(collect_results(result_rx));

        let store = sampler.store().clone();
        sampler.reset_metrics().await;

        tracing::info!(
            poll_secs = poll_interval.as_secs_f64(),
            report_secs = report_interval.as_secs_f64(),
            workers,
            queue_size,
            "Agent started"
        );

        let poll = tokio::spawn(poll_loop(sampler, poll_interval, stop.clone()));
        let report = tokio::spawn(report_loop(store, report_interval, job_tx, stop.clone()));

        for (task, handle) in [("poll", poll), ("report", report)] {
            if let Err(e) = handle.await {
                tracing::error!(task, error = %e, "Agent task failed");
            }
        }
        pool.join().await;

        let stats = match collector.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "Result collector failed");
                DeliveryStats::default()
            }
        };
        tracing::info!("Agent stopped");
        stats
    }
}

async fn poll_loop(mut sampler: Sampler, period: Duration, stop: CancellationToken) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                sampler.collect_runtime_metrics().await;
                sampler.collect_additional_metrics().await;
            }
            _ = stop.cancelled() => break,
        }
    }
    tracing::debug!("Poll loop stopped");
}

/// Snapshots the store every `period` and queues the result as a job.
///
/// Blocks on a full queue, which throttles reporting to what the workers can
/// deliver. Dropping `jobs` on exit closes the queue for the workers.
async fn report_loop(
    store: Arc<Mutex<MetricStore>>,
    period: Duration,
    jobs: mpsc::Sender<Job>,
    stop: CancellationToken,
) {
    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut next_id: u64 = 1;

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = stop.cancelled() => break,
        }

        let metrics = store.lock().await.snapshot();
        if metrics.is_empty() {
            tracing::debug!("Nothing collected yet, skipping report");
            continue;
        }

        let job = Job::new(next_id, metrics);
        next_id += 1;
        tracing::debug!(job_id = job.id, count = job.len(), "Queueing job");

        tokio::select! {
            biased;
            sent = jobs.send(job) => {
                if sent.is_err() {
                    tracing::warn!("Job queue closed");
                    break;
                }
            }
            _ = stop.cancelled() => break,
        }
    }
    tracing::debug!("Report loop stopped");
}
