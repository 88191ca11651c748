//! Worker pool that hands jobs to the transport and reports the outcome.
//!
//! Workers share one bounded job queue and publish a [`JobResult`] per job
//! on a bounded result queue. A single [`collect_results`] task drains the
//! results; it only logs and counts, retries belong to the transport.

use std::sync::Arc;
use std::time::Duration;

use telemon_common::types::Job;
use telemon_transport::error::TransportError;
use telemon_transport::MetricsTransport;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long a worker waits on a full result queue once `stop` has fired.
const RESULT_GRACE: Duration = Duration::from_secs(1);

/// Outcome of delivering one job.
#[derive(Debug)]
pub struct JobResult {
    pub job: Job,
    pub error: Option<TransportError>,
}

impl JobResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Running totals kept by the result collector.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryStats {
    pub jobs_ok: u64,
    pub jobs_failed: u64,
    pub metrics_delivered: u64,
}

impl DeliveryStats {
    pub fn record(&mut self, result: &JobResult) {
        if result.is_ok() {
            self.jobs_ok += 1;
            self.metrics_delivered += result.job.len() as u64;
        } else {
            self.jobs_failed += 1;
        }
    }
}

/// Sends a job the cheapest way the transport supports.
async fn deliver(transport: &dyn MetricsTransport, job: &Job) -> Result<(), TransportError> {
    if transport.supports_streaming() {
        transport.stream_metrics(&job.metrics).await
    } else {
        transport.update_batch(&job.metrics).await
    }
}

/// Fixed set of worker tasks started once per agent run.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` workers reading from `jobs`.
    ///
    /// Workers exit once every job sender is dropped and the queue is empty.
    /// After `stop`, a full result queue blocks a worker for at most
    /// [`RESULT_GRACE`] per result.
    pub fn start(
        transport: Arc<dyn MetricsTransport>,
        size: usize,
        jobs: mpsc::Receiver<Job>,
        results: mpsc::Sender<JobResult>,
        stop: CancellationToken,
    ) -> Self {
        let jobs = Arc::new(Mutex::new(jobs));
        let workers = (1..=size)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    transport.clone(),
                    jobs.clone(),
                    results.clone(),
                    stop.clone(),
                ))
            })
            .collect();
        tracing::info!(workers = size, "Worker pool started");
        Self { workers }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Waits for every worker to exit.
    pub async fn join(self) {
        for handle in self.workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    transport: Arc<dyn MetricsTransport>,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    results: mpsc::Sender<JobResult>,
    stop: CancellationToken,
) {
    loop {
        // The lock is only contended by idle workers.
        let job = jobs.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        tracing::debug!(worker_id, job_id = job.id, count = job.len(), "Delivering job");
        let error = deliver(transport.as_ref(), &job).await.err();
        let result = JobResult { job, error };

        tokio::select! {
            biased;
            permit = results.reserve() => match permit {
                Ok(permit) => permit.send(result),
                Err(_) => {
                    tracing::debug!(worker_id, "Result queue closed");
                    break;
                }
            },
            _ = stop.cancelled() => {
                let job_id = result.job.id;
                match tokio::time::timeout(RESULT_GRACE, results.send(result)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        tracing::debug!(worker_id, "Result queue closed");
                        break;
                    }
                    Err(_) => tracing::warn!(worker_id, job_id, "Result queue full during shutdown, dropping result"),
                }
            }
        }
    }
    tracing::debug!(worker_id, "Worker stopped");
}

/// Drains `results` until every sender is gone, logging each outcome.
///
/// Workers hold the senders and exit once the job queue closes, so this
/// also ends on shutdown and counts results published after `stop`.
pub async fn collect_results(mut results: mpsc::Receiver<JobResult>) -> DeliveryStats {
    let mut stats = DeliveryStats::default();
    while let Some(result) = results.recv().await {
        log_result(&mut stats, result);
    }
    tracing::debug!(?stats, "Result collector stopped");
    stats
}

fn log_result(stats: &mut DeliveryStats, result: JobResult) {
    stats.record(&result);
    match &result.error {
        None => tracing::info!(job_id = result.job.id, count = result.job.len(), "Metrics sent"),
        Some(e) => tracing::error!(
            job_id = result.job.id,
            count = result.job.len(),
            error = %e,
            "Failed to send metrics"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use telemon_common::types::Metric;
    use telemon_transport::error::Result;

    #[derive(Default)]
    struct Recorder {
        streaming: bool,
        batches: AtomicUsize,
        streams: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MetricsTransport for Recorder {
        async fn update_batch(&self, _metrics: &[Metric]) -> Result<()> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TransportError::Status {
                    status: 400,
                    body: "bad batch".to_string(),
                });
            }
            Ok(())
        }

        async fn stream_metrics(&self, _metrics: &[Metric]) -> Result<()> {
            self.streams.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn supports_streaming(&self) -> bool {
            self.streaming
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn job(id: u64) -> Job {
        Job::new(id, vec![Metric::gauge("CPUload", 42.0), Metric::counter("requests", 7)])
    }

    async fn run_jobs(transport: Arc<Recorder>, jobs: Vec<Job>) -> Vec<JobResult> {
        let (job_tx, job_rx) = mpsc::channel(2);
        let (result_tx, mut result_rx) = mpsc::channel(jobs.len().max(1));
        let pool = WorkerPool::start(transport, 2, job_rx, result_tx, CancellationToken::new());

        for job in jobs {
            job_tx.send(job).await.unwrap();
        }
        drop(job_tx);
        pool.join().await;

        let mut results = Vec::new();
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }
        results
    }

    #[tokio::test]
    async fn single_job_produces_single_successful_result() {
        let results = run_jobs(Arc::new(Recorder::default()), vec![job(1)]).await;

        assert_eq!(results.len(), 1);
        assert!(results[0].error.is_none());
        assert_eq!(results[0].job.metrics.len(), 2);
    }

    #[tokio::test]
    async fn streaming_transport_gets_streams() {
        let transport = Arc::new(Recorder {
            streaming: true,
            ..Recorder::default()
        });
        let results = run_jobs(transport.clone(), (1..=4).map(job).collect()).await;

        assert_eq!(results.len(), 4);
        assert_eq!(transport.streams.load(Ordering::SeqCst), 4);
        assert_eq!(transport.batches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failures_are_reported_not_retried() {
        let transport = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let results = run_jobs(transport.clone(), vec![job(7)]).await;

        assert_eq!(transport.batches.load(Ordering::SeqCst), 1);
        assert!(matches!(
            results[0].error,
            Some(TransportError::Status { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn full_result_queue_does_not_block_shutdown() {
        let stop = CancellationToken::new();
        let (job_tx, job_rx) = mpsc::channel(4);
        let (result_tx, _result_rx) = mpsc::channel(1);
        let pool = WorkerPool::start(Arc::new(Recorder::default()), 2, job_rx, result_tx, stop.clone());

        for id in 1..=4 {
            job_tx.send(job(id)).await.unwrap();
        }
        drop(job_tx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.cancel();

        tokio::time::timeout(Duration::from_secs(5), pool.join()).await.unwrap();
    }

    #[tokio::test]
    async fn collector_counts_outcomes() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(JobResult { job: job(1), error: None }).await.unwrap();
        tx.send(JobResult {
            job: job(2),
            error: Some(TransportError::Cancelled),
        })
        .await
        .unwrap();
        drop(tx);

        let stats = collect_results(rx).await;
        assert_eq!(
            stats,
            DeliveryStats {
                jobs_ok: 1,
                jobs_failed: 1,
                metrics_delivered: 2,
            }
        );
    }

    #[tokio::test]
    async fn results_finished_after_stop_are_counted() {
        let stop = CancellationToken::new();
        let (job_tx, job_rx) = mpsc::channel(2);
        let (result_tx, result_rx) = mpsc::channel(2);
        let transport = Arc::new(Recorder::default());
        let pool = WorkerPool::start(transport.clone(), 2, job_rx, result_tx, stop.clone());
        let collector = tokio::spawn(collect_results(result_rx));

        stop.cancel();
        // Jobs still queued at shutdown are delivered and their results kept.
        job_tx.send(job(1)).await.unwrap();
        job_tx.send(job(2)).await.unwrap();
        drop(job_tx);
        pool.join().await;

        let stats = tokio::time::timeout(Duration::from_secs(5), collector)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(transport.batches.load(Ordering::SeqCst), 2);
        assert_eq!(stats.jobs_ok, 2);
        assert_eq!(stats.metrics_delivered, 4);
    }
}
