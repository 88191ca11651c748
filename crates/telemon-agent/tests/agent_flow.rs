use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use telemon_agent::{Agent, AgentConfig, DeliveryStats};
use telemon_collector::sampler::Sampler;
use telemon_collector::store::{MetricStore, POLL_COUNT};
use telemon_collector::Collector;
use telemon_common::types::{Metric, MetricValue};
use telemon_transport::error::TransportError;
use telemon_transport::{build_client, MetricsTransport};
use tokio_util::sync::CancellationToken;

/// Emits one gauge and bumps the poll counter on every round.
struct Ticking;

impl Collector for Ticking {
    fn name(&self) -> &str {
        "ticking"
    }

    fn collect(&mut self) -> anyhow::Result<Vec<Metric>> {
        Ok(vec![Metric::gauge("Load", 1.0), Metric::counter(POLL_COUNT, 1)])
    }
}

#[derive(Default)]
struct Recorder {
    fail: bool,
    batches: Mutex<Vec<Vec<Metric>>>,
}

#[async_trait]
impl MetricsTransport for Recorder {
    async fn update_batch(&self, metrics: &[Metric]) -> telemon_transport::error::Result<()> {
        self.batches.lock().unwrap().push(metrics.to_vec());
        if self.fail {
            return Err(TransportError::Status {
                status: 503,
                body: "down".to_string(),
            });
        }
        Ok(())
    }

    async fn stream_metrics(&self, _metrics: &[Metric]) -> telemon_transport::error::Result<()> {
        Err(TransportError::NotSupported("recorder"))
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn ping(&self) -> telemon_transport::error::Result<()> {
        Ok(())
    }

    async fn close(&self) -> telemon_transport::error::Result<()> {
        Ok(())
    }
}

fn agent(transport: Arc<dyn MetricsTransport>, stop: &CancellationToken) -> Result<Agent> {
    let sampler = Sampler::with_collectors(
        Arc::new(tokio::sync::Mutex::new(MetricStore::new())),
        stop.clone(),
        Box::new(Ticking),
        Vec::new(),
    );
    Ok(Agent::new(&AgentConfig::default(), transport, stop.clone())?
        .with_sampler(sampler)
        .with_intervals(Duration::from_millis(10), Duration::from_millis(60)))
}

async fn run_for(agent: Agent, stop: CancellationToken, duration: Duration) -> Result<DeliveryStats> {
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        stop.cancel();
    });
    Ok(tokio::time::timeout(Duration::from_secs(5), agent.run()).await?)
}

fn poll_counts(batches: &[Vec<Metric>]) -> Vec<i64> {
    batches
        .iter()
        .flat_map(|batch| batch.iter())
        .filter(|m| m.name == POLL_COUNT)
        .filter_map(|m| match m.value {
            MetricValue::Counter { delta } => Some(delta),
            MetricValue::Gauge { .. } => None,
        })
        .collect()
}

#[tokio::test]
async fn agent_reports_snapshots_until_stopped() -> Result<()> {
    let stop = CancellationToken::new();
    let transport = Arc::new(Recorder::default());
    let agent = agent(transport.clone(), &stop)?;

    let stats = run_for(agent, stop, Duration::from_millis(400)).await?;

    let batches = transport.batches.lock().unwrap().clone();
    assert!(stats.jobs_ok >= 2, "{stats:?}");
    assert_eq!(stats.jobs_failed, 0);
    // Every delivery is counted, including ones finishing after the stop.
    assert_eq!(stats.jobs_ok as usize, batches.len());
    assert_eq!(stats.metrics_delivered as usize, batches.iter().map(Vec::len).sum::<usize>());
    for batch in &batches {
        assert!(batch.contains(&Metric::gauge("Load", 1.0)));
    }

    // Each snapshot hands off the polls since the previous one.
    let counts = poll_counts(&batches);
    assert_eq!(counts.len(), batches.len());
    assert!(counts.iter().all(|&delta| delta >= 1), "{counts:?}");
    Ok(())
}

#[tokio::test]
async fn delivery_failures_do_not_stop_the_cycle() -> Result<()> {
    let stop = CancellationToken::new();
    let transport = Arc::new(Recorder {
        fail: true,
        ..Recorder::default()
    });
    let agent = agent(transport.clone(), &stop)?;

    let stats = run_for(agent, stop, Duration::from_millis(400)).await?;

    assert_eq!(stats.jobs_ok, 0);
    assert!(stats.jobs_failed >= 2, "{stats:?}");
    assert_eq!(stats.metrics_delivered, 0);
    Ok(())
}

#[tokio::test]
async fn nothing_is_sent_before_the_first_report_tick() -> Result<()> {
    let stop = CancellationToken::new();
    let transport = Arc::new(Recorder::default());
    let agent = agent(transport.clone(), &stop)?.with_intervals(Duration::from_millis(10), Duration::from_secs(60));

    let stats = run_for(agent, stop, Duration::from_millis(100)).await?;

    assert_eq!(stats, DeliveryStats::default());
    assert!(transport.batches.lock().unwrap().is_empty());
    Ok(())
}

async fn record_update(State(bodies): State<Arc<Mutex<Vec<Bytes>>>>, body: Bytes) -> StatusCode {
    bodies.lock().unwrap().push(body);
    StatusCode::OK
}

async fn spawn_sink(bodies: Arc<Mutex<Vec<Bytes>>>) -> Result<SocketAddr> {
    let app = Router::new()
        .route("/updates", post(record_update))
        .route("/ping", get(|| async { StatusCode::OK }))
        .with_state(bodies);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(addr)
}

#[tokio::test]
async fn agent_delivers_json_batches_to_http_sink() -> Result<()> {
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let addr = spawn_sink(bodies.clone()).await?;

    let config = AgentConfig::from_toml(&format!(
        "server_address = \"{addr}\"\ncompress = false\nmax_retries = 0\n"
    ))?;
    let stop = CancellationToken::new();
    let transport = Arc::new(build_client(&config.to_client_config(), stop.clone())?);
    transport.ping().await?;

    let stats = run_for(agent(transport.clone(), &stop)?, stop, Duration::from_millis(400)).await?;
    transport.close().await?;

    let bodies = bodies.lock().unwrap().clone();
    assert!(stats.jobs_ok >= 2, "{stats:?}");
    assert_eq!(stats.jobs_ok as usize, bodies.len());
    for body in &bodies {
        let metrics: Vec<Metric> = serde_json::from_slice(body)?;
        assert!(metrics.contains(&Metric::gauge("Load", 1.0)));
    }
    Ok(())
}
