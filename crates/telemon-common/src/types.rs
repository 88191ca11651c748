use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::proto;

/// Value carried by a [`Metric`].
///
/// Gauges are last-write-wins snapshots, counters are accumulated deltas.
/// On the wire the variant becomes the `type` field and the payload becomes
/// either `value` or `delta`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricValue {
    Gauge { value: f64 },
    Counter { delta: i64 },
}

/// A single named metric sample.
///
/// # Examples
///
/// ```
/// use telemon_common::types::Metric;
///
/// let m = Metric::counter("PollCount", 3);
/// let json = serde_json::to_string(&m).unwrap();
/// assert_eq!(json, r#"{"id":"PollCount","type":"counter","delta":3}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    #[serde(rename = "id")]
    pub name: String,
    #[serde(flatten)]
    pub value: MetricValue,
}

impl Metric {
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Gauge { value },
        }
    }

    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Counter { delta },
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self.value {
            MetricValue::Gauge { .. } => MetricKind::Gauge,
            MetricValue::Counter { .. } => MetricKind::Counter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Counter => write!(f, "counter"),
        }
    }
}

impl From<&Metric> for proto::Metric {
    fn from(metric: &Metric) -> Self {
        let kind = match metric.value {
            MetricValue::Gauge { value } => proto::metric::Kind::Gauge(value),
            MetricValue::Counter { delta } => proto::metric::Kind::Counter(delta),
        };
        proto::Metric {
            id: metric.name.clone(),
            kind: Some(kind),
        }
    }
}

impl TryFrom<proto::Metric> for Metric {
    type Error = String;

    fn try_from(metric: proto::Metric) -> Result<Self, Self::Error> {
        if metric.id.is_empty() {
            return Err("metric id is required".to_string());
        }
        match metric.kind {
            Some(proto::metric::Kind::Gauge(value)) => Ok(Metric::gauge(metric.id, value)),
            Some(proto::metric::Kind::Counter(delta)) => Ok(Metric::counter(metric.id, delta)),
            None => Err(format!("metric {} has no value", metric.id)),
        }
    }
}

/// One atomic batch of metrics captured at a single report tick.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub metrics: Vec<Metric>,
}

impl Job {
    pub fn new(id: u64, metrics: Vec<Metric>) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            metrics,
        }
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
