// ── Metrics service ──
//
// Process counters plus bounded histories of metric samples, recorded
// errors and raised alerts. Constructed once and shared by `Arc`; every
// component that records anything receives it explicitly.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use strum::Display;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::correlation::{CorrelationGuard, CorrelationTracker};
use crate::lock;
use crate::ring::RingBuffer;

const DEFAULT_METRIC_CAPACITY: usize = 1000;
const DEFAULT_ERROR_CAPACITY: usize = 100;
const DEFAULT_ALERT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricRecord {
    pub name: String,
    pub value: f64,
    pub tags: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub source: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub severity: Severity,
    pub source: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
}

/// Point-in-time copy of everything the service holds.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub metrics: Vec<MetricRecord>,
    pub errors: Vec<ErrorRecord>,
    pub alerts: Vec<Alert>,
}

#[derive(Debug)]
pub struct MetricsService {
    counters: DashMap<String, u64>,
    metrics: Mutex<RingBuffer<MetricRecord>>,
    errors: Mutex<RingBuffer<ErrorRecord>>,
    alerts: Mutex<RingBuffer<Alert>>,
    correlation: Arc<CorrelationTracker>,
}

impl Default for MetricsService {
    fn default() -> Self {
        Self::with_capacity(
            DEFAULT_METRIC_CAPACITY,
            DEFAULT_ERROR_CAPACITY,
            DEFAULT_ALERT_CAPACITY,
        )
    }
}

impl MetricsService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_capacity(metrics: usize, errors: usize, alerts: usize) -> Self {
        Self {
            counters: DashMap::new(),
            metrics: Mutex::new(RingBuffer::new(metrics)),
            errors: Mutex::new(RingBuffer::new(errors)),
            alerts: Mutex::new(RingBuffer::new(alerts)),
            correlation: Arc::new(CorrelationTracker::new()),
        }
    }

    // ── Counters ─────────────────────────────────────────────────────

    pub fn increment(&self, counter: &str, by: u64) {
        *self.counters.entry(counter.to_owned()).or_insert(0) += by;
    }

    pub fn counter(&self, counter: &str) -> u64 {
        self.counters.get(counter).map_or(0, |v| *v)
    }

    // ── Samples ──────────────────────────────────────────────────────

    /// Record a metric sample tagged with the current correlation id.
    pub fn record<'a>(
        &self,
        name: &str,
        value: f64,
        tags: impl IntoIterator<Item = (&'a str, String)>,
    ) {
        let record = MetricRecord {
            name: name.to_owned(),
            value,
            tags: tags
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
            timestamp: Utc::now(),
            correlation_id: self.current_correlation_id(),
        };
        lock(&self.metrics).push(record);
    }

    pub fn record_error(&self, source: &str, message: impl Into<String>) {
        let message = message.into();
        self.increment("errors.total", 1);
        lock(&self.errors).push(ErrorRecord {
            source: source.to_owned(),
            message,
            timestamp: Utc::now(),
            correlation_id: self.current_correlation_id(),
        });
    }

    /// Raise an alert. High severity logs at `error`, medium at `warn`.
    pub fn alert(&self, severity: Severity, source: &str, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::High => error!(source, %severity, "{message}"),
            Severity::Medium => warn!(source, %severity, "{message}"),
            Severity::Low => info!(source, %severity, "{message}"),
        }
        self.increment(&format!("alerts.{severity}"), 1);
        lock(&self.alerts).push(Alert {
            severity,
            source: source.to_owned(),
            message,
            timestamp: Utc::now(),
            correlation_id: self.current_correlation_id(),
        });
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Samples named `name`, oldest first.
    pub fn samples(&self, name: &str) -> Vec<MetricRecord> {
        lock(&self.metrics)
            .iter()
            .filter(|m| m.name == name)
            .cloned()
            .collect()
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        lock(&self.errors).to_vec()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        lock(&self.alerts).to_vec()
    }

    pub fn alerts_at_least(&self, severity: Severity) -> Vec<Alert> {
        lock(&self.alerts)
            .iter()
            .filter(|a| a.severity >= severity)
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .iter()
                .map(|r| (r.key().clone(), *r.value()))
                .collect(),
            metrics: lock(&self.metrics).to_vec(),
            errors: self.errors(),
            alerts: self.alerts(),
        }
    }

    // ── Correlation ──────────────────────────────────────────────────

    pub fn correlation(&self) -> &Arc<CorrelationTracker> {
        &self.correlation
    }

    /// Shorthand for opening a correlation context on the shared tracker.
    pub fn begin(&self, operation: impl Into<String>) -> CorrelationGuard {
        self.correlation.begin(operation, [])
    }

    pub fn current_correlation_id(&self) -> Option<Uuid> {
        self.correlation.current().map(|c| c.id)
    }
}
