// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide metrics: counters, gauges, histograms with label sets,
//! and Prometheus text exposition.
//!
//! Metric handles are cheap clones around shared state; recording never
//! suspends. The registry renders everything it has seen on demand —
//! the embedding layer decides where (or whether) to mount the output.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Sorted label pairs; identical label sets map to the same series.
type LabelKey = Vec<(String, String)>;

fn label_key(labels: &[(&str, &str)]) -> LabelKey {
    let mut key: LabelKey = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    key.sort();
    key
}

fn format_labels(key: &LabelKey) -> String {
    if key.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = key
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("{{{}}}", pairs.join(","))
}

/// Render a float the way Prometheus expects (no exponent for +Inf).
fn format_value(v: f64) -> String {
    if v == f64::INFINITY {
        "+Inf".to_string()
    } else {
        format!("{v}")
    }
}

struct Series<V> {
    name: String,
    help: String,
    values: Mutex<BTreeMap<LabelKey, V>>,
}

/// Monotonically increasing counter.
#[derive(Clone)]
pub struct Counter {
    inner: Arc<Series<f64>>,
}

impl Counter {
    fn new(name: &str, help: &str) -> Self {
        Self {
            inner: Arc::new(Series {
                name: name.to_string(),
                help: help.to_string(),
                values: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(1.0, labels);
    }

    pub fn add(&self, value: f64, labels: &[(&str, &str)]) {
        let mut values = self.inner.values.lock();
        *values.entry(label_key(labels)).or_insert(0.0) += value;
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> f64 {
        self.inner
            .values
            .lock()
            .get(&label_key(labels))
            .copied()
            .unwrap_or(0.0)
    }

    fn render(&self, out: &mut String) {
        let name = &self.inner.name;
        out.push_str(&format!("# HELP {name} {}\n", self.inner.help));
        out.push_str(&format!("# TYPE {name} counter\n"));
        for (key, value) in self.inner.values.lock().iter() {
            out.push_str(&format!("{name}{} {}\n", format_labels(key), format_value(*value)));
        }
    }
}

/// Gauge that can move both ways.
#[derive(Clone)]
pub struct Gauge {
    inner: Arc<Series<f64>>,
}

impl Gauge {
    fn new(name: &str, help: &str) -> Self {
        Self {
            inner: Arc::new(Series {
                name: name.to_string(),
                help: help.to_string(),
                values: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn set(&self, value: f64, labels: &[(&str, &str)]) {
        self.inner.values.lock().insert(label_key(labels), value);
    }

    pub fn add(&self, value: f64, labels: &[(&str, &str)]) {
        let mut values = self.inner.values.lock();
        *values.entry(label_key(labels)).or_insert(0.0) += value;
    }

    pub fn sub(&self, value: f64, labels: &[(&str, &str)]) {
        self.add(-value, labels);
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> f64 {
        self.inner
            .values
            .lock()
            .get(&label_key(labels))
            .copied()
            .unwrap_or(0.0)
    }

    fn render(&self, out: &mut String) {
        let name = &self.inner.name;
        out.push_str(&format!("# HELP {name} {}\n", self.inner.help));
        out.push_str(&format!("# TYPE {name} gauge\n"));
        for (key, value) in self.inner.values.lock().iter() {
            out.push_str(&format!("{name}{} {}\n", format_labels(key), format_value(*value)));
        }
    }
}

#[derive(Clone, Default)]
struct HistogramData {
    bucket_counts: Vec<u64>,
    sum: f64,
    count: u64,
}

/// Histogram with fixed buckets.
#[derive(Clone)]
pub struct Histogram {
    inner: Arc<Series<HistogramData>>,
    buckets: Arc<Vec<f64>>,
}

/// Default buckets tuned for sub-second message processing latencies.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Default buckets for message sizes up to 1 MiB.
pub const SIZE_BUCKETS: &[f64] = &[
    128.0, 512.0, 1024.0, 4096.0, 16384.0, 65536.0, 262_144.0, 1_048_576.0,
];

impl Histogram {
    fn new(name: &str, help: &str, buckets: &[f64]) -> Self {
        Self {
            inner: Arc::new(Series {
                name: name.to_string(),
                help: help.to_string(),
                values: Mutex::new(BTreeMap::new()),
            }),
            buckets: Arc::new(buckets.to_vec()),
        }
    }

    pub fn observe(&self, value: f64, labels: &[(&str, &str)]) {
        let mut values = self.inner.values.lock();
        let data = values.entry(label_key(labels)).or_insert_with(|| HistogramData {
            bucket_counts: vec![0; self.buckets.len()],
            sum: 0.0,
            count: 0,
        });
        data.sum += value;
        data.count += 1;
        for (i, bound) in self.buckets.iter().enumerate() {
            if value <= *bound {
                data.bucket_counts[i] += 1;
            }
        }
    }

    pub fn count(&self, labels: &[(&str, &str)]) -> u64 {
        self.inner
            .values
            .lock()
            .get(&label_key(labels))
            .map(|d| d.count)
            .unwrap_or(0)
    }

    pub fn sum(&self, labels: &[(&str, &str)]) -> f64 {
        self.inner
            .values
            .lock()
            .get(&label_key(labels))
            .map(|d| d.sum)
            .unwrap_or(0.0)
    }

    fn render(&self, out: &mut String) {
        let name = &self.inner.name;
        out.push_str(&format!("# HELP {name} {}\n", self.inner.help));
        out.push_str(&format!("# TYPE {name} histogram\n"));
        for (key, data) in self.inner.values.lock().iter() {
            for (i, bound) in self.buckets.iter().enumerate() {
                let mut bucket_key = key.clone();
                bucket_key.push(("le".to_string(), format_value(*bound)));
                bucket_key.sort();
                out.push_str(&format!(
                    "{name}_bucket{} {}\n",
                    format_labels(&bucket_key),
                    data.bucket_counts[i]
                ));
            }
            let mut inf_key = key.clone();
            inf_key.push(("le".to_string(), "+Inf".to_string()));
            inf_key.sort();
            out.push_str(&format!(
                "{name}_bucket{} {}\n",
                format_labels(&inf_key),
                data.count
            ));
            out.push_str(&format!("{name}_sum{} {}\n", format_labels(key), format_value(data.sum)));
            out.push_str(&format!("{name}_count{} {}\n", format_labels(key), data.count));
        }
    }
}

enum Metric {
    Counter(Counter),
    Gauge(Gauge),
    Histogram(Histogram),
}

/// Registry of every metric the process exports.
///
/// Lookup is get-or-register so call sites stay declarative; registering
/// the same name with a different kind returns a detached handle rather
/// than corrupting the existing series.
pub struct MetricsRegistry {
    prefix: String,
    metrics: RwLock<BTreeMap<String, Metric>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_prefix("mw")
    }

    pub fn with_prefix(prefix: &str) -> Self {
        Self { prefix: prefix.to_string(), metrics: RwLock::new(BTreeMap::new()) }
    }

    fn full_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}_{name}", self.prefix)
        }
    }

    pub fn counter(&self, name: &str, help: &str) -> Counter {
        let full = self.full_name(name);
        if let Some(Metric::Counter(c)) = self.metrics.read().get(&full) {
            return c.clone();
        }
        let mut metrics = self.metrics.write();
        match metrics
            .entry(full.clone())
            .or_insert_with(|| Metric::Counter(Counter::new(&full, help)))
        {
            Metric::Counter(c) => c.clone(),
            _ => Counter::new(&full, help),
        }
    }

    pub fn gauge(&self, name: &str, help: &str) -> Gauge {
        let full = self.full_name(name);
        if let Some(Metric::Gauge(g)) = self.metrics.read().get(&full) {
            return g.clone();
        }
        let mut metrics = self.metrics.write();
        match metrics
            .entry(full.clone())
            .or_insert_with(|| Metric::Gauge(Gauge::new(&full, help)))
        {
            Metric::Gauge(g) => g.clone(),
            _ => Gauge::new(&full, help),
        }
    }

    pub fn histogram(&self, name: &str, help: &str, buckets: &[f64]) -> Histogram {
        let full = self.full_name(name);
        if let Some(Metric::Histogram(h)) = self.metrics.read().get(&full) {
            return h.clone();
        }
        let mut metrics = self.metrics.write();
        match metrics
            .entry(full.clone())
            .or_insert_with(|| Metric::Histogram(Histogram::new(&full, help, buckets)))
        {
            Metric::Histogram(h) => h.clone(),
            _ => Histogram::new(&full, help, buckets),
        }
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for metric in self.metrics.read().values() {
            match metric {
                Metric::Counter(c) => c.render(&mut out),
                Metric::Gauge(g) => g.render(&mut out),
                Metric::Histogram(h) => h.render(&mut out),
            }
        }
        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The default metric set recorded by the engine.
///
/// Built once per engine and shared by hosts and adapters.
pub struct EngineMetrics {
    pub registry: Arc<MetricsRegistry>,
    /// `{host, type}`
    pub messages_received: Counter,
    /// `{host, target}`
    pub messages_sent: Counter,
    /// `{host, error}`
    pub messages_failed: Counter,
    /// `{host}`
    pub processing_seconds: Histogram,
    /// `{host, direction}`
    pub message_size_bytes: Histogram,
    /// `{host, adapter}`
    pub connections_active: Gauge,
    /// `{host}`
    pub queue_depth: Gauge,
    /// `{host, type}` — 1 running, 0 otherwise
    pub host_status: Gauge,
    pub wal_pending: Gauge,
}

impl EngineMetrics {
    pub fn new() -> Arc<Self> {
        Self::with_registry(Arc::new(MetricsRegistry::new()))
    }

    pub fn with_registry(registry: Arc<MetricsRegistry>) -> Arc<Self> {
        Arc::new(Self {
            messages_received: registry
                .counter("messages_received_total", "Total messages received"),
            messages_sent: registry.counter("messages_sent_total", "Total messages sent"),
            messages_failed: registry
                .counter("messages_failed_total", "Total messages failed"),
            processing_seconds: registry.histogram(
                "message_processing_seconds",
                "Message processing latency",
                LATENCY_BUCKETS,
            ),
            message_size_bytes: registry.histogram(
                "message_size_bytes",
                "Message size in bytes",
                SIZE_BUCKETS,
            ),
            connections_active: registry.gauge("connections_active", "Active connections"),
            queue_depth: registry.gauge("queue_depth", "Current queue depth"),
            host_status: registry.gauge("host_status", "Host status (1=running, 0=stopped)"),
            wal_pending: registry.gauge("wal_pending", "Pending WAL entries"),
            registry,
        })
    }
}

/// Body and content type for a Prometheus scrape endpoint. The embedding
/// layer mounts this wherever it serves HTTP.
pub fn metrics_handler(registry: &MetricsRegistry) -> (String, &'static str) {
    (registry.render(), "text/plain; version=0.0.4; charset=utf-8")
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
