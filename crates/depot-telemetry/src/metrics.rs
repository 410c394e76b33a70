//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Labels stay low-cardinality: verbs, item kinds, and outcomes only.

use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use serde::Serialize;

/// Prometheus-backed metrics registry shared by the dispatcher and its callers.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    requests_total: IntCounterVec,
    batch_items_total: IntCounterVec,
    archive_entries_total: IntCounter,
    streamed_bytes_total: IntCounter,
}

/// Snapshot of selected counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Total archive entries expanded into storage.
    pub archive_entries_total: u64,
    /// Total bytes written to streaming responses.
    pub streamed_bytes_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("depot_requests_total", "Dispatched storage requests by outcome"),
            &["verb", "outcome"],
        )?;
        let batch_items_total = IntCounterVec::new(
            Opts::new(
                "depot_batch_items_total",
                "Batch items processed by kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        let archive_entries_total = IntCounter::with_opts(Opts::new(
            "depot_archive_entries_total",
            "Archive entries expanded into storage",
        ))?;
        let streamed_bytes_total = IntCounter::with_opts(Opts::new(
            "depot_streamed_bytes_total",
            "Bytes written to streaming responses",
        ))?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(batch_items_total.clone()))?;
        registry.register(Box::new(archive_entries_total.clone()))?;
        registry.register(Box::new(streamed_bytes_total.clone()))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                requests_total,
                batch_items_total,
                archive_entries_total,
                streamed_bytes_total,
            }),
        })
    }

    /// Increment the request counter for a verb and outcome (`ok`, `failed`, `streamed`).
    pub fn inc_request(&self, verb: &str, outcome: &str) {
        self.inner
            .requests_total
            .with_label_values(&[verb, outcome])
            .inc();
    }

    /// Increment the batch item counter for an item kind (`file`, `folder`) and outcome.
    pub fn inc_batch_item(&self, kind: &str, outcome: &str) {
        self.inner
            .batch_items_total
            .with_label_values(&[kind, outcome])
            .inc();
    }

    /// Add expanded archive entries.
    pub fn add_archive_entries(&self, count: u64) {
        self.inner.archive_entries_total.inc_by(count);
    }

    /// Add bytes flushed to a streaming response.
    pub fn add_streamed_bytes(&self, bytes: u64) {
        self.inner.streamed_bytes_total.inc_by(bytes);
    }

    /// Current value of the request counter for a verb and outcome.
    #[must_use]
    pub fn request_count(&self, verb: &str, outcome: &str) -> u64 {
        self.inner
            .requests_total
            .with_label_values(&[verb, outcome])
            .get()
    }

    /// Current value of the batch item counter for a kind and outcome.
    #[must_use]
    pub fn batch_item_count(&self, kind: &str, outcome: &str) -> u64 {
        self.inner
            .batch_items_total
            .with_label_values(&[kind, outcome])
            .get()
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode Prometheus metrics")?;
        String::from_utf8(buffer).context("metrics output was not valid UTF-8")
    }

    /// Take a point-in-time snapshot of the unlabeled counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            archive_entries_total: self.inner.archive_entries_total.get(),
            streamed_bytes_total: self.inner.streamed_bytes_total.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_request("create", "ok");
        metrics.inc_request("create", "ok");
        metrics.inc_request("delete", "failed");
        metrics.inc_batch_item("file", "error");
        metrics.add_archive_entries(3);
        metrics.add_streamed_bytes(2_048);

        assert_eq!(metrics.request_count("create", "ok"), 2);
        assert_eq!(metrics.request_count("delete", "failed"), 1);
        assert_eq!(metrics.batch_item_count("file", "error"), 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.archive_entries_total, 3);
        assert_eq!(snapshot.streamed_bytes_total, 2_048);

        let rendered = metrics.render()?;
        assert!(rendered.contains("depot_requests_total"));
        assert!(rendered.contains("depot_batch_items_total"));
        Ok(())
    }
}
