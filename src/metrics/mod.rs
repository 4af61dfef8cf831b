//! Metrics collection for observability

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_with_registry, register_histogram_with_registry, Counter, Encoder,
    Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use crate::memory::FlushReport;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> =
    Lazy::new(|| Arc::new(Metrics::new().expect("Failed to initialize metrics")));

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Append path
    pub append_calls: Counter,
    pub turns_appended: Counter,

    // Flush path
    pub flushes: Counter,
    pub turns_condensed: Counter,
    pub condensation_evictions: Counter,
    pub oversized_entries: Counter,
    pub live_window_tokens: Histogram,

    // Read path
    pub renders: Counter,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let append_calls = register_counter_with_registry!(
            Opts::new("memory_append_calls_total", "Total append calls"),
            registry
        )?;

        let turns_appended = register_counter_with_registry!(
            Opts::new("memory_turns_appended_total", "Total turns appended to live windows"),
            registry
        )?;

        let flushes = register_counter_with_registry!(
            Opts::new("memory_flushes_total", "Flushes that condensed at least one turn"),
            registry
        )?;

        let turns_condensed = register_counter_with_registry!(
            Opts::new("memory_turns_condensed_total", "Total turns moved into condensation blocks"),
            registry
        )?;

        let condensation_evictions = register_counter_with_registry!(
            Opts::new(
                "memory_condensation_evictions_total",
                "Total condensed entries evicted from condensation blocks"
            ),
            registry
        )?;

        let oversized_entries = register_counter_with_registry!(
            Opts::new(
                "memory_oversized_entries_total",
                "Condensed entries exceeding the block budget on their own"
            ),
            registry
        )?;

        let live_window_tokens = register_histogram_with_registry!(
            HistogramOpts::new("memory_live_window_tokens", "Live window tokens before flushing")
                .buckets(prometheus::exponential_buckets(64.0, 2.0, 12)?),
            registry
        )?;

        let renders = register_counter_with_registry!(
            Opts::new("memory_renders_total", "Total render calls"),
            registry
        )?;

        Ok(Self {
            registry,
            append_calls,
            turns_appended,
            flushes,
            turns_condensed,
            condensation_evictions,
            oversized_entries,
            live_window_tokens,
            renders,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_append(&self, turns: usize) {
        self.append_calls.inc();
        self.turns_appended.inc_by(turns as f64);
    }

    /// Record a flush outcome; no-op flushes are not counted
    pub fn record_flush(&self, report: &FlushReport) {
        if report.turns_condensed == 0 {
            return;
        }
        self.flushes.inc();
        self.turns_condensed.inc_by(report.turns_condensed as f64);
        self.condensation_evictions.inc_by(report.entries_evicted as f64);
    }

    pub fn record_oversized_entry(&self) {
        self.oversized_entries.inc();
    }

    pub fn observe_live_tokens(&self, tokens: usize) {
        self.live_window_tokens.observe(tokens as f64);
    }

    pub fn record_render(&self) {
        self.renders.inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = Metrics::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_record_flush() {
        let metrics = Metrics::new().unwrap();
        metrics.record_flush(&FlushReport::default());
        assert_eq!(metrics.flushes.get(), 0.0);

        metrics.record_flush(&FlushReport {
            turns_condensed: 3,
            entries_evicted: 1,
            live_tokens: 10,
        });
        assert_eq!(metrics.flushes.get(), 1.0);
        assert_eq!(metrics.turns_condensed.get(), 3.0);
        assert_eq!(metrics.condensation_evictions.get(), 1.0);
    }

    #[test]
    fn test_export_prometheus() {
        let metrics = Metrics::new().unwrap();
        metrics.record_append(2);
        metrics.observe_live_tokens(120);

        let text = metrics.export_prometheus();
        assert!(text.contains("memory_turns_appended_total 2"));
        assert!(text.contains("memory_live_window_tokens_count 1"));
    }
}
