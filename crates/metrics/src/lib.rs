//! Metrics and tracing setup for vkv clients.
//!
//! Provides a global [`ClientMetrics`] singleton backed by the `prometheus`
//! crate. Exposition is text-only via [`encode_metrics`]; callers decide
//! where to ship it.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

// ────────────────────────── Tracing ──────────────────────────

/// Initialize the tracing subscriber with env-filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

// ────────────────────────── Prometheus metrics ──────────────────────────

static METRICS: OnceLock<ClientMetrics> = OnceLock::new();

/// Retrieve (or lazily create) the global metrics singleton.
pub fn metrics() -> &'static ClientMetrics {
    METRICS.get_or_init(ClientMetrics::new)
}

/// All Prometheus metrics for a vkv client.
pub struct ClientMetrics {
    pub registry: Registry,

    // ── Reads ──
    pub gets: IntCounter,
    pub gets_not_found: IntCounter,

    // ── Writes ──
    pub puts_accepted: IntCounter,
    pub puts_stale: IntCounter,
    pub puts_invalid: IntCounter,

    // ── Collaborator ──
    pub backend_errors: IntCounter,

    // ── Resolution ──
    pub merges: IntCounter,
    pub unresolved: IntCounter,

    pub op_latency_secs: HistogramVec,
}

impl std::fmt::Debug for ClientMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMetrics").finish_non_exhaustive()
    }
}

const LATENCY_BUCKETS: &[f64] = &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0];

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let c = IntCounter::with_opts(Opts::new(name, help)).expect("valid counter opts");
    registry
        .register(Box::new(c.clone()))
        .expect("counter registered once");
    c
}

impl ClientMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let gets = counter(&registry, "vkv_gets_total", "GET operations");
        let gets_not_found = counter(
            &registry,
            "vkv_gets_not_found_total",
            "GET operations on keys with no history",
        );
        let puts_accepted = counter(&registry, "vkv_puts_accepted_total", "Committed PUTs");
        let puts_stale = counter(
            &registry,
            "vkv_puts_stale_total",
            "PUTs rejected because the caller's marker was stale or concurrent",
        );
        let puts_invalid = counter(
            &registry,
            "vkv_puts_invalid_marker_total",
            "PUTs rejected because the caller's marker was ahead of the store",
        );
        let backend_errors = counter(
            &registry,
            "vkv_backend_errors_total",
            "Collaborator failures propagated to callers",
        );
        let merges = counter(&registry, "vkv_merges_total", "Conflicts merged by a resolver");
        let unresolved = counter(
            &registry,
            "vkv_unresolved_conflicts_total",
            "Conflicts a resolver could not merge",
        );

        let op_latency_secs = HistogramVec::new(
            HistogramOpts::new("vkv_op_latency_seconds", "Client operation latency in seconds")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["op_type"],
        )
        .expect("op_latency_secs histogram");
        registry
            .register(Box::new(op_latency_secs.clone()))
            .expect("register op_latency_secs");

        Self {
            registry,
            gets,
            gets_not_found,
            puts_accepted,
            puts_stale,
            puts_invalid,
            backend_errors,
            merges,
            unresolved,
            op_latency_secs,
        }
    }
}

/// Encode all registered metrics in Prometheus text exposition format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&metrics().registry.gather(), &mut buf) {
        tracing::warn!("prometheus text encoding failed: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Start an operation latency timer. Records elapsed time on drop.
pub fn start_op_timer(op_type: &str) -> prometheus::HistogramTimer {
    metrics()
        .op_latency_secs
        .with_label_values(&[op_type])
        .start_timer()
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Histogram;

    #[test]
    fn test_metrics_init_and_increment() {
        let m = metrics();

        let before = m.puts_stale.get();
        m.puts_stale.inc();
        m.puts_stale.inc();
        assert_eq!(m.puts_stale.get(), before + 2);

        let before = m.merges.get();
        m.merges.inc();
        assert_eq!(m.merges.get(), before + 1);
    }

    #[test]
    fn test_encode_metrics_format() {
        metrics().unresolved.inc();

        let output = encode_metrics();
        assert!(output.contains("vkv_puts_accepted_total"));
        assert!(output.contains("vkv_unresolved_conflicts_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_op_timer_records() {
        {
            let _t = start_op_timer("test_op");
        }
        let h: Histogram = metrics().op_latency_secs.with_label_values(&["test_op"]);
        assert_eq!(h.get_sample_count(), 1);
    }
}
