//! Prometheus metrics registry
//!
//! One [`Metrics`] instance is built at startup and shared as
//! [`SharedMetrics`]; there is no process-global registry.

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Shared handle to the metrics registry
pub type SharedMetrics = Arc<Metrics>;

const NAMESPACE: &str = "demo_service";

pub struct Metrics {
    registry: Registry,
    worker_iterations: IntCounterVec,
    worker_failures: IntCounterVec,
    worker_panics: IntCounterVec,
    cert_reloads: IntCounterVec,
    demo: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let worker_iterations = IntCounterVec::new(
            Opts::new("worker_iterations_total", "Worker invocations by the supervisor")
                .namespace(NAMESPACE),
            &["worker"],
        )?;
        let worker_failures = IntCounterVec::new(
            Opts::new("worker_failures_total", "Worker invocations that returned an error")
                .namespace(NAMESPACE),
            &["worker"],
        )?;
        let worker_panics = IntCounterVec::new(
            Opts::new("worker_panics_total", "Worker invocations that panicked")
                .namespace(NAMESPACE),
            &["worker"],
        )?;
        let cert_reloads = IntCounterVec::new(
            Opts::new("cert_reloads_total", "Certificate load attempts by result")
                .namespace(NAMESPACE),
            &["result"],
        )?;
        let demo = IntGaugeVec::new(
            Opts::new("demo_metrics", "Demo gauges registered from configuration")
                .namespace(NAMESPACE),
            &["name"],
        )?;

        registry.register(Box::new(worker_iterations.clone()))?;
        registry.register(Box::new(worker_failures.clone()))?;
        registry.register(Box::new(worker_panics.clone()))?;
        registry.register(Box::new(cert_reloads.clone()))?;
        registry.register(Box::new(demo.clone()))?;

        Ok(Self {
            registry,
            worker_iterations,
            worker_failures,
            worker_panics,
            cert_reloads,
            demo,
        })
    }

    pub fn record_worker_iteration(&self, worker: &str) {
        self.worker_iterations.with_label_values(&[worker]).inc();
    }

    pub fn record_worker_failure(&self, worker: &str) {
        self.worker_failures.with_label_values(&[worker]).inc();
    }

    pub fn record_worker_panic(&self, worker: &str) {
        self.worker_panics.with_label_values(&[worker]).inc();
    }

    pub fn record_cert_reload(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.cert_reloads.with_label_values(&[result]).inc();
    }

    /// Create the gauge for `name` at zero so it is exported before first use
    pub fn register_demo_metric(&self, name: &str) {
        self.demo.with_label_values(&[name]).set(0);
    }

    pub fn set_demo_metric(&self, name: &str, value: i64) {
        self.demo.with_label_values(&[name]).set(value);
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Create the shared metrics registry
pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(Metrics::new()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() {
        let metrics = Metrics::new().unwrap();
        metrics.record_worker_iteration("DemoWorker");
        metrics.record_worker_iteration("DemoWorker");
        metrics.record_worker_failure("DemoWorker");

        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"demo_service_worker_iterations_total{worker="DemoWorker"} 2"#));
        assert!(text.contains(r#"demo_service_worker_failures_total{worker="DemoWorker"} 1"#));
    }

    #[test]
    fn test_demo_gauges() {
        let metrics = Metrics::new().unwrap();
        metrics.register_demo_metric("metric-a");
        metrics.set_demo_metric("metric-b", 5);

        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"demo_service_demo_metrics{name="metric-a"} 0"#));
        assert!(text.contains(r#"demo_service_demo_metrics{name="metric-b"} 5"#));
    }

    #[test]
    fn test_separate_registries_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_cert_reload(true);

        assert!(a.encode().unwrap().contains("cert_reloads_total"));
        assert!(!b.encode().unwrap().contains(r#"result="success""#));
    }
}
