//! Thin wrapper around the `metrics` facade so reconcilers record counters
//! and histograms without depending on a concrete exporter; `operator`
//! installs the Prometheus recorder and exposes `/metrics` over HTTP.

use metrics::{counter, histogram};

#[derive(Clone)]
pub struct ReconcileMetrics {
    kind: &'static str,
}

impl ReconcileMetrics {
    pub fn new(kind: &'static str) -> Self {
        Self { kind }
    }

    pub fn record_reconcile(&self, namespace: &str, name: &str) {
        counter!(
            "storm_operator_reconcile_total",
            "kind" => self.kind,
            "namespace" => namespace.to_string(),
            "name" => name.to_string(),
        )
        .increment(1);
    }

    pub fn record_action(&self, namespace: &str, name: &str, action: &'static str) {
        counter!(
            "storm_operator_action_total",
            "kind" => self.kind,
            "namespace" => namespace.to_string(),
            "name" => name.to_string(),
            "action" => action,
        )
        .increment(1);
    }

    pub fn record_reconcile_duration(&self, namespace: &str, name: &str, seconds: f64) {
        histogram!(
            "storm_operator_reconcile_duration_seconds",
            "kind" => self.kind,
            "namespace" => namespace.to_string(),
            "name" => name.to_string(),
        )
        .record(seconds);
    }
}
