use crate::api::v1alpha1::ArgoCD;
use crate::controllers::converge::PassReport;
use kube::ResourceExt;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, Registry};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounter,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    /// Child-object writes, by kind and action
    pub mutations: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "argocd_operator_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds",
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["instance"],
        )?;
        let failures = IntCounterVec::new(
            opts!(
                "argocd_operator_reconciliation_errors_total",
                "reconciliation errors",
            ),
            &["instance", "error"],
        )?;
        let reconciliations =
            IntCounter::new("argocd_operator_reconciliations_total", "reconciliations")?;
        let mutations = IntCounterVec::new(
            opts!(
                "argocd_operator_child_mutations_total",
                "child objects created, updated, replaced or deleted",
            ),
            &["kind", "action"],
        )?;
        Ok(Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            mutations,
        })
    }

    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.mutations.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure(&self, argocd: &ArgoCD, error_label: &str) {
        self.failures
            .with_label_values(&[argocd.name_any().as_str(), error_label])
            .inc()
    }

    pub fn record_pass(&self, report: &PassReport) {
        for step in report.steps().iter().filter(|s| s.outcome.is_mutation()) {
            self.mutations
                .with_label_values(&[step.kind.as_str(), step.outcome.action()])
                .inc();
        }
    }

    pub fn count_and_measure(&self, instance: &str) -> ReconcileMeasurer {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
            instance: instance.to_string(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: HistogramVec,
    instance: String,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[self.instance.as_str()])
            .observe(duration);
    }
}
