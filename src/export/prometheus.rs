use crate::metrics::registry::MetricsRegistry;
use std::sync::Arc;

/// Content type of the Prometheus text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Clone)]
pub struct PrometheusExporter {
    registry: Arc<MetricsRegistry>,
}

impl PrometheusExporter {
    pub const fn new(registry: Arc<MetricsRegistry>) -> Self {
        Self { registry }
    }

    pub fn render_metrics(&self) -> String {
        self.registry.render_prometheus()
    }
}
