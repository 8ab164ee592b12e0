// 📈 Prometheus metrics for the HTTP API
// Own registry per router, rendered in the text exposition format at /metrics

use crate::error::{PipelineError, Result};
use crate::serving::{HealthReport, Prediction};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

fn registry_error(err: prometheus::Error) -> PipelineError {
    PipelineError::configuration(format!("metrics registry: {}", err))
}

#[derive(Clone)]
pub struct ApiMetrics {
    registry: Registry,
    requests: IntCounterVec,
    errors: IntCounterVec,
    predicted_ids: IntCounter,
    unknown_ids: IntCounter,
    feature_table_entities: IntGauge,
    ready: IntGauge,
}

impl ApiMetrics {
    pub fn new() -> Result<Self> {
        let registry =
            Registry::new_custom(Some("propensity".to_string()), None).map_err(registry_error)?;

        let requests = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests by endpoint"),
            &["endpoint"],
        )
        .map_err(registry_error)?;
        let errors = IntCounterVec::new(
            Opts::new("http_errors_total", "Error responses by endpoint and status"),
            &["endpoint", "status"],
        )
        .map_err(registry_error)?;
        let predicted_ids = IntCounter::new("predicted_ids_total", "Ids answered with a class")
            .map_err(registry_error)?;
        let unknown_ids = IntCounter::new("unknown_ids_total", "Requested ids absent from the feature table")
            .map_err(registry_error)?;
        let feature_table_entities =
            IntGauge::new("feature_table_entities", "Entities in the serving feature table")
                .map_err(registry_error)?;
        let ready = IntGauge::new("ready", "1 when the feature table and model are loaded")
            .map_err(registry_error)?;

        registry.register(Box::new(requests.clone())).map_err(registry_error)?;
        registry.register(Box::new(errors.clone())).map_err(registry_error)?;
        registry.register(Box::new(predicted_ids.clone())).map_err(registry_error)?;
        registry.register(Box::new(unknown_ids.clone())).map_err(registry_error)?;
        registry
            .register(Box::new(feature_table_entities.clone()))
            .map_err(registry_error)?;
        registry.register(Box::new(ready.clone())).map_err(registry_error)?;

        Ok(ApiMetrics {
            registry,
            requests,
            errors,
            predicted_ids,
            unknown_ids,
            feature_table_entities,
            ready,
        })
    }

    pub fn observe_request(&self, endpoint: &str) {
        self.requests.with_label_values(&[endpoint]).inc();
    }

    pub fn observe_error(&self, endpoint: &str, status: u16) {
        let status = status.to_string();
        self.errors
            .with_label_values(&[endpoint, status.as_str()])
            .inc();
    }

    pub fn observe_prediction(&self, prediction: &Prediction) {
        self.predicted_ids.inc_by(prediction.ids.len() as u64);
        self.unknown_ids.inc_by(prediction.unknown.len() as u64);
    }

    /// Refresh the readiness gauges
    pub fn observe_health(&self, health: &HealthReport) {
        self.ready.set(i64::from(health.ready));
        self.feature_table_entities
            .set(health.feature_table.entities.unwrap_or(0) as i64);
    }

    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(registry_error)?;
        String::from_utf8(buffer).map_err(|e| PipelineError::inference(format!("metrics encoding: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render_with_prefix() {
        let metrics = ApiMetrics::new().unwrap();
        metrics.observe_request("predict");
        metrics.observe_request("predict");
        metrics.observe_error("predict", 400);
        metrics.observe_prediction(&Prediction {
            ids: vec![1, 2],
            predictions: vec![0, 1],
            unknown: vec![9],
        });

        let text = metrics.render().unwrap();
        assert!(text.contains("propensity_http_requests_total{endpoint=\"predict\"} 2"));
        assert!(text.contains("propensity_http_errors_total{endpoint=\"predict\",status=\"400\"} 1"));
        assert!(text.contains("propensity_predicted_ids_total 2"));
        assert!(text.contains("propensity_unknown_ids_total 1"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = ApiMetrics::new().unwrap();
        let b = ApiMetrics::new().unwrap();
        a.observe_request("health");

        assert!(a.render().unwrap().contains("endpoint=\"health\"} 1"));
        assert!(!b.render().unwrap().contains("endpoint=\"health\""));
    }
}
