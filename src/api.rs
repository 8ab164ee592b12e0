// 🌐 HTTP API - axum router over the prediction service
//
//   POST /predict   {"ids": [..]} → {"predictions": [..]}
//   GET  /health    readiness of the feature table and the model (also GET /)
//   GET  /metrics   Prometheus text exposition

use crate::error::{ErrorClass, PipelineError, Result};
use crate::metrics::{self, ApiMetrics};
use crate::serving::{HealthReport, PredictionService};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PredictionService>,
    pub metrics: ApiMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub predictions: Vec<usize>,
}

// ============================================================================
// Errors
// ============================================================================

/// Error body: {"detail", "status", "class"}
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
    class: ErrorClass,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError {
            status,
            detail: err.to_string(),
            class: err.class(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            detail: format!("malformed request body: {}", rejection.body_text()),
            class: ErrorClass::Client,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.class {
            ErrorClass::Client => debug!(status = %self.status, detail = %self.detail, "client error"),
            ErrorClass::Server => warn!(status = %self.status, detail = %self.detail, "server error"),
        }

        let body = Json(json!({
            "detail": self.detail,
            "status": self.status.as_u16(),
            "class": self.class.as_str(),
        }));

        (self.status, body).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /predict - class per matched id, in request order
async fn predict(
    State(state): State<AppState>,
    payload: std::result::Result<Json<PredictRequest>, JsonRejection>,
) -> std::result::Result<Json<PredictResponse>, ApiError> {
    state.metrics.observe_request("predict");

    let result = run_prediction(&state, payload).await;
    if let Err(err) = &result {
        state.metrics.observe_error("predict", err.status.as_u16());
    }
    result.map(Json)
}

async fn run_prediction(
    state: &AppState,
    payload: std::result::Result<Json<PredictRequest>, JsonRejection>,
) -> std::result::Result<PredictResponse, ApiError> {
    let Json(request) = payload?;

    let service = Arc::clone(&state.service);
    let prediction = tokio::task::spawn_blocking(move || service.predict(&request.ids))
        .await
        .map_err(|e| PipelineError::inference(format!("prediction task failed: {}", e)))??;

    state.metrics.observe_prediction(&prediction);
    Ok(PredictResponse {
        predictions: prediction.predictions,
    })
}

/// GET /health - always 200; readiness is in the body
async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    state.metrics.observe_request("health");
    Json(state.service.health())
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> std::result::Result<Response, ApiError> {
    state.metrics.observe_request("metrics");
    state.metrics.observe_health(&state.service.health());

    let body = state.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, metrics::CONTENT_TYPE)], body).into_response())
}

/// Build the application router
pub fn router(service: Arc<PredictionService>) -> Result<Router> {
    let state = AppState {
        service,
        metrics: ApiMetrics::new()?,
    };

    Ok(Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/predict", post(predict))
        .route("/predict/", post(predict))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let bad = ApiError::from(PipelineError::validation("no matching IDs"));
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        assert_eq!(bad.class, ErrorClass::Client);

        let down = ApiError::from(PipelineError::Unavailable("model".into()));
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(down.class, ErrorClass::Server);

        let broken = ApiError::from(PipelineError::inference("shape"));
        assert_eq!(broken.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
