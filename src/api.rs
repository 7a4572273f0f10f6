//! HTTP surface: `POST /api/query`, `GET /healthz`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::error;

use crate::error::RetrievalError;
use crate::model::RetrievalResult;
use crate::pipeline::Pipeline;

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pipeline: Arc<Pipeline>,
    rate_limiter: Option<RateLimiter>,
}

impl ApiState {
    /// `rate_limiter` of `None` disables throttling.
    pub fn new(pipeline: Arc<Pipeline>, rate_limiter: Option<RateLimiter>) -> Self {
        Self {
            pipeline,
            rate_limiter,
        }
    }
}

/// Builds the service router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/api/query", post(query_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    #[serde(flatten)]
    result: RetrievalResult,
    meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
struct ResponseMeta {
    top_n: usize,
    latency_ms: f64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "knowlex retrieval API is running" }))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn query_handler(
    State(state): State<ApiState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "query text must not be empty"));
    }
    if let Some(limiter) = &state.rate_limiter {
        if !limiter.acquire().await {
            return Err(error_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded"));
        }
    }
    let start = Instant::now();
    let pipeline = Arc::clone(&state.pipeline);
    let result = tokio::task::spawn_blocking(move || pipeline.run(&request.query))
        .await
        .map_err(|err| {
            error!(error = %err, "retrieval task join error");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "retrieval task failed")
        })?
        .map_err(pipeline_error)?;
    Ok(Json(QueryResponse {
        result,
        meta: ResponseMeta {
            top_n: state.pipeline.config().top_n,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
        },
    }))
}

fn pipeline_error(err: RetrievalError) -> ApiError {
    let status = match &err {
        RetrievalError::InvalidQuery => StatusCode::BAD_REQUEST,
        RetrievalError::RetrievalUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RetrievalError::RerankFailure { .. } => StatusCode::BAD_GATEWAY,
    };
    error_response(status, err.to_string())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

/// Token-bucket limiter shared by all requests.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<RateState>>,
    capacity: f64,
    refill_per_sec: f64,
}

struct RateState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Returns `None` when either limit is zero (limiting disabled).
    pub fn new(max_per_minute: u32, burst: u32) -> Option<Self> {
        if max_per_minute == 0 || burst == 0 {
            return None;
        }
        let capacity = burst as f64;
        Some(Self {
            state: Arc::new(Mutex::new(RateState {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
            capacity,
            refill_per_sec: max_per_minute as f64 / 60.0,
        })
    }

    /// Takes one token if available.
    pub async fn acquire(&self) -> bool {
        let mut guard = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(guard.last_refill).as_secs_f64();
        guard.last_refill = now;
        guard.tokens = (guard.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if guard.tokens >= 1.0 {
            guard.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
