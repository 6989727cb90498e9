//! HTTP handlers for admission checks.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{instrument, warn};

use crate::context::AppContext;
use crate::error::{Result, TurnstileError};
use crate::ratelimit::{Algorithm, LimitRequest, MAX_WINDOW_SECS};
use crate::store::BreakerState;

const ALLOWED_BODY: &str = "Request allowed";
const DENIED_BODY: &str = "Rate limit exceeded";

/// Build the router for the admission endpoints.
pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/limit", get(sliding_window_limit))
        .route("/leaky-limit", get(leaky_bucket_limit))
        .route("/healthz", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// GET /limit - sliding window check
pub async fn sliding_window_limit(
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    limit(&ctx, Algorithm::SlidingWindow, &params).await
}

/// GET /leaky-limit - rate-derived leaky bucket check
pub async fn leaky_bucket_limit(
    State(ctx): State<Arc<AppContext>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    limit(&ctx, Algorithm::LeakyBucket, &params).await
}

/// GET /healthz - breaker state of the shared store
pub async fn health(State(ctx): State<Arc<AppContext>>) -> Response {
    let breaker = ctx.breaker_state();
    let (status, label) = match breaker {
        BreakerState::Closed => (StatusCode::OK, "ok"),
        BreakerState::Open | BreakerState::HalfOpen => (StatusCode::SERVICE_UNAVAILABLE, "degraded"),
    };

    (status, Json(json!({ "status": label, "breaker": breaker }))).into_response()
}

#[instrument(skip_all, fields(algorithm = %algorithm))]
async fn limit(
    ctx: &AppContext,
    algorithm: Algorithm,
    params: &HashMap<String, String>,
) -> Response {
    let request = match parse_request(params) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Rejecting malformed limit request");
            return parameter_error(e);
        }
    };

    if ctx.dispatcher().admit(algorithm, &request).await {
        (StatusCode::OK, ALLOWED_BODY).into_response()
    } else {
        (StatusCode::TOO_MANY_REQUESTS, DENIED_BODY).into_response()
    }
}

/// Extract a [`LimitRequest`] from query parameters.
pub fn parse_request(params: &HashMap<String, String>) -> Result<LimitRequest> {
    let caller = params
        .get("userID")
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TurnstileError::Parameter("userID is required".to_string()))?;

    let window_secs = parse_number(params, "window_duration")?;
    if window_secs == 0 {
        return Err(TurnstileError::Parameter(
            "window_duration must be positive".to_string(),
        ));
    }
    if window_secs > MAX_WINDOW_SECS {
        return Err(TurnstileError::Parameter(format!(
            "window_duration must be at most {}",
            MAX_WINDOW_SECS
        )));
    }
    let limit = parse_number(params, "limit")?;

    Ok(LimitRequest::new(caller, window_secs, limit))
}

fn parse_number(params: &HashMap<String, String>, name: &str) -> Result<u64> {
    params
        .get(name)
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| TurnstileError::Parameter(format!("{} is required", name)))
}

fn parameter_error(err: TurnstileError) -> Response {
    let message = match err {
        TurnstileError::Parameter(message) => message,
        other => other.to_string(),
    };
    (StatusCode::BAD_REQUEST, message).into_response()
}
