//! HTTP endpoints of the facilitator service.
//!
//! Protocol-critical endpoints are `POST /verify` and `POST /settle`; both
//! answer `200` with an `isValid`/`success` flag so callers can always inspect
//! the reason. The only non-200 on the payment path is `503` when the RPC
//! endpoint behind the facilitator is unreachable.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::instrument;

use crate::facilitator::Facilitator;
use crate::facilitator_local::FacilitatorLocalError;
use crate::types::{SettleRequest, VerifyRequest};

pub fn routes<A>() -> Router<A>
where
    A: Facilitator + Clone + Send + Sync + 'static,
    A::Error: IntoResponse,
{
    Router::new()
        .route("/", get(get_root))
        .route("/health", get(get_health::<A>))
        .route("/supported", get(get_supported::<A>))
        .route("/verify", post(post_verify::<A>))
        .route("/settle", post(post_settle::<A>))
}

/// `GET /`: greeting, useful as a deployment smoke check.
#[instrument(skip_all)]
pub async fn get_root() -> impl IntoResponse {
    let pkg_name = env!("CARGO_PKG_NAME");
    (StatusCode::OK, format!("Hello from {pkg_name}!"))
}

/// `GET /health`: liveness plus the chain id this instance settles on.
#[instrument(skip_all)]
pub async fn get_health<A>(State(facilitator): State<A>) -> impl IntoResponse
where
    A: Facilitator,
    A::Error: IntoResponse,
{
    match facilitator.health().await {
        Ok(health) => (StatusCode::OK, Json(json!(health))).into_response(),
        Err(error) => error.into_response(),
    }
}

/// `GET /supported`: the payment kinds this instance can settle.
#[instrument(skip_all)]
pub async fn get_supported<A>(State(facilitator): State<A>) -> impl IntoResponse
where
    A: Facilitator,
    A::Error: IntoResponse,
{
    match facilitator.supported().await {
        Ok(supported) => (StatusCode::OK, Json(json!(supported))).into_response(),
        Err(error) => error.into_response(),
    }
}

/// `POST /verify`: checks a payment payload against its requirements.
#[instrument(skip_all)]
pub async fn post_verify<A>(
    State(facilitator): State<A>,
    Json(body): Json<VerifyRequest>,
) -> impl IntoResponse
where
    A: Facilitator,
    A::Error: IntoResponse,
{
    match facilitator.verify(&body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => {
            tracing::warn!(error = ?error, "verification errored");
            error.into_response()
        }
    }
}

/// `POST /settle`: executes a verified payment on-chain.
#[instrument(skip_all)]
pub async fn post_settle<A>(
    State(facilitator): State<A>,
    Json(body): Json<SettleRequest>,
) -> impl IntoResponse
where
    A: Facilitator,
    A::Error: IntoResponse,
{
    match facilitator.settle(&body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => {
            tracing::warn!(error = ?error, "settlement errored");
            error.into_response()
        }
    }
}

impl IntoResponse for FacilitatorLocalError {
    fn into_response(self) -> Response {
        match self {
            FacilitatorLocalError::RpcUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "reason": "rpc-unavailable" })),
            )
                .into_response(),
            FacilitatorLocalError::Clock(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "reason": "internal" })),
            )
                .into_response(),
        }
    }
}
