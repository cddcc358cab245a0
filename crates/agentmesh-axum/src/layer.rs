//! Tower layer enforcing payment verification and settlement around skill
//! handlers.
//!
//! The gate intercepts each request, demands an `X-Payment` header, verifies
//! it with the configured facilitator, and only then lets the inner handler
//! run. A successful handler response triggers settlement; the receipt is
//! attached as an `X-Payment-Response` header. A handler error (4xx/5xx) is
//! returned unchanged and nothing is settled.

use axum_core::body::Body;
use axum_core::{
    extract::Request,
    response::{IntoResponse, Response},
};
use http::{HeaderMap, HeaderValue, StatusCode};
use once_cell::sync::Lazy;
use serde_json::json;
use std::fmt::Display;
use std::sync::Arc;
use std::{
    convert::Infallible,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};

use agentmesh::facilitator::Facilitator;
use agentmesh::types::{
    PaymentPayload, PaymentRequiredResponse, PaymentRequirements, SettleRequest, SettleResponse,
    VerifyRequest, VerifyResponse, X402Version,
};
use agentmesh::util::b64::Base64Bytes;

use crate::price::PriceTag;

/// Middleware layer that gates an endpoint behind payment.
///
/// Wraps an axum service; configuration is by-value builder style so one
/// configured gate can be cloned across routes.
#[derive(Debug)]
pub struct PaymentGate<F> {
    facilitator: Arc<F>,
    prices: Vec<PriceTag>,
    requirements: Arc<Vec<PaymentRequirements>>,
}

impl<F> Clone for PaymentGate<F> {
    fn clone(&self) -> Self {
        Self {
            facilitator: self.facilitator.clone(),
            prices: self.prices.clone(),
            requirements: self.requirements.clone(),
        }
    }
}

impl<F> PaymentGate<F> {
    pub fn new(facilitator: F) -> Self {
        Self {
            facilitator: Arc::new(facilitator),
            prices: Vec::new(),
            requirements: Arc::new(Vec::new()),
        }
    }

    /// Replaces the accepted prices with the provided one.
    pub fn with_price(&self, price: PriceTag) -> Self {
        let mut this = self.clone();
        this.prices = vec![price];
        this.recompute_requirements()
    }

    /// Adds an alternative accepted price.
    pub fn or_price(&self, price: PriceTag) -> Self {
        let mut this = self.clone();
        if !this.prices.contains(&price) {
            this.prices.push(price);
        }
        this.recompute_requirements()
    }

    fn recompute_requirements(mut self) -> Self {
        let requirements = self.prices.iter().map(PriceTag::to_requirements).collect();
        self.requirements = Arc::new(requirements);
        self
    }
}

/// The wrapped service: inner handler plus payment enforcement.
pub struct PaymentGateService<F> {
    facilitator: Arc<F>,
    requirements: Arc<Vec<PaymentRequirements>>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<F> Clone for PaymentGateService<F> {
    fn clone(&self) -> Self {
        Self {
            facilitator: self.facilitator.clone(),
            requirements: self.requirements.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<S, F> Layer<S> for PaymentGate<F>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    F: Facilitator + Clone,
{
    type Service = PaymentGateService<F>;

    fn layer(&self, inner: S) -> Self::Service {
        PaymentGateService {
            facilitator: self.facilitator.clone(),
            requirements: self.requirements.clone(),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

impl<F> Service<Request> for PaymentGateService<F>
where
    F: Facilitator + Clone + Send + Sync + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let gate = Gate {
            facilitator: self.facilitator.clone(),
            requirements: self.requirements.clone(),
        };
        let inner = self.inner.clone();
        Box::pin(async move { Ok(gate.handle_request(inner, req).await) })
    }
}

static ERR_PAYMENT_REQUIRED: Lazy<String> = Lazy::new(|| "Payment required".to_string());
static ERR_INVALID_PAYMENT_HEADER: Lazy<String> =
    Lazy::new(|| "Invalid or malformed payment header".to_string());
static ERR_NO_PAYMENT_MATCHING: Lazy<String> =
    Lazy::new(|| "Unable to find matching payment requirements".to_string());

/// Terminal outcomes of the gate that do not reach the inner handler.
#[derive(Debug)]
pub enum PaymentGateError {
    /// Respond `402` with the given body.
    PaymentRequired(PaymentRequiredResponse),
    /// The facilitator could not be reached; respond `503`.
    Unavailable(String),
}

impl Display for PaymentGateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentGateError::PaymentRequired(body) => {
                write!(f, "402 Payment Required: {}", body)
            }
            PaymentGateError::Unavailable(context) => {
                write!(f, "503 facilitator unavailable: {context}")
            }
        }
    }
}

impl PaymentGateError {
    fn payment_required(accepts: Vec<PaymentRequirements>, error: String) -> Self {
        PaymentGateError::PaymentRequired(PaymentRequiredResponse {
            x402_version: X402Version::V1,
            accepts,
            error,
        })
    }
}

impl IntoResponse for PaymentGateError {
    fn into_response(self) -> Response {
        match self {
            PaymentGateError::PaymentRequired(body) => {
                let bytes = serde_json::to_vec(&body).expect("serializable 402 body");
                Response::builder()
                    .status(StatusCode::PAYMENT_REQUIRED)
                    .header("Content-Type", "application/json")
                    .body(Body::from(bytes))
                    .expect("valid 402 response")
            }
            PaymentGateError::Unavailable(_) => {
                let bytes = serde_json::to_vec(&json!({ "reason": "facilitator-unavailable" }))
                    .expect("serializable 503 body");
                Response::builder()
                    .status(StatusCode::SERVICE_UNAVAILABLE)
                    .header("Content-Type", "application/json")
                    .body(Body::from(bytes))
                    .expect("valid 503 response")
            }
        }
    }
}

/// Per-request enforcement: parse, verify, dispatch, settle.
struct Gate<F> {
    facilitator: Arc<F>,
    requirements: Arc<Vec<PaymentRequirements>>,
}

impl<F> Gate<F>
where
    F: Facilitator + Clone + Send + Sync,
{
    /// Parses the `X-Payment` header, or produces the 402 challenge.
    fn extract_payment(&self, headers: &HeaderMap) -> Result<PaymentPayload, PaymentGateError> {
        let header = headers.get("X-Payment").ok_or_else(|| {
            PaymentGateError::payment_required(
                self.requirements.as_ref().clone(),
                ERR_PAYMENT_REQUIRED.clone(),
            )
        })?;
        let base64 = Base64Bytes::from(header.as_bytes());
        PaymentPayload::try_from(base64).map_err(|_| {
            PaymentGateError::payment_required(
                self.requirements.as_ref().clone(),
                ERR_INVALID_PAYMENT_HEADER.clone(),
            )
        })
    }

    fn find_matching_requirements(&self, payload: &PaymentPayload) -> Option<PaymentRequirements> {
        self.requirements
            .iter()
            .find(|r| r.scheme == payload.scheme && r.network == payload.network)
            .cloned()
    }

    /// Verifies the payment with the facilitator. Returns the request to later
    /// settle with.
    async fn verify_payment(
        &self,
        payload: PaymentPayload,
    ) -> Result<VerifyRequest, PaymentGateError> {
        let selected = self.find_matching_requirements(&payload).ok_or_else(|| {
            PaymentGateError::payment_required(
                self.requirements.as_ref().clone(),
                ERR_NO_PAYMENT_MATCHING.clone(),
            )
        })?;
        let verify_request = VerifyRequest {
            payment_payload: payload,
            payment_requirements: selected,
        };
        let response: VerifyResponse = self
            .facilitator
            .verify(&verify_request)
            .await
            .map_err(|e| PaymentGateError::Unavailable(e.to_string()))?;
        if response.is_valid {
            Ok(verify_request)
        } else {
            let reason = response.reason.unwrap_or_else(|| "rejected".to_string());
            Err(PaymentGateError::payment_required(
                self.requirements.as_ref().clone(),
                reason,
            ))
        }
    }

    /// Settles a verified payment after the handler has produced its output.
    async fn settle_payment(
        &self,
        request: &SettleRequest,
    ) -> Result<SettleResponse, PaymentGateError> {
        let settlement = self
            .facilitator
            .settle(request)
            .await
            .map_err(|e| PaymentGateError::Unavailable(e.to_string()))?;
        if settlement.success {
            Ok(settlement)
        } else {
            let reason = settlement
                .reason
                .unwrap_or_else(|| "unknown".to_string());
            Err(PaymentGateError::payment_required(
                self.requirements.as_ref().clone(),
                format!("settlement-failed: {reason}"),
            ))
        }
    }

    /// The full lifecycle: extract, verify, inner handler, settle, respond.
    async fn handle_request<S>(self, mut inner: S, req: Request) -> Response
    where
        S: Service<Request, Response = Response, Error = Infallible>,
    {
        let payload = match self.extract_payment(req.headers()) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::info!(status = "unpaid", "no valid payment provided");
                return err.into_response();
            }
        };
        let verify_request = match self.verify_payment(payload).await {
            Ok(verify_request) => verify_request,
            Err(err) => return err.into_response(),
        };
        let response = match inner.call(req).await {
            Ok(response) => response,
            Err(infallible) => match infallible {},
        };
        if response.status().is_client_error() || response.status().is_server_error() {
            // Handler failed: return its error as-is, never settle.
            return response;
        }
        let settlement = match self.settle_payment(&verify_request).await {
            Ok(settlement) => settlement,
            Err(err) => return err.into_response(),
        };
        let header: Base64Bytes<'static> = match (&settlement).try_into() {
            Ok(header) => header,
            Err(_) => {
                return PaymentGateError::payment_required(
                    self.requirements.as_ref().clone(),
                    "settlement-failed: unencodable receipt".to_string(),
                )
                .into_response();
            }
        };
        let header_value = match HeaderValue::from_bytes(header.as_ref()) {
            Ok(value) => value,
            Err(_) => {
                return PaymentGateError::payment_required(
                    self.requirements.as_ref().clone(),
                    "settlement-failed: unencodable receipt".to_string(),
                )
                .into_response();
            }
        };
        let mut response = response;
        response
            .headers_mut()
            .insert("X-Payment-Response", header_value);
        response
    }
}
