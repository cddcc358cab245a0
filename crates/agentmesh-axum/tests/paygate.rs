//! Ordering contract of the pay-gate: the inner handler runs only after a
//! valid verify, and settlement happens only after the handler succeeds.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use tower::ServiceExt;

use agentmesh::facilitator::Facilitator;
use agentmesh::networks::GLUE;
use agentmesh::timestamp::UnixTimestamp;
use agentmesh::types::{
    AuthorizationMessage, AuthorizationNonce, EvmAddress, EvmSignature, HealthResponse, Network,
    PaymentPayload, PaymentRequiredResponse, Scheme, SettleRequest, SettleResponse,
    SupportedResponse, TokenAmount, TransactionHash, TransferAuthorization, VerifyRequest,
    VerifyResponse, X402Version,
};
use agentmesh::util::b64::Base64Bytes;
use agentmesh_axum::layer::PaymentGate;
use agentmesh_axum::price::PriceTag;
use alloy_primitives::Address;

/// Scripted facilitator that records the order of verify/settle calls.
#[derive(Clone)]
struct ScriptedFacilitator {
    log: Arc<Mutex<Vec<&'static str>>>,
    verify_reason: Option<&'static str>,
    settle_reason: Option<&'static str>,
    transport_down: bool,
}

impl ScriptedFacilitator {
    fn happy(log: Arc<Mutex<Vec<&'static str>>>) -> Self {
        Self {
            log,
            verify_reason: None,
            settle_reason: None,
            transport_down: false,
        }
    }
}

impl Facilitator for ScriptedFacilitator {
    type Error = String;

    async fn verify(&self, _request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        if self.transport_down {
            return Err("connection refused".to_string());
        }
        self.log.lock().unwrap().push("verify");
        Ok(match self.verify_reason {
            None => VerifyResponse::valid(),
            Some(reason) => VerifyResponse::invalid(reason),
        })
    }

    async fn settle(&self, _request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        self.log.lock().unwrap().push("settle");
        Ok(match self.settle_reason {
            None => SettleResponse::settled(TransactionHash([0x77; 32])),
            Some(reason) => SettleResponse::failed(reason),
        })
    }

    async fn supported(&self) -> Result<SupportedResponse, Self::Error> {
        Ok(SupportedResponse { kinds: vec![] })
    }

    async fn health(&self) -> Result<HealthResponse, Self::Error> {
        Ok(HealthResponse {
            status: "ok".to_string(),
            chain_id: 43113,
        })
    }
}

fn payment_header() -> String {
    let payload = PaymentPayload {
        x402_version: X402Version::V1,
        scheme: Scheme::Exact,
        network: Network::AvalancheFuji,
        payload: TransferAuthorization {
            signature: EvmSignature([0x11; 65]),
            authorization: AuthorizationMessage {
                from: EvmAddress(Address::repeat_byte(0xaa)),
                to: EvmAddress(Address::repeat_byte(0x5e)),
                value: TokenAmount::from(10_000u64),
                valid_after: UnixTimestamp(0),
                valid_before: UnixTimestamp(4_000_000_000),
                nonce: AuthorizationNonce([0x01; 32]),
            },
        },
    };
    Base64Bytes::try_from(&payload).unwrap().to_string()
}

fn gated_app(
    facilitator: ScriptedFacilitator,
    log: Arc<Mutex<Vec<&'static str>>>,
    handler_status: StatusCode,
) -> Router {
    let glue = GLUE::avalanche_fuji();
    let price = PriceTag::new(
        glue.clone(),
        EvmAddress(Address::repeat_byte(0x5e)),
        TokenAmount::from(10_000u64),
    );
    let gate = PaymentGate::new(facilitator).with_price(price);
    Router::new().route(
        "/skills/get_logs",
        post(move || {
            let log = log.clone();
            async move {
                log.lock().unwrap().push("handler");
                (handler_status, Json(json!({ "payload": "chat-logs" })))
            }
        })
        .layer(gate),
    )
}

fn paid_request() -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/skills/get_logs")
        .header("Content-Type", "application/json")
        .header("X-Payment", payment_header())
        .body(Body::from("{}"))
        .unwrap()
}

fn unpaid_request() -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/skills/get_logs")
        .header("Content-Type", "application/json")
        .body(Body::from("{}"))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn missing_header_yields_402_with_accepts() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let app = gated_app(
        ScriptedFacilitator::happy(log.clone()),
        log.clone(),
        StatusCode::OK,
    );

    let response = app.oneshot(unpaid_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

    let body: PaymentRequiredResponse = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(body.error, "Payment required");
    assert_eq!(body.accepts.len(), 1);
    assert_eq!(body.accepts[0].max_amount, TokenAmount::from(10_000u64));
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn happy_path_runs_verify_handler_settle_in_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let app = gated_app(
        ScriptedFacilitator::happy(log.clone()),
        log.clone(),
        StatusCode::OK,
    );

    let response = app.oneshot(paid_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let receipt_header = response
        .headers()
        .get("X-Payment-Response")
        .expect("receipt header")
        .clone();
    let receipt =
        SettleResponse::try_from(Base64Bytes::from(receipt_header.as_bytes())).unwrap();
    assert!(receipt.success);
    assert!(receipt.transaction.is_some());

    assert_eq!(*log.lock().unwrap(), vec!["verify", "handler", "settle"]);
}

#[tokio::test]
async fn invalid_payment_never_reaches_the_handler() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let facilitator = ScriptedFacilitator {
        verify_reason: Some("nonce-used"),
        ..ScriptedFacilitator::happy(log.clone())
    };
    let app = gated_app(facilitator, log.clone(), StatusCode::OK);

    let response = app.oneshot(paid_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "nonce-used");
    assert_eq!(*log.lock().unwrap(), vec!["verify"]);
}

#[tokio::test]
async fn failing_handler_is_returned_unchanged_and_not_settled() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let app = gated_app(
        ScriptedFacilitator::happy(log.clone()),
        log.clone(),
        StatusCode::INTERNAL_SERVER_ERROR,
    );

    let response = app.oneshot(paid_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().get("X-Payment-Response").is_none());
    assert_eq!(*log.lock().unwrap(), vec!["verify", "handler"]);
}

#[tokio::test]
async fn settlement_failure_yields_402_without_data() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let facilitator = ScriptedFacilitator {
        settle_reason: Some("nonce-used"),
        ..ScriptedFacilitator::happy(log.clone())
    };
    let app = gated_app(facilitator, log.clone(), StatusCode::OK);

    let response = app.oneshot(paid_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "settlement-failed: nonce-used");
    assert_eq!(*log.lock().unwrap(), vec!["verify", "handler", "settle"]);
}

#[tokio::test]
async fn unreachable_facilitator_yields_503() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let facilitator = ScriptedFacilitator {
        transport_down: true,
        ..ScriptedFacilitator::happy(log.clone())
    };
    let app = gated_app(facilitator, log.clone(), StatusCode::OK);

    let response = app.oneshot(paid_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["reason"], "facilitator-unavailable");
    assert!(log.lock().unwrap().is_empty());
}
