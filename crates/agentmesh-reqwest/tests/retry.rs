//! The middleware retries a 402 exactly once, with a signed header.

use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use agentmesh::networks::GLUE;
use agentmesh::types::{EvmAddress, PaymentPayload, TokenAmount};
use agentmesh::util::b64::Base64Bytes;
use agentmesh_reqwest::{PaymentsError, WithPayments, X402Payments};
use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;

fn challenge_body(amount: u64) -> serde_json::Value {
    let glue = GLUE::avalanche_fuji();
    let accepts = vec![glue.requirements_for(
        EvmAddress(Address::repeat_byte(0x5e)),
        TokenAmount::from(amount),
        3600,
    )];
    serde_json::json!({
        "x402Version": 1,
        "accepts": accepts,
        "error": "Payment required"
    })
}

#[tokio::test]
async fn retries_once_with_signed_header() {
    let server = MockServer::start().await;

    // Paid requests succeed.
    Mock::given(method("POST"))
        .and(path("/skills/get_logs"))
        .and(header_exists("X-Payment"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "payload": "chat-logs"
        })))
        .mount(&server)
        .await;
    // Unpaid requests are challenged.
    Mock::given(method("POST"))
        .and(path("/skills/get_logs"))
        .respond_with(ResponseTemplate::new(402).set_body_json(challenge_body(10_000)))
        .mount(&server)
        .await;

    let signer = PrivateKeySigner::random();
    let buyer_address = EvmAddress(signer.address());
    let glue = GLUE::avalanche_fuji();
    let client = reqwest::Client::new().with_payments(
        X402Payments::with_signer(signer).max(&glue, TokenAmount::from(50_000u64)),
    );

    let response = client
        .post(format!("{}/skills/get_logs", server.uri()))
        .json(&serde_json::json!({ "limit": 10 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Exactly two requests hit the server: challenge + paid retry.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].headers.get("X-Payment").is_none());
    let header = requests[1]
        .headers
        .get("X-Payment")
        .expect("paid retry carries X-Payment");
    let payload =
        PaymentPayload::try_from(Base64Bytes::from(header.as_bytes())).unwrap();
    assert_eq!(payload.payload.authorization.from, buyer_address);
    assert_eq!(
        payload.payload.authorization.value,
        TokenAmount::from(10_000u64)
    );
}

#[tokio::test]
async fn unaffordable_challenge_fails_with_payment_not_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/skills/get_logs"))
        .respond_with(ResponseTemplate::new(402).set_body_json(challenge_body(1_000_000)))
        .mount(&server)
        .await;

    let glue = GLUE::avalanche_fuji();
    let client = reqwest::Client::new().with_payments(
        X402Payments::with_signer(PrivateKeySigner::random())
            .max(&glue, TokenAmount::from(50_000u64)),
    );

    let error = client
        .post(format!("{}/skills/get_logs", server.uri()))
        .send()
        .await
        .unwrap_err();
    let middleware_error = match error {
        reqwest_middleware::Error::Middleware(inner) => inner,
        other => panic!("unexpected error: {other:?}"),
    };
    assert!(
        middleware_error
            .downcast_ref::<PaymentsError>()
            .is_some_and(|e| matches!(e, PaymentsError::PaymentNotAccepted { .. }))
    );
}

#[tokio::test]
async fn non_402_responses_pass_through_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/open"))
        .respond_with(ResponseTemplate::new(200).set_body_string("free"))
        .mount(&server)
        .await;

    let glue = GLUE::avalanche_fuji();
    let client = reqwest::Client::new().with_payments(
        X402Payments::with_signer(PrivateKeySigner::random())
            .max(&glue, TokenAmount::from(50_000u64)),
    );

    let response = client
        .get(format!("{}/open", server.uri()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
