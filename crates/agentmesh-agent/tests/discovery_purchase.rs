//! Discovery-and-purchase flow against an in-process seller: fetch the card,
//! get challenged with 402, sign, retry, receive the payload.

use std::sync::{Arc, Mutex};

use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use url::Url;

use agentmesh::facilitator::Facilitator;
use agentmesh::networks::GLUE;
use agentmesh::types::{
    EvmAddress, HealthResponse, PaymentRequiredResponse, SettleRequest, SettleResponse,
    SupportedResponse, TokenAmount, TransactionHash, VerifyRequest, VerifyResponse,
};
use agentmesh_agent::a2a::{A2aClient, AgentCard, CardPublisher, Skill, WELL_KNOWN_CARD_PATH};
use agentmesh_axum::layer::PaymentGate;
use agentmesh_axum::price::PriceTag;
use agentmesh_ledger::AgentId;
use agentmesh_reqwest::{WithPayments, X402Payments, settlement_from_response};
use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;

/// Facilitator that accepts any payment and fabricates a settlement receipt.
#[derive(Clone)]
struct AcceptingFacilitator {
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Facilitator for AcceptingFacilitator {
    type Error = String;

    async fn verify(&self, _request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        self.log.lock().unwrap().push("verify");
        Ok(VerifyResponse::valid())
    }

    async fn settle(&self, _request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        self.log.lock().unwrap().push("settle");
        Ok(SettleResponse::settled(TransactionHash([0x42; 32])))
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

fn get_logs_skill() -> Skill {
    Skill {
        skill_id: "get_logs".to_string(),
        name: "Get chat logs".to_string(),
        description: "Returns recent chat logs".to_string(),
        price_amount: TokenAmount::from(10_000u64),
        price_currency: "GLUE".to_string(),
        input_schema: json!({ "type": "object" }),
        output_schema: json!({ "type": "object" }),
        endpoint_path: "/skills/get_logs".to_string(),
    }
}

fn seller_card() -> AgentCard {
    AgentCard {
        agent_id: AgentId::from(7),
        domain: "karma-hello.example.test".to_string(),
        name: "Karma Hello".to_string(),
        description: "Sells chat logs".to_string(),
        version: "1.2.0".to_string(),
        skills: vec![get_logs_skill()],
        trust_models: vec!["erc-8004".to_string()],
        payment_methods: vec!["evm-eip3009-GLUE".to_string()],
    }
}

/// Boots an in-process seller; returns its base URL and the facilitator log.
async fn spawn_seller() -> (Url, Arc<Mutex<Vec<&'static str>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let facilitator = AcceptingFacilitator { log: log.clone() };

    let glue = GLUE::avalanche_fuji();
    let price = PriceTag::new(
        glue,
        EvmAddress(Address::repeat_byte(0x5e)),
        TokenAmount::from(10_000u64),
    );
    let gate = PaymentGate::new(facilitator).with_price(price);

    let publisher = CardPublisher::new(seller_card());
    let app: Router = publisher.router().route(
        "/skills/get_logs",
        post(|| async { Json(json!({ "payload": "chat-logs" })) }).layer(gate),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let base_url = Url::parse(&format!("http://{addr}/")).unwrap();
    (base_url, log)
}

#[tokio::test]
async fn discover_challenge_pay_and_receive() {
    let (base_url, log) = spawn_seller().await;

    // Discovery: fetch and validate the card.
    let a2a = A2aClient::new();
    let card_url = base_url.join(WELL_KNOWN_CARD_PATH.trim_start_matches('/')).unwrap();
    let card = a2a
        .discover_at(card_url, "karma-hello.example.test")
        .await
        .unwrap();
    let skill = card.find_skill("get_logs").expect("skill on card");
    assert_eq!(skill.price_amount, TokenAmount::from(10_000u64));

    let skill_url = base_url.join("skills/get_logs").unwrap();

    // Unpaid invocation: 402 with the declared price in accepts.
    let plain = reqwest::Client::new();
    let challenge = plain
        .post(skill_url.clone())
        .json(&json!({ "limit": 10 }))
        .send()
        .await
        .unwrap();
    assert_eq!(challenge.status(), 402);
    let body: PaymentRequiredResponse = challenge.json().await.unwrap();
    assert_eq!(body.accepts[0].max_amount, TokenAmount::from(10_000u64));

    // Paid retry through the payment middleware.
    let glue = GLUE::avalanche_fuji();
    let buyer = reqwest::Client::new().with_payments(
        X402Payments::with_signer(PrivateKeySigner::random())
            .max(&glue, TokenAmount::from(50_000u64)),
    );
    let response = buyer
        .post(skill_url)
        .json(&json!({ "limit": 10 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let settlement = settlement_from_response(&response).expect("settlement receipt");
    assert!(settlement.success);
    let payload: serde_json::Value = response.json().await.unwrap();
    assert_eq!(payload["payload"], "chat-logs");

    // verify precedes settle; the unpaid probe triggered neither.
    assert_eq!(*log.lock().unwrap(), vec!["verify", "settle"]);
}

#[tokio::test]
async fn served_card_is_byte_stable_within_cache_window() {
    let (base_url, _log) = spawn_seller().await;
    let card_url = base_url.join(WELL_KNOWN_CARD_PATH.trim_start_matches('/')).unwrap();

    let client = reqwest::Client::new();
    let first = client.get(card_url.clone()).send().await.unwrap();
    assert_eq!(
        first
            .headers()
            .get("Cache-Control")
            .and_then(|v| v.to_str().ok()),
        Some("max-age=60")
    );
    let first_bytes = first.bytes().await.unwrap();
    let second_bytes = client
        .get(card_url)
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(first_bytes, second_bytes);
}

#[tokio::test]
async fn mismatched_card_is_rejected_at_discovery() {
    // A card with a duplicate skill id must not validate.
    let mut bad_card = seller_card();
    let duplicate = bad_card.skills[0].clone();
    bad_card.skills.push(duplicate);

    let publisher = CardPublisher::new(bad_card);
    let app = publisher.router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let a2a = A2aClient::new();
    let card_url = Url::parse(&format!("http://{addr}{WELL_KNOWN_CARD_PATH}")).unwrap();
    let result = a2a.discover_at(card_url, "bad.example.test").await;
    assert!(matches!(
        result,
        Err(agentmesh_agent::a2a::A2aError::InvalidAgentCard { .. })
    ));
}
