//! Axum middleware for enforcing payments on agentmesh skill endpoints.
//!
//! A skill route wrapped in [`PaymentGate`](layer::PaymentGate) rejects
//! unpaid requests with `402 Payment Required` and a machine-readable
//! `accepts` block, verifies the `X-Payment` header with a facilitator
//! before the handler runs, and settles after the handler succeeds. The
//! settlement receipt travels back in the `X-Payment-Response` header.
//!
//! The ordering contract is strict: *verify before work, settle after work*.
//! A seller never settles for output it did not produce.
//!
//! ```rust,no_run
//! use axum::{Router, routing::post};
//! use agentmesh::networks::GLUE;
//! use agentmesh::types::EvmAddress;
//! use agentmesh_axum::facilitator_client::FacilitatorClient;
//! use agentmesh_axum::layer::PaymentGate;
//! use agentmesh_axum::price::PriceTag;
//!
//! let facilitator = FacilitatorClient::try_from("https://facilitator.example/").unwrap();
//! let glue = GLUE::avalanche_fuji();
//! let pay_to: EvmAddress = "0x5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e".parse().unwrap();
//! let price = PriceTag::new(glue.clone(), pay_to, glue.parse_amount("0.01").unwrap());
//!
//! let app: Router = Router::new().route(
//!     "/skills/get_logs",
//!     post(|| async { "payload" }).layer(PaymentGate::new(facilitator).with_price(price)),
//! );
//! ```

pub mod facilitator_client;
pub mod layer;
pub mod price;

pub use facilitator_client::{FacilitatorClient, FacilitatorClientError};
pub use layer::{PaymentGate, PaymentGateError};
pub use price::PriceTag;
