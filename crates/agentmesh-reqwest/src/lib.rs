//! Buyer-side payment middleware for `reqwest`.
//!
//! Wraps a `reqwest` client so that `402 Payment Required` responses are
//! answered automatically: the middleware parses the server's `accepts` block,
//! selects a requirement it can satisfy, signs an EIP-3009 transfer
//! authorization, and retries the request exactly once with the `X-Payment`
//! header attached.
//!
//! ```rust,no_run
//! use alloy_signer_local::PrivateKeySigner;
//! use agentmesh::networks::GLUE;
//! use agentmesh_reqwest::{WithPayments, X402Payments};
//!
//! let signer = PrivateKeySigner::random();
//! let glue = GLUE::avalanche_fuji();
//! let payments = X402Payments::with_signer(signer)
//!     .max(&glue, glue.parse_amount("0.05").unwrap());
//! let client = reqwest::Client::new().with_payments(payments);
//! ```

pub mod middleware;

pub use middleware::{PaymentsError, X402Payments, settlement_from_response};

use reqwest_middleware::ClientWithMiddleware;

/// Extension hook attaching [`X402Payments`] to a `reqwest` client.
pub trait WithPayments {
    fn with_payments(self, payments: X402Payments) -> ClientWithMiddleware;
}

impl WithPayments for reqwest::Client {
    fn with_payments(self, payments: X402Payments) -> ClientWithMiddleware {
        reqwest_middleware::ClientBuilder::new(self)
            .with(payments)
            .build()
    }
}
