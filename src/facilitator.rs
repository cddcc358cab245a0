//! Core trait defining the verification and settlement interface for payment
//! facilitators.
//!
//! Implementors validate incoming payment payloads against declared
//! requirements ([`Facilitator::verify`]) and execute on-chain transfers
//! ([`Facilitator::settle`]). The seller-side middleware is generic over this
//! trait, so it works against both the local implementation and a remote
//! facilitator reached over HTTP.

use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::types::{
    HealthResponse, SettleRequest, SettleResponse, SupportedResponse, VerifyRequest,
    VerifyResponse,
};

/// Asynchronous interface of a payment facilitator.
///
/// `verify` and `settle` express protocol-level outcomes (`isValid: false`,
/// `success: false`) in their response bodies; `Err` is reserved for transport
/// conditions such as an unreachable RPC endpoint.
pub trait Facilitator {
    /// The error type returned by this facilitator.
    type Error: Debug + Display;

    /// Verifies a proposed payment payload against its requirements:
    /// supported kind, amount, validity window, signature, balance, nonce.
    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send;

    /// Re-validates and then executes an on-chain settlement for the payment,
    /// waiting for exactly one confirmation.
    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send;

    /// Enumerates the payment kinds this facilitator can settle.
    fn supported(&self) -> impl Future<Output = Result<SupportedResponse, Self::Error>> + Send;

    /// Liveness probe carrying the settled chain id.
    fn health(&self) -> impl Future<Output = Result<HealthResponse, Self::Error>> + Send;
}

impl<T: Facilitator> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send {
        self.as_ref().settle(request)
    }

    fn supported(&self) -> impl Future<Output = Result<SupportedResponse, Self::Error>> + Send {
        self.as_ref().supported()
    }

    fn health(&self) -> impl Future<Output = Result<HealthResponse, Self::Error>> + Send {
        self.as_ref().health()
    }
}
