//! Facilitator implementation backed by a live EVM chain.
//!
//! Verification walks the predicate chain in a fixed order and reports the
//! first failure as a short machine-readable reason. Settlement re-validates
//! and then submits `transferWithAuthorization` from the hot wallet, waiting
//! for one confirmation. The service keeps no state of its own; everything it
//! decides on is read from the chain.

use tracing::instrument;

use crate::chain::{ChainError, TokenChain};
use crate::facilitator::Facilitator;
use crate::networks::TokenDeployment;
use crate::payments;
use crate::timestamp::UnixTimestamp;
use crate::types::{
    HealthResponse, PaymentRequirements, Scheme, SettleRequest, SettleResponse,
    SupportedResponse, TokenEip712Metadata, TransferAuthorization, VerifyRequest, VerifyResponse,
};

/// Clock skew allowance when judging expiry, in seconds.
const EXPIRY_GRACE_SECONDS: u64 = 6;

/// Errors a facilitator surfaces outside the protocol-level response bodies.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorLocalError {
    /// The RPC endpoint is unreachable. Mapped to HTTP 503.
    #[error("rpc-unavailable: {0}")]
    RpcUnavailable(#[source] ChainError),
    /// The system clock could not be read.
    #[error("clock failure")]
    Clock(#[source] std::time::SystemTimeError),
}

/// A [`Facilitator`] that verifies and settles against one EVM chain.
///
/// Generic over [`TokenChain`] so the decision logic runs against an
/// in-memory chain in tests.
#[derive(Debug, Clone)]
pub struct FacilitatorLocal<C> {
    chain: C,
    deployments: Vec<TokenDeployment>,
}

impl<C: TokenChain> FacilitatorLocal<C> {
    /// Creates a facilitator for `chain`, settling the known deployments on
    /// that chain's network.
    pub fn new(chain: C) -> Self {
        let network = chain.network();
        let deployments = crate::networks::known_deployments()
            .into_iter()
            .filter(|d| d.network == network)
            .collect();
        Self { chain, deployments }
    }

    /// Creates a facilitator with an explicit deployment list.
    pub fn with_deployments(chain: C, deployments: Vec<TokenDeployment>) -> Self {
        Self { chain, deployments }
    }

    fn find_deployment(&self, requirements: &PaymentRequirements) -> Option<&TokenDeployment> {
        self.deployments
            .iter()
            .find(|d| d.network == requirements.network && d.address == requirements.asset)
    }

    async fn domain_for(
        &self,
        requirements: &PaymentRequirements,
    ) -> Result<alloy_sol_types::Eip712Domain, ChainError> {
        let metadata: TokenEip712Metadata = match &requirements.extra {
            Some(extra) => extra.clone(),
            None => self.chain.token_eip712(requirements.asset).await?,
        };
        Ok(payments::domain_from_parts(
            &metadata.name,
            &metadata.version,
            requirements.network.chain_id(),
            requirements.asset,
        ))
    }

    /// Runs the full predicate chain. `Ok(None)` means the payment is
    /// acceptable; `Ok(Some(reason))` names the first failed predicate.
    async fn check_payment(
        &self,
        request: &VerifyRequest,
    ) -> Result<Option<String>, FacilitatorLocalError> {
        let payload = &request.payment_payload;
        let requirements = &request.payment_requirements;
        let auth: &TransferAuthorization = &payload.payload;
        let message = &auth.authorization;

        // (a) scheme/network/asset must match a supported kind.
        if payload.scheme != Scheme::Exact || requirements.scheme != Scheme::Exact {
            return Ok(Some("unsupported-scheme".to_string()));
        }
        if payload.network != self.chain.network() || requirements.network != self.chain.network()
        {
            return Ok(Some("unsupported-network".to_string()));
        }
        if self.find_deployment(requirements).is_none() {
            return Ok(Some("unsupported-asset".to_string()));
        }
        if message.to != requirements.pay_to {
            return Ok(Some("recipient-mismatch".to_string()));
        }

        // (b) value within the declared maximum.
        if message.value > requirements.max_amount {
            return Ok(Some("amount-exceeds-maximum".to_string()));
        }
        if message.value.is_zero() {
            return Ok(Some("zero-value".to_string()));
        }

        // (c) validity window.
        let now = UnixTimestamp::try_now().map_err(FacilitatorLocalError::Clock)?;
        if message.valid_after >= message.valid_before {
            return Ok(Some("empty-validity-window".to_string()));
        }
        if now.seconds_until(message.valid_before) > requirements.max_timeout_seconds {
            return Ok(Some("timeout-window-too-long".to_string()));
        }
        if now < message.valid_after {
            return Ok(Some("not-yet-valid".to_string()));
        }
        if message.valid_before < now + EXPIRY_GRACE_SECONDS {
            return Ok(Some("expired".to_string()));
        }

        // (d) signature must recover to the payer.
        let domain = self
            .domain_for(requirements)
            .await
            .map_err(|e| self.classify(e))?;
        if !payments::verify_authorization(auth, &domain) {
            return Ok(Some("invalid-signature".to_string()));
        }

        // (e) payer balance at the latest head.
        let balance = self
            .chain
            .token_balance(requirements.asset, message.from)
            .await
            .map_err(|e| self.classify(e))?;
        let value: alloy_primitives::U256 = message.value.into();
        if balance < value {
            return Ok(Some("insufficient-balance".to_string()));
        }

        // (f) nonce not yet consumed.
        let consumed = self
            .chain
            .authorization_consumed(requirements.asset, message.from, message.nonce.into())
            .await
            .map_err(|e| self.classify(e))?;
        if consumed {
            return Ok(Some("nonce-used".to_string()));
        }

        Ok(None)
    }

    fn classify(&self, error: ChainError) -> FacilitatorLocalError {
        // Reads only fail here on transport problems; contract-level failures
        // on a view call mean the RPC gave us garbage, which is the same
        // operational condition.
        FacilitatorLocalError::RpcUnavailable(error)
    }
}

impl<C: TokenChain> Facilitator for FacilitatorLocal<C> {
    type Error = FacilitatorLocalError;

    #[instrument(skip_all, fields(payer = %request.payment_payload.payload.authorization.from))]
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        match self.check_payment(request).await? {
            None => Ok(VerifyResponse::valid()),
            Some(reason) => {
                tracing::info!(reason = %reason, "payment rejected");
                Ok(VerifyResponse::invalid(reason))
            }
        }
    }

    #[instrument(skip_all, fields(payer = %request.payment_payload.payload.authorization.from))]
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        // Settlement re-runs verification so a replayed nonce or an expired
        // window is caught before gas is spent.
        if let Some(reason) = self.check_payment(request).await? {
            tracing::info!(reason = %reason, "settlement refused");
            return Ok(SettleResponse::failed(reason));
        }

        let auth = &request.payment_payload.payload;
        let asset = request.payment_requirements.asset;
        match self.chain.settle_transfer(asset, auth).await {
            Ok(settlement) if settlement.confirmed => {
                tracing::info!(tx = %settlement.transaction, "settlement confirmed");
                Ok(SettleResponse::settled(settlement.transaction))
            }
            Ok(settlement) => {
                tracing::warn!(tx = %settlement.transaction, "settlement reverted");
                Ok(SettleResponse::failed("transaction-reverted"))
            }
            Err(e) if e.is_rpc_unavailable() => Err(FacilitatorLocalError::RpcUnavailable(e)),
            Err(e) => {
                tracing::warn!(error = %e, "settlement failed");
                Ok(SettleResponse::failed(format!("settlement-error: {e}")))
            }
        }
    }

    async fn supported(&self) -> Result<SupportedResponse, Self::Error> {
        Ok(SupportedResponse {
            kinds: self
                .deployments
                .iter()
                .map(TokenDeployment::supported_kind)
                .collect(),
        })
    }

    async fn health(&self) -> Result<HealthResponse, Self::Error> {
        Ok(HealthResponse {
            status: "ok".to_string(),
            chain_id: self.chain.chain_id(),
        })
    }
}

impl<C> FacilitatorLocal<C> {
    pub fn deployments(&self) -> &[TokenDeployment] {
        &self.deployments
    }
}
