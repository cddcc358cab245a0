//! The 402-answering middleware itself.
//!
//! Flow per request: pass through; on `402 Payment Required`, parse the
//! [`PaymentRequiredResponse`], select a satisfiable requirement, sign a
//! fresh authorization with `validBefore = now + min(3600, maxTimeoutSeconds)`,
//! and retry once with the `X-Payment` header. Anything still unpaid after the
//! retry is returned to the caller as-is.

use http::{Extensions, HeaderValue, StatusCode};
use reqwest::{Request, Response};
use reqwest_middleware as rqm;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

use agentmesh::networks::TokenDeployment;
use agentmesh::payments::{
    self, DEFAULT_VALIDITY_SECONDS, PaymentSignerError, SignOptions,
};
use agentmesh::timestamp::UnixTimestamp;
use agentmesh::types::{
    EvmAddress, Network, PaymentPayload, PaymentRequiredResponse, PaymentRequirements, Scheme,
    SettleResponse, TokenAmount, X402Version,
};
use agentmesh::util::b64::Base64Bytes;
use alloy_signer::Signer;

/// How far into the past `validAfter` is backdated to absorb clock skew.
const VALID_AFTER_SKEW_SECONDS: u64 = 600;

/// An asset key: the pair that identifies a token across networks.
type AssetKey = (Network, EvmAddress);

/// Errors raised while constructing or applying a payment.
#[derive(Debug, thiserror::Error)]
pub enum PaymentsError {
    /// None of the server's accepted payment methods can be satisfied with the
    /// configured assets and caps.
    #[error("no acceptable payment method; accepts {accepts:?}")]
    PaymentNotAccepted { accepts: Vec<PaymentRequirements> },
    /// The original request body cannot be replayed for the paid retry.
    #[error("request is not cloneable; streaming bodies cannot be retried with payment")]
    RequestNotCloneable,
    #[error("failed to sign payment authorization")]
    Signing(#[from] PaymentSignerError),
    #[error("failed to encode payment payload")]
    Encoding(#[source] serde_json::Error),
    #[error("failed to place payment payload into a header")]
    HeaderValue(#[source] http::header::InvalidHeaderValue),
}

impl From<PaymentsError> for rqm::Error {
    fn from(error: PaymentsError) -> Self {
        rqm::Error::Middleware(error.into())
    }
}

/// Middleware answering 402 challenges with signed payments.
#[derive(Clone)]
pub struct X402Payments {
    signer: Arc<dyn Signer + Send + Sync>,
    max_amount: HashMap<AssetKey, TokenAmount>,
    prefer: Vec<AssetKey>,
}

impl X402Payments {
    /// Creates the middleware around an EIP-712-capable signer.
    pub fn with_signer<S: Signer + Send + Sync + 'static>(signer: S) -> Self {
        Self {
            signer: Arc::new(signer),
            max_amount: HashMap::new(),
            prefer: Vec::new(),
        }
    }

    /// Caps what this client will pay in `token`, and marks it preferred.
    pub fn max(&self, token: &TokenDeployment, amount: TokenAmount) -> Self {
        let mut this = self.clone();
        let key = (token.network, token.address);
        this.max_amount.insert(key, amount);
        if !this.prefer.contains(&key) {
            this.prefer.push(key);
        }
        this
    }

    /// The payer address of the configured signer.
    pub fn payer(&self) -> EvmAddress {
        EvmAddress(self.signer.address())
    }

    /// Selects the requirement to satisfy: first by preference order, then by
    /// position in the server's list, always within the configured caps.
    pub fn select_requirements(
        &self,
        accepts: &[PaymentRequirements],
    ) -> Result<PaymentRequirements, PaymentsError> {
        let satisfiable = |req: &&PaymentRequirements| {
            if req.scheme != Scheme::Exact {
                return false;
            }
            match self.max_amount.get(&(req.network, req.asset)) {
                Some(max) => req.max_amount <= *max,
                // No cap configured for this asset: do not spend in it.
                None => false,
            }
        };
        let by_preference = self.prefer.iter().find_map(|key| {
            accepts
                .iter()
                .filter(satisfiable)
                .find(|req| (req.network, req.asset) == *key)
        });
        let selected = by_preference.or_else(|| accepts.iter().find(satisfiable));
        selected
            .cloned()
            .ok_or_else(|| PaymentsError::PaymentNotAccepted {
                accepts: accepts.to_vec(),
            })
    }

    /// Signs a payload satisfying `selected`.
    #[instrument(name = "x402.make_payment_payload", skip_all, fields(
        network = %selected.network,
        asset = %selected.asset,
        amount = %selected.max_amount,
    ))]
    pub async fn make_payment_payload(
        &self,
        selected: PaymentRequirements,
    ) -> Result<PaymentPayload, PaymentsError> {
        let domain = payments::token_domain(&selected)?;
        let now = UnixTimestamp::try_now().map_err(PaymentSignerError::ClockError)?;
        let validity = DEFAULT_VALIDITY_SECONDS.min(selected.max_timeout_seconds);
        let authorization = payments::sign_authorization(
            self.signer.as_ref(),
            selected.pay_to,
            selected.max_amount,
            &domain,
            SignOptions {
                valid_after: Some(now - VALID_AFTER_SKEW_SECONDS),
                valid_before: Some(now + validity),
                nonce: None,
            },
        )
        .await?;
        Ok(PaymentPayload {
            x402_version: X402Version::V1,
            scheme: Scheme::Exact,
            network: selected.network,
            payload: authorization,
        })
    }

    /// Encodes a payload into the `X-Payment` header value.
    pub fn encode_payment_header(payload: &PaymentPayload) -> Result<HeaderValue, PaymentsError> {
        let json = serde_json::to_vec(payload).map_err(PaymentsError::Encoding)?;
        let b64 = Base64Bytes::encode(json);
        HeaderValue::from_bytes(b64.as_ref()).map_err(PaymentsError::HeaderValue)
    }

    /// Selects, signs, and encodes in one step.
    #[instrument(name = "x402.build_payment_header", skip_all)]
    pub async fn build_payment_header(
        &self,
        accepts: &[PaymentRequirements],
    ) -> Result<HeaderValue, PaymentsError> {
        let selected = self.select_requirements(accepts)?;
        let payload = self.make_payment_payload(selected).await?;
        Self::encode_payment_header(&payload)
    }
}

/// Reads the settlement receipt from a paid response, if the seller attached one.
pub fn settlement_from_response(response: &Response) -> Option<SettleResponse> {
    let header = response.headers().get("X-Payment-Response")?;
    SettleResponse::try_from(Base64Bytes::from(header.as_bytes())).ok()
}

#[async_trait::async_trait]
impl rqm::Middleware for X402Payments {
    /// Passes the request through; answers a 402 by signing and retrying once.
    #[instrument(name = "x402.handle", skip(self, req, extensions, next), fields(method = %req.method(), url = %req.url()))]
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: rqm::Next<'_>,
    ) -> rqm::Result<Response> {
        let retry_req = req.try_clone();

        let res = next.clone().run(req, extensions).await?;
        if res.status() != StatusCode::PAYMENT_REQUIRED {
            return Ok(res);
        }

        tracing::debug!("received 402 Payment Required");
        let challenge = res.json::<PaymentRequiredResponse>().await?;

        let retry_req = async {
            let payment_header = self.build_payment_header(&challenge.accepts).await?;
            let mut req = retry_req.ok_or(PaymentsError::RequestNotCloneable)?;
            let headers = req.headers_mut();
            headers.insert("X-Payment", payment_header);
            headers.insert(
                "Access-Control-Expose-Headers",
                HeaderValue::from_static("X-Payment-Response"),
            );
            Ok::<Request, PaymentsError>(req)
        }
        .await
        .map_err(Into::<rqm::Error>::into)?;

        next.run(retry_req, extensions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh::networks::{GLUE, USDC};
    use alloy_primitives::Address;
    use alloy_signer_local::PrivateKeySigner;

    fn requirements(token: &TokenDeployment, amount: u64) -> PaymentRequirements {
        token.requirements_for(
            EvmAddress(Address::repeat_byte(0x5e)),
            TokenAmount::from(amount),
            3600,
        )
    }

    #[test]
    fn selection_respects_caps() {
        let glue = GLUE::avalanche_fuji();
        let payments = X402Payments::with_signer(PrivateKeySigner::random())
            .max(&glue, TokenAmount::from(50_000u64));

        let accepts = vec![requirements(&glue, 10_000)];
        assert!(payments.select_requirements(&accepts).is_ok());

        let too_expensive = vec![requirements(&glue, 60_000)];
        assert!(matches!(
            payments.select_requirements(&too_expensive),
            Err(PaymentsError::PaymentNotAccepted { .. })
        ));
    }

    #[test]
    fn selection_ignores_unconfigured_assets() {
        let glue = GLUE::avalanche_fuji();
        let usdc = USDC::base_sepolia();
        let payments = X402Payments::with_signer(PrivateKeySigner::random())
            .max(&glue, TokenAmount::from(50_000u64));

        let accepts = vec![requirements(&usdc, 10)];
        assert!(matches!(
            payments.select_requirements(&accepts),
            Err(PaymentsError::PaymentNotAccepted { .. })
        ));
    }

    #[test]
    fn preference_order_wins_over_list_order() {
        let glue = GLUE::avalanche_fuji();
        let usdc = USDC::base_sepolia();
        let payments = X402Payments::with_signer(PrivateKeySigner::random())
            .max(&glue, TokenAmount::from(50_000u64))
            .max(&usdc, TokenAmount::from(50_000u64));

        let accepts = vec![requirements(&usdc, 10_000), requirements(&glue, 10_000)];
        let selected = payments.select_requirements(&accepts).unwrap();
        assert_eq!(selected.asset, glue.address);
    }

    #[tokio::test]
    async fn payload_honors_seller_timeout() {
        let glue = GLUE::avalanche_fuji();
        let payments = X402Payments::with_signer(PrivateKeySigner::random())
            .max(&glue, TokenAmount::from(50_000u64));

        let mut selected = requirements(&glue, 10_000);
        selected.max_timeout_seconds = 60;
        let payload = payments.make_payment_payload(selected).await.unwrap();
        let message = payload.payload.authorization;
        let now = UnixTimestamp::try_now().unwrap();
        assert!(message.valid_before.as_secs() <= now.as_secs() + 61);
        assert!(message.valid_before.as_secs() >= now.as_secs() + 59);
    }
}
