//! Payment signer: EIP-712 typed-data signing and verification of EIP-3009
//! `TransferWithAuthorization` messages.
//!
//! The signing domain is `{ name, version, chainId, verifyingContract }` where
//! `name` and `version` come from the token's metadata block inside
//! [`PaymentRequirements::extra`]. Signatures are 65-byte `r || s || v` with
//! `v` in `{27, 28}`.

use alloy_primitives::{B256, Signature, U256};
use alloy_signer::Signer;
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};

use crate::timestamp::UnixTimestamp;
use crate::types::{
    AuthorizationMessage, AuthorizationNonce, EvmAddress, EvmSignature, PaymentRequirements,
    TokenAmount, TransferAuthorization,
};

/// Default validity window applied when the caller does not supply one.
pub const DEFAULT_VALIDITY_SECONDS: u64 = 3600;

sol!(
    /// EIP-712 struct for EIP-3009 `transferWithAuthorization`.
    ///
    /// Field order and names must match the token contract's type hash exactly;
    /// this is the message whose digest the payer signs off-chain.
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
);

#[derive(Debug, thiserror::Error)]
pub enum PaymentSignerError {
    #[error("value must be positive")]
    ZeroValue,
    #[error("validAfter {0} must precede validBefore {1}")]
    EmptyWindow(UnixTimestamp, UnixTimestamp),
    #[error("payment requirements carry no EIP-712 token metadata")]
    MissingEip712Metadata,
    #[error("failed to read system clock")]
    ClockError(#[source] std::time::SystemTimeError),
    #[error("failed to sign authorization digest")]
    SigningError(#[source] alloy_signer::Error),
    #[error("malformed signature bytes")]
    MalformedSignature,
}

/// Optional knobs for [`sign_authorization`]. `Default` gives a window of
/// `[0, now + 3600)` and a fresh random nonce.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignOptions {
    pub valid_after: Option<UnixTimestamp>,
    pub valid_before: Option<UnixTimestamp>,
    pub nonce: Option<AuthorizationNonce>,
}

/// Builds the EIP-712 domain for a token from its requirements entry.
pub fn token_domain(requirements: &PaymentRequirements) -> Result<Eip712Domain, PaymentSignerError> {
    let extra = requirements
        .extra
        .as_ref()
        .ok_or(PaymentSignerError::MissingEip712Metadata)?;
    Ok(domain_from_parts(
        &extra.name,
        &extra.version,
        requirements.network.chain_id(),
        requirements.asset,
    ))
}

/// Builds an EIP-712 domain from explicit parts.
pub fn domain_from_parts(
    name: &str,
    version: &str,
    chain_id: u64,
    verifying_contract: EvmAddress,
) -> Eip712Domain {
    eip712_domain! {
        name: name.to_string(),
        version: version.to_string(),
        chain_id: chain_id,
        verifying_contract: verifying_contract.into(),
    }
}

/// EIP-712 digest of an authorization message under the given domain.
pub fn signing_digest(message: &AuthorizationMessage, domain: &Eip712Domain) -> B256 {
    let typed = TransferWithAuthorization {
        from: message.from.into(),
        to: message.to.into(),
        value: message.value.into(),
        validAfter: U256::from(message.valid_after.as_secs()),
        validBefore: U256::from(message.valid_before.as_secs()),
        nonce: message.nonce.into(),
    };
    typed.eip712_signing_hash(domain)
}

/// Signs a transfer authorization for `value` from the signer's address to `to`.
///
/// Validates the inputs, fills in window and nonce defaults, computes the
/// EIP-712 digest, and signs it with the provided signer.
pub async fn sign_authorization<S: Signer + Send + Sync + ?Sized>(
    signer: &S,
    to: EvmAddress,
    value: TokenAmount,
    domain: &Eip712Domain,
    options: SignOptions,
) -> Result<TransferAuthorization, PaymentSignerError> {
    if value.is_zero() {
        return Err(PaymentSignerError::ZeroValue);
    }
    let valid_after = options.valid_after.unwrap_or(UnixTimestamp(0));
    let valid_before = match options.valid_before {
        Some(ts) => ts,
        None => {
            let now = UnixTimestamp::try_now().map_err(PaymentSignerError::ClockError)?;
            now + DEFAULT_VALIDITY_SECONDS
        }
    };
    if valid_after >= valid_before {
        return Err(PaymentSignerError::EmptyWindow(valid_after, valid_before));
    }
    let nonce = options.nonce.unwrap_or_else(AuthorizationNonce::random);

    let authorization = AuthorizationMessage {
        from: EvmAddress(signer.address()),
        to,
        value,
        valid_after,
        valid_before,
        nonce,
    };
    let digest = signing_digest(&authorization, domain);
    let signature = signer
        .sign_hash(&digest)
        .await
        .map_err(PaymentSignerError::SigningError)?;
    Ok(TransferAuthorization {
        signature: EvmSignature::from(signature.as_bytes()),
        authorization,
    })
}

/// Recovers the signing address from an authorization.
pub fn recover_signer(
    auth: &TransferAuthorization,
    domain: &Eip712Domain,
) -> Result<EvmAddress, PaymentSignerError> {
    let digest = signing_digest(&auth.authorization, domain);
    let signature = Signature::try_from(auth.signature.0.as_slice())
        .map_err(|_| PaymentSignerError::MalformedSignature)?;
    let address = signature
        .recover_address_from_prehash(&digest)
        .map_err(|_| PaymentSignerError::MalformedSignature)?;
    Ok(EvmAddress(address))
}

/// True iff the signature recovers to the authorization's `from` address.
pub fn verify_authorization(auth: &TransferAuthorization, domain: &Eip712Domain) -> bool {
    match recover_signer(auth, domain) {
        Ok(recovered) => recovered == auth.authorization.from,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;
    use alloy_signer_local::PrivateKeySigner;

    fn test_domain() -> Eip712Domain {
        domain_from_parts(
            "Glue Token",
            "1",
            43113,
            EvmAddress(Address::repeat_byte(0x33)),
        )
    }

    #[tokio::test]
    async fn sign_verify_roundtrip() {
        let signer = PrivateKeySigner::random();
        let domain = test_domain();
        let auth = sign_authorization(
            &signer,
            EvmAddress(Address::repeat_byte(0xbb)),
            TokenAmount::from(10_000u64),
            &domain,
            SignOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(auth.authorization.from, EvmAddress(signer.address()));
        assert!(matches!(auth.signature.v(), 27 | 28));
        assert!(verify_authorization(&auth, &domain));
    }

    #[tokio::test]
    async fn tampered_value_fails_verification() {
        let signer = PrivateKeySigner::random();
        let domain = test_domain();
        let mut auth = sign_authorization(
            &signer,
            EvmAddress(Address::repeat_byte(0xbb)),
            TokenAmount::from(10_000u64),
            &domain,
            SignOptions::default(),
        )
        .await
        .unwrap();

        auth.authorization.value = TokenAmount::from(20_000u64);
        assert!(!verify_authorization(&auth, &domain));
    }

    #[tokio::test]
    async fn wrong_domain_fails_verification() {
        let signer = PrivateKeySigner::random();
        let domain = test_domain();
        let auth = sign_authorization(
            &signer,
            EvmAddress(Address::repeat_byte(0xbb)),
            TokenAmount::from(1u64),
            &domain,
            SignOptions::default(),
        )
        .await
        .unwrap();

        let other_domain =
            domain_from_parts("Glue Token", "2", 43113, EvmAddress(Address::repeat_byte(0x33)));
        assert!(!verify_authorization(&auth, &other_domain));
    }

    #[tokio::test]
    async fn zero_value_is_rejected() {
        let signer = PrivateKeySigner::random();
        let result = sign_authorization(
            &signer,
            EvmAddress(Address::repeat_byte(0xbb)),
            TokenAmount::from(0u64),
            &test_domain(),
            SignOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(PaymentSignerError::ZeroValue)));
    }

    #[tokio::test]
    async fn inverted_window_is_rejected() {
        let signer = PrivateKeySigner::random();
        let result = sign_authorization(
            &signer,
            EvmAddress(Address::repeat_byte(0xbb)),
            TokenAmount::from(1u64),
            &test_domain(),
            SignOptions {
                valid_after: Some(UnixTimestamp(100)),
                valid_before: Some(UnixTimestamp(100)),
                nonce: None,
            },
        )
        .await;
        assert!(matches!(result, Err(PaymentSignerError::EmptyWindow(_, _))));
    }

    #[tokio::test]
    async fn explicit_nonce_is_used() {
        let signer = PrivateKeySigner::random();
        let nonce = AuthorizationNonce([0x07; 32]);
        let auth = sign_authorization(
            &signer,
            EvmAddress(Address::repeat_byte(0xbb)),
            TokenAmount::from(1u64),
            &test_domain(),
            SignOptions {
                nonce: Some(nonce),
                ..SignOptions::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(auth.authorization.nonce, nonce);
    }
}
