//! Wire types for the agentmesh payment protocol.
//!
//! The key objects are [`PaymentPayload`], [`PaymentRequirements`], [`VerifyResponse`],
//! and [`SettleResponse`], which encode payment intent, authorization, and the result of
//! verification/settlement. All of them cross HTTP boundaries as camelCase JSON;
//! integers that may exceed 2^53 travel as strings.
//!
//! Payments ride on EIP-3009 `transferWithAuthorization` messages signed as EIP-712
//! typed data, so the types here mirror that struct field for field.

use alloy_primitives::{Address, B256, U256, hex};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

use crate::timestamp::UnixTimestamp;
use crate::util::b64::Base64Bytes;

/// Protocol version carried in every payment payload. Only version 1 exists.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum X402Version {
    V1,
}

impl Serialize for X402Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(1)
    }
}

impl<'de> Deserialize<'de> for X402Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let num = u8::deserialize(deserializer)?;
        match num {
            1 => Ok(X402Version::V1),
            other => Err(DeError::custom(format!("unsupported x402Version: {other}"))),
        }
    }
}

/// Payment scheme. The marketplace settles exact amounts only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Exact => write!(f, "exact"),
        }
    }
}

/// EVM networks this runtime knows how to settle on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    AvalancheFuji,
    BaseSepolia,
}

impl Network {
    /// Numeric EIP-155 chain id.
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::AvalancheFuji => 43113,
            Network::BaseSepolia => 84532,
        }
    }

    pub fn from_chain_id(chain_id: u64) -> Option<Self> {
        match chain_id {
            43113 => Some(Network::AvalancheFuji),
            84532 => Some(Network::BaseSepolia),
            _ => None,
        }
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Network::AvalancheFuji => "avalanche-fuji",
            Network::BaseSepolia => "base-sepolia",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown network {0}")]
pub struct NetworkParseError(String);

impl FromStr for Network {
    type Err = NetworkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avalanche-fuji" => Ok(Network::AvalancheFuji),
            "base-sepolia" => Ok(Network::BaseSepolia),
            other => Err(NetworkParseError(other.to_string())),
        }
    }
}

/// Wrapper around [`alloy_primitives::Address`] providing display/serde support.
/// Used throughout the protocol for typed on-chain party identification.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvmAddress(pub Address);

impl Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Address> for EvmAddress {
    fn from(address: Address) -> Self {
        EvmAddress(address)
    }
}

impl From<EvmAddress> for Address {
    fn from(address: EvmAddress) -> Self {
        address.0
    }
}

impl FromStr for EvmAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_str(s)
            .map(EvmAddress)
            .map_err(|_| AddressParseError(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid EVM address {0}")]
pub struct AddressParseError(String);

/// A 65-byte ECDSA signature over an EIP-712 digest, hex-encoded with `0x` prefix.
/// The trailing recovery byte is 27 or 28.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EvmSignature(pub [u8; 65]);

impl EvmSignature {
    /// Recovery id byte as placed on the wire.
    pub fn v(&self) -> u8 {
        self.0[64]
    }

    pub fn r(&self) -> B256 {
        B256::from_slice(&self.0[0..32])
    }

    pub fn s(&self) -> B256 {
        B256::from_slice(&self.0[32..64])
    }
}

impl From<[u8; 65]> for EvmSignature {
    fn from(bytes: [u8; 65]) -> Self {
        EvmSignature(bytes)
    }
}

impl<'de> Deserialize<'de> for EvmSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;

        static SIG_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{130}$").expect("invalid signature regex"));

        if !SIG_REGEX.is_match(&s) {
            return Err(DeError::custom(
                "invalid signature format: must be 0x-prefixed and 130 hex chars",
            ));
        }
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| DeError::custom("invalid hex in signature"))?;
        let array: [u8; 65] = bytes
            .try_into()
            .map_err(|_| DeError::custom("signature must be exactly 65 bytes"))?;
        Ok(EvmSignature(array))
    }
}

impl Serialize for EvmSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

/// A 32-byte single-use authorization nonce, hex-encoded with `0x` prefix.
/// Unique per `(signer, nonce)` pair forever.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AuthorizationNonce(pub [u8; 32]);

impl AuthorizationNonce {
    /// Fresh cryptographically random nonce.
    pub fn random() -> Self {
        let bytes: [u8; 32] = rand::random();
        AuthorizationNonce(bytes)
    }
}

impl From<AuthorizationNonce> for B256 {
    fn from(nonce: AuthorizationNonce) -> Self {
        B256::from(nonce.0)
    }
}

impl Display for AuthorizationNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for AuthorizationNonce {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;

        static NONCE_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("invalid nonce regex"));

        if !NONCE_REGEX.is_match(&s) {
            return Err(DeError::custom("invalid nonce format"));
        }
        let bytes = hex::decode(&s[2..]).map_err(|_| DeError::custom("invalid hex in nonce"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| DeError::custom("invalid nonce length"))?;
        Ok(AuthorizationNonce(array))
    }
}

impl Serialize for AuthorizationNonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// A token amount in the token's smallest unit.
/// Serialized as a decimal string to prevent precision loss in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(U256::from(value))
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        TokenAmount(value)
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let value = U256::from_str_radix(&s, 10)
            .map_err(|_| DeError::custom("amount is not a valid non-negative integer"))?;
        Ok(TokenAmount(value))
    }
}

/// A 32-byte EVM transaction hash, hex-encoded with `0x` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHash(pub [u8; 32]);

impl From<B256> for TransactionHash {
    fn from(hash: B256) -> Self {
        TransactionHash(hash.0)
    }
}

impl Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for TransactionHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;

        static TX_HASH_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("invalid tx hash regex"));

        if !TX_HASH_REGEX.is_match(&s) {
            return Err(DeError::custom("invalid transaction hash format"));
        }
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| DeError::custom("invalid hex in transaction hash"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| DeError::custom("transaction hash must be exactly 32 bytes"))?;
        Ok(TransactionHash(array))
    }
}

impl Serialize for TransactionHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// The EIP-712 message content of an EIP-3009 transfer authorization:
/// who pays whom, how much, and inside which validity window.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationMessage {
    pub from: EvmAddress,
    pub to: EvmAddress,
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: AuthorizationNonce,
}

/// A complete signed payment intent: the authorization message plus the
/// payer's EIP-712 signature over it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAuthorization {
    pub signature: EvmSignature,
    pub authorization: AuthorizationMessage,
}

/// The `X-Payment` header content: a scheme/network-tagged [`TransferAuthorization`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: Network,
    pub payload: TransferAuthorization,
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentHeaderError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl TryFrom<Base64Bytes<'_>> for PaymentPayload {
    type Error = PaymentHeaderError;

    fn try_from(bytes: Base64Bytes<'_>) -> Result<Self, Self::Error> {
        let decoded = bytes.decode()?;
        Ok(serde_json::from_slice(&decoded)?)
    }
}

impl TryFrom<&PaymentPayload> for Base64Bytes<'static> {
    type Error = PaymentHeaderError;

    fn try_from(payload: &PaymentPayload) -> Result<Self, Self::Error> {
        let json = serde_json::to_vec(payload)?;
        Ok(Base64Bytes::encode(json))
    }
}

/// EIP-712 domain metadata for a token, carried in `PaymentRequirements.extra`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenEip712Metadata {
    pub name: String,
    pub version: String,
}

/// A seller's declaration of what it will accept for a given resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: Scheme,
    pub network: Network,
    pub asset: EvmAddress,
    pub pay_to: EvmAddress,
    pub max_amount: TokenAmount,
    pub max_timeout_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<TokenEip712Metadata>,
}

/// Body of a `402 Payment Required` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredResponse {
    pub x402_version: X402Version,
    pub accepts: Vec<PaymentRequirements>,
    pub error: String,
}

impl Display for PaymentRequiredResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

/// Request body of `POST /verify` and `POST /settle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub payment_payload: PaymentPayload,
    pub payment_requirements: PaymentRequirements,
}

/// Settlement reuses the verification request shape.
pub type SettleRequest = VerifyRequest;

/// Outcome of `POST /verify`. Always carried in a `200` response so the
/// caller can inspect the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VerifyResponse {
    pub fn valid() -> Self {
        VerifyResponse {
            is_valid: true,
            reason: None,
        }
    }

    pub fn invalid<R: Into<String>>(reason: R) -> Self {
        VerifyResponse {
            is_valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Outcome of `POST /settle`, and the content of the `X-Payment-Response` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SettleResponse {
    pub fn settled(transaction: TransactionHash) -> Self {
        SettleResponse {
            success: true,
            transaction: Some(transaction),
            reason: None,
        }
    }

    pub fn failed<R: Into<String>>(reason: R) -> Self {
        SettleResponse {
            success: false,
            transaction: None,
            reason: Some(reason.into()),
        }
    }
}

impl TryFrom<&SettleResponse> for Base64Bytes<'static> {
    type Error = PaymentHeaderError;

    fn try_from(response: &SettleResponse) -> Result<Self, Self::Error> {
        let json = serde_json::to_vec(response)?;
        Ok(Base64Bytes::encode(json))
    }
}

impl TryFrom<Base64Bytes<'_>> for SettleResponse {
    type Error = PaymentHeaderError;

    fn try_from(bytes: Base64Bytes<'_>) -> Result<Self, Self::Error> {
        let decoded = bytes.decode()?;
        Ok(serde_json::from_slice(&decoded)?)
    }
}

/// One settleable payment kind, as enumerated by `GET /supported`.
/// The `kind` string follows the `evm-eip3009-<symbol>` convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedKind {
    pub kind: String,
    pub scheme: Scheme,
    pub network: Network,
    pub asset: EvmAddress,
}

/// Response body of `GET /supported`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedResponse {
    pub kinds: Vec<SupportedKind>,
}

/// Response body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub chain_id: u64,
}
