//! Multi-role quality assessment of purchased data artifacts.
//!
//! Three roles score independently and a weighted blend decides the outcome:
//! a quality analyst (schema, completeness, timestamp coherence), a fraud
//! detector (duplication and uniformity heuristics), and a price reviewer
//! (fairness against the historical range for the artifact's data type).
//! Each role is a pure function of the artifact; the engine owns the only
//! accumulator and is stateless across invocations, so identical input always
//! produces the identical result.
//!
//! Degenerate input degrades the scores, it does not raise: malformed but
//! parseable data yields a low quality score plus an issue. Only bytes that
//! are not JSON at all are refused with [`ValidationError::DataMalformed`].

use alloy_primitives::{B256, keccak256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use agentmesh::types::{EvmAddress, TokenAmount, TransactionHash};
use agentmesh_ledger::{AgentId, LedgerClient, LedgerError, ValidationRequestRecord};

/// Overall score at or above which an artifact passes.
pub const PASS_THRESHOLD: u8 = 70;

/// Blend weights for (quality, fraud, price), in tenths.
const WEIGHT_QUALITY: u32 = 4;
const WEIGHT_FRAUD: u32 = 4;
const WEIGHT_PRICE: u32 = 2;

/// Timestamps outside this window are considered implausible (2000..2100).
const TIMESTAMP_MIN: u64 = 946_684_800;
const TIMESTAMP_MAX: u64 = 4_102_444_800;

/// Outcome of one validation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub quality: u8,
    pub fraud: u8,
    pub price: u8,
    pub overall: u8,
    pub passed: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The artifact is not JSON at all; scoring it would be meaningless.
    #[error("artifact is not decodable JSON: {0}")]
    DataMalformed(String),
}

/// Deterministic scorer over JSON data artifacts.
#[derive(Debug, Clone)]
pub struct ValidationEngine {
    /// Historical fair-price range per data type, in token units.
    price_ranges: BTreeMap<String, (u64, u64)>,
}

impl Default for ValidationEngine {
    fn default() -> Self {
        let mut price_ranges = BTreeMap::new();
        price_ranges.insert("chat-logs".to_string(), (5_000, 50_000));
        price_ranges.insert("transcripts".to_string(), (10_000, 100_000));
        price_ranges.insert("knowledge-graph".to_string(), (50_000, 500_000));
        Self { price_ranges }
    }
}

impl ValidationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the fair-price range for a data type.
    pub fn with_price_range<T: Into<String>>(mut self, data_type: T, low: u64, high: u64) -> Self {
        self.price_ranges.insert(data_type.into(), (low, high));
        self
    }

    /// Scores an artifact. `asking_price` is what the seller charges for it.
    pub fn evaluate(
        &self,
        artifact: &[u8],
        data_type: &str,
        asking_price: Option<TokenAmount>,
    ) -> Result<ValidationResult, ValidationError> {
        let text = std::str::from_utf8(artifact)
            .map_err(|_| ValidationError::DataMalformed("not valid UTF-8".to_string()))?;
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ValidationError::DataMalformed(e.to_string()))?;

        let entries = extract_entries(&value);
        let mut issues = Vec::new();

        let quality = quality_role(&entries, &mut issues);
        let fraud = fraud_role(&entries, &mut issues);
        let price = self.price_role(data_type, asking_price, &mut issues);

        let blended = (WEIGHT_QUALITY * quality as u32
            + WEIGHT_FRAUD * fraud as u32
            + WEIGHT_PRICE * price as u32
            + 5)
            / 10;
        let overall = blended.min(100) as u8;

        Ok(ValidationResult {
            quality,
            fraud,
            price,
            overall,
            passed: overall >= PASS_THRESHOLD,
            issues,
        })
    }

    fn price_role(
        &self,
        data_type: &str,
        asking_price: Option<TokenAmount>,
        issues: &mut Vec<String>,
    ) -> u8 {
        let Some((low, high)) = self.price_ranges.get(data_type).copied() else {
            issues.push("unknown-type".to_string());
            return 50;
        };
        let Some(price) = asking_price else {
            issues.push("no-asking-price".to_string());
            return 50;
        };
        let price: alloy_primitives::U256 = price.into();
        let price = if price > alloy_primitives::U256::from(u64::MAX) {
            u64::MAX
        } else {
            price.to::<u64>()
        };
        if price < low {
            issues.push("price-below-market-range".to_string());
            60
        } else if price > high {
            issues.push("price-above-market-range".to_string());
            let overshoot_pct = ((price - high).saturating_mul(100) / high).min(120);
            70u8.saturating_sub((overshoot_pct / 2) as u8)
        } else {
            // Fair range maps linearly onto 100..=70.
            let span = (high - low).max(1);
            (100 - (30 * (price - low) / span)) as u8
        }
    }
}

/// Pulls the list of records out of an artifact. Arrays are taken directly;
/// objects are searched for a conventional collection key, falling back to
/// the object itself as a single record.
fn extract_entries(value: &Value) -> Vec<&Value> {
    const COLLECTION_KEYS: [&str; 5] = ["records", "messages", "entries", "logs", "data"];
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => {
            for key in COLLECTION_KEYS {
                if let Some(Value::Array(items)) = map.get(key) {
                    return items.iter().collect();
                }
            }
            if map.is_empty() {
                Vec::new()
            } else {
                vec![value]
            }
        }
        _ => Vec::new(),
    }
}

fn timestamp_of(entry: &Value) -> Option<u64> {
    const TIMESTAMP_KEYS: [&str; 4] = ["timestamp", "ts", "time", "date"];
    let map = entry.as_object()?;
    for key in TIMESTAMP_KEYS {
        match map.get(key) {
            Some(Value::Number(n)) => return n.as_u64(),
            Some(Value::String(s)) => {
                if let Ok(n) = s.parse::<u64>() {
                    return Some(n);
                }
            }
            _ => {}
        }
    }
    None
}

/// Schema presence, field completeness, and timestamp coherence.
fn quality_role(entries: &[&Value], issues: &mut Vec<String>) -> u8 {
    if entries.is_empty() {
        issues.push("empty-artifact".to_string());
        return 5;
    }
    let mut score = 20u32;

    // Completeness: entries should be objects with at least two populated fields.
    let complete = entries
        .iter()
        .filter(|e| {
            e.as_object()
                .map(|m| m.values().filter(|v| !v.is_null()).count() >= 2)
                .unwrap_or(false)
        })
        .count();
    score += (40 * complete as u32) / entries.len() as u32;
    if complete < entries.len() {
        issues.push("incomplete-records".to_string());
    }

    // Timestamp coherence: present, plausible, and non-decreasing.
    let timestamps: Vec<u64> = entries.iter().filter_map(|e| timestamp_of(e)).collect();
    if timestamps.is_empty() {
        issues.push("missing-timestamps".to_string());
        score += 10;
    } else {
        let plausible = timestamps
            .iter()
            .all(|ts| (TIMESTAMP_MIN..TIMESTAMP_MAX).contains(ts));
        let ordered = timestamps.windows(2).all(|w| w[0] <= w[1]);
        if plausible && ordered {
            score += 40;
        } else if plausible {
            issues.push("timestamps-unordered".to_string());
            score += 20;
        } else {
            issues.push("timestamps-implausible".to_string());
        }
    }
    score.min(100) as u8
}

/// Duplication and uniformity heuristics.
fn fraud_role(entries: &[&Value], issues: &mut Vec<String>) -> u8 {
    if entries.is_empty() {
        issues.push("no-records-for-fraud-check".to_string());
        return 30;
    }
    let serialized: Vec<String> = entries
        .iter()
        .map(|e| serde_json::to_string(e).unwrap_or_default())
        .collect();
    let unique: HashSet<&str> = serialized.iter().map(String::as_str).collect();
    let ratio = (100 * unique.len()) / serialized.len();
    if serialized.len() > 1 && unique.len() == 1 {
        issues.push("uniform-records".to_string());
    } else if ratio < 90 {
        issues.push("duplicate-records".to_string());
    }
    ratio.min(100) as u8
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationServiceError {
    #[error(transparent)]
    Malformed(#[from] ValidationError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Responding would cost more than the validator holds.
    #[error("balance {balance} cannot cover validator fee {fee}")]
    InsufficientBalance {
        balance: TokenAmount,
        fee: TokenAmount,
    },
}

/// The slice of the ledger the validation hook needs. [`LedgerClient`] is the
/// production implementation; tests substitute an in-memory registry.
pub trait ValidationLedger: Send + Sync {
    fn own_address(&self) -> EvmAddress;

    fn get_validation_request(
        &self,
        data_hash: B256,
    ) -> impl Future<Output = Result<Option<ValidationRequestRecord>, LedgerError>> + Send;

    fn get_validation_response(
        &self,
        data_hash: B256,
    ) -> impl Future<Output = Result<Option<u8>, LedgerError>> + Send;

    fn respond_validation(
        &self,
        data_hash: B256,
        score: u8,
    ) -> impl Future<Output = Result<TransactionHash, LedgerError>> + Send;

    fn token_balance(
        &self,
        address: EvmAddress,
    ) -> impl Future<Output = Result<TokenAmount, LedgerError>> + Send;
}

impl ValidationLedger for LedgerClient {
    fn own_address(&self) -> EvmAddress {
        self.address()
    }

    async fn get_validation_request(
        &self,
        data_hash: B256,
    ) -> Result<Option<ValidationRequestRecord>, LedgerError> {
        LedgerClient::get_validation_request(self, data_hash).await
    }

    async fn get_validation_response(
        &self,
        data_hash: B256,
    ) -> Result<Option<u8>, LedgerError> {
        LedgerClient::get_validation_response(self, data_hash).await
    }

    async fn respond_validation(
        &self,
        data_hash: B256,
        score: u8,
    ) -> Result<TransactionHash, LedgerError> {
        LedgerClient::respond_validation(self, data_hash, score).await
    }

    async fn token_balance(&self, address: EvmAddress) -> Result<TokenAmount, LedgerError> {
        LedgerClient::token_balance(self, address).await
    }
}

/// The engine plus its on-chain hook: after scoring, a pending validation
/// request addressed to this validator is answered with the overall score.
/// That response is the only gas-paying write on the critical path.
pub struct ValidationService<L> {
    engine: ValidationEngine,
    ledger: L,
    own_id: AgentId,
    validator_fee: TokenAmount,
}

impl<L: ValidationLedger> ValidationService<L> {
    pub fn new(
        engine: ValidationEngine,
        ledger: L,
        own_id: AgentId,
        validator_fee: TokenAmount,
    ) -> Self {
        Self {
            engine,
            ledger,
            own_id,
            validator_fee,
        }
    }

    /// Scores the artifact and, when a pending on-chain request names this
    /// validator, records the overall score. Returns the result and the
    /// response transaction, if one was sent.
    pub async fn score_and_respond(
        &self,
        artifact: &[u8],
        data_type: &str,
        asking_price: Option<TokenAmount>,
    ) -> Result<(ValidationResult, Option<TransactionHash>), ValidationServiceError> {
        let result = self.engine.evaluate(artifact, data_type, asking_price)?;
        let hash = artifact_hash(artifact);

        let Some(request) = self.ledger.get_validation_request(hash).await? else {
            return Ok((result, None));
        };
        if request.validator_id != self.own_id {
            return Ok((result, None));
        }
        if self.ledger.get_validation_response(hash).await?.is_some() {
            tracing::debug!(%hash, "request already responded");
            return Ok((result, None));
        }
        if !self.validator_fee.is_zero() {
            let balance = self.ledger.token_balance(self.ledger.own_address()).await?;
            if balance < self.validator_fee {
                return Err(ValidationServiceError::InsufficientBalance {
                    balance,
                    fee: self.validator_fee,
                });
            }
        }
        let tx = self.ledger.respond_validation(hash, result.overall).await?;
        tracing::info!(%hash, score = result.overall, %tx, "validation response recorded");
        Ok((result, Some(tx)))
    }
}

/// Keccak-256 hash identifying an artifact on-chain.
pub fn artifact_hash(artifact: &[u8]) -> B256 {
    keccak256(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_artifact() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "records": [
                { "user": "alice", "text": "gm", "timestamp": 1_700_000_000u64 },
                { "user": "bob", "text": "gm gm", "timestamp": 1_700_000_060u64 },
                { "user": "carol", "text": "wagmi", "timestamp": 1_700_000_120u64 },
            ]
        }))
        .unwrap()
    }

    #[test]
    fn healthy_artifact_passes() {
        let engine = ValidationEngine::new();
        let result = engine
            .evaluate(&healthy_artifact(), "chat-logs", Some(TokenAmount::from(10_000u64)))
            .unwrap();
        assert!(result.passed, "unexpected failure: {:?}", result);
        assert!(result.overall >= PASS_THRESHOLD);
        assert!(result.issues.is_empty(), "issues: {:?}", result.issues);
    }

    #[test]
    fn scores_stay_in_range_for_every_input() {
        let engine = ValidationEngine::new();
        let inputs: Vec<Vec<u8>> = vec![
            healthy_artifact(),
            b"{}".to_vec(),
            b"[]".to_vec(),
            b"[1, 2, 3]".to_vec(),
            serde_json::to_vec(&serde_json::json!({
                "records": [{ "a": 1, "b": 2 }, { "a": 1, "b": 2 }]
            }))
            .unwrap(),
        ];
        for input in inputs {
            for data_type in ["chat-logs", "dreams"] {
                let result = engine
                    .evaluate(&input, data_type, Some(TokenAmount::from(10_000u64)))
                    .unwrap();
                assert!(result.overall <= 100);
                assert_eq!(result.passed, result.overall >= PASS_THRESHOLD);
            }
        }
    }

    #[test]
    fn empty_artifact_scores_low_with_issue() {
        let engine = ValidationEngine::new();
        let result = engine
            .evaluate(b"{}", "chat-logs", Some(TokenAmount::from(10_000u64)))
            .unwrap();
        assert!(!result.passed);
        assert!(result.issues.iter().any(|i| i == "empty-artifact"));
    }

    #[test]
    fn duplicated_records_are_flagged() {
        let engine = ValidationEngine::new();
        let artifact = serde_json::to_vec(&serde_json::json!({
            "records": [
                { "user": "alice", "text": "gm", "timestamp": 1_700_000_000u64 },
                { "user": "alice", "text": "gm", "timestamp": 1_700_000_000u64 },
                { "user": "alice", "text": "gm", "timestamp": 1_700_000_000u64 },
            ]
        }))
        .unwrap();
        let result = engine
            .evaluate(&artifact, "chat-logs", Some(TokenAmount::from(10_000u64)))
            .unwrap();
        assert!(result.fraud < 50);
        assert!(result.issues.iter().any(|i| i == "uniform-records"));
    }

    #[test]
    fn unordered_timestamps_are_flagged() {
        let engine = ValidationEngine::new();
        let artifact = serde_json::to_vec(&serde_json::json!({
            "records": [
                { "user": "alice", "text": "gm", "timestamp": 1_700_000_120u64 },
                { "user": "bob", "text": "gm gm", "timestamp": 1_700_000_000u64 },
            ]
        }))
        .unwrap();
        let result = engine
            .evaluate(&artifact, "chat-logs", Some(TokenAmount::from(10_000u64)))
            .unwrap();
        assert!(result.issues.iter().any(|i| i == "timestamps-unordered"));
    }

    #[test]
    fn unknown_data_type_gets_neutral_price_and_issue() {
        let engine = ValidationEngine::new();
        let result = engine
            .evaluate(&healthy_artifact(), "dreams", Some(TokenAmount::from(10_000u64)))
            .unwrap();
        assert_eq!(result.price, 50);
        assert!(result.issues.iter().any(|i| i == "unknown-type"));
    }

    #[test]
    fn gouged_price_is_penalized() {
        let engine = ValidationEngine::new();
        let result = engine
            .evaluate(
                &healthy_artifact(),
                "chat-logs",
                Some(TokenAmount::from(10_000_000u64)),
            )
            .unwrap();
        assert!(result.price < 70);
        assert!(result.issues.iter().any(|i| i == "price-above-market-range"));
    }

    #[test]
    fn non_json_bytes_are_refused_not_crashed() {
        let engine = ValidationEngine::new();
        assert!(matches!(
            engine.evaluate(b"\xff\xfe\x00", "chat-logs", None),
            Err(ValidationError::DataMalformed(_))
        ));
        assert!(matches!(
            engine.evaluate(b"not json at all", "chat-logs", None),
            Err(ValidationError::DataMalformed(_))
        ));
    }

    #[test]
    fn scoring_is_deterministic() {
        let engine = ValidationEngine::new();
        let a = engine
            .evaluate(&healthy_artifact(), "chat-logs", Some(TokenAmount::from(10_000u64)))
            .unwrap();
        let b = engine
            .evaluate(&healthy_artifact(), "chat-logs", Some(TokenAmount::from(10_000u64)))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn data_hash_is_keccak256() {
        assert_eq!(artifact_hash(b"artifact"), keccak256(b"artifact"));
    }
}
