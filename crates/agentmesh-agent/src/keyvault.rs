//! Signing-key resolution.
//!
//! Keys resolve in a fixed order: a process-local `PRIVATE_KEY` environment
//! variable, then the shared vault backend. The vault stores user-agent keys
//! under a nested `user-agents/<name>` path and system agents at the top
//! level; lookups try both so callers never care which kind they are.
//!
//! Whitespace-only values are treated as absent everywhere. An env var set to
//! `"  \n"` is not a key, and neither is a blank vault record.

use alloy_primitives::B256;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum KeyVaultError {
    #[error("no key found for agent {0}")]
    KeyNotFound(String),
    #[error("vault backend unavailable: {0}")]
    VaultUnavailable(String),
    #[error("key material for agent {0} is not a 32-byte hex string")]
    InvalidKey(String),
}

/// A backend that can fetch named secret records.
pub trait SecretStore: Send + Sync {
    /// Returns the record named `name`, or `None` when absent. Transport
    /// failures and timeouts surface as [`KeyVaultError::VaultUnavailable`] —
    /// never as an empty key.
    fn fetch(&self, name: &str) -> impl Future<Output = Result<Option<String>, KeyVaultError>> + Send;
}

/// Treats whitespace-only strings as absent.
fn non_blank(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn parse_key(agent_name: &str, value: &str) -> Result<B256, KeyVaultError> {
    let hex_str = value.trim().strip_prefix("0x").unwrap_or(value.trim());
    let bytes = alloy_primitives::hex::decode(hex_str)
        .map_err(|_| KeyVaultError::InvalidKey(agent_name.to_string()))?;
    if bytes.len() != 32 {
        return Err(KeyVaultError::InvalidKey(agent_name.to_string()));
    }
    Ok(B256::from_slice(&bytes))
}

/// Resolves signing keys by agent name.
#[derive(Debug, Clone)]
pub struct KeyVault<S> {
    store: S,
    env_override: Option<String>,
}

impl<S: SecretStore> KeyVault<S> {
    /// Captures the `PRIVATE_KEY` environment variable at construction.
    pub fn new(store: S) -> Self {
        Self {
            env_override: std::env::var("PRIVATE_KEY").ok(),
            store,
        }
    }

    /// Constructor with an explicit override, for tests and embedding.
    pub fn with_override(store: S, env_override: Option<String>) -> Self {
        Self {
            store,
            env_override,
        }
    }

    /// Resolves the signing key for `agent_name`.
    pub async fn private_key(&self, agent_name: &str) -> Result<B256, KeyVaultError> {
        if let Some(value) = self.env_override.as_deref().and_then(non_blank) {
            tracing::debug!(agent = agent_name, "using PRIVATE_KEY override");
            return parse_key(agent_name, value);
        }

        // User agents first, then the top-level record.
        let nested = format!("user-agents/{agent_name}");
        for name in [nested.as_str(), agent_name] {
            if let Some(value) = self.store.fetch(name).await? {
                if let Some(value) = non_blank(&value) {
                    return parse_key(agent_name, value);
                }
            }
        }
        Err(KeyVaultError::KeyNotFound(agent_name.to_string()))
    }
}

/// HTTP key-value vault backend.
///
/// Reads `GET <base>/v1/secret/data/<name>` with an auth token header; the
/// secret document nests the value as `data.data.value`. A deadline applies
/// to every call and an expired deadline is an unavailable vault, not a
/// missing key.
#[derive(Debug, Clone)]
pub struct VaultStore {
    http: reqwest::Client,
    base_url: Url,
    token: String,
    timeout: Duration,
}

impl VaultStore {
    pub fn new(base_url: Url, token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            token,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn secret_url(&self, name: &str) -> Result<Url, KeyVaultError> {
        self.base_url
            .join(&format!("v1/secret/data/{name}"))
            .map_err(|e| KeyVaultError::VaultUnavailable(e.to_string()))
    }
}

impl SecretStore for VaultStore {
    async fn fetch(&self, name: &str) -> Result<Option<String>, KeyVaultError> {
        let url = self.secret_url(name)?;
        let response = self
            .http
            .get(url)
            .header("X-Vault-Token", &self.token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| KeyVaultError::VaultUnavailable(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(KeyVaultError::VaultUnavailable(format!(
                "vault returned {}",
                response.status()
            )));
        }
        let document: serde_json::Value = response
            .json()
            .await
            .map_err(|e| KeyVaultError::VaultUnavailable(e.to_string()))?;
        Ok(document
            .pointer("/data/data/value")
            .and_then(|v| v.as_str())
            .map(ToOwned::to_owned))
    }
}

/// In-memory backend for tests and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.records.insert(name.into(), value.into());
        self
    }
}

impl SecretStore for MemoryStore {
    async fn fetch(&self, name: &str) -> Result<Option<String>, KeyVaultError> {
        Ok(self.records.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_HEX: &str = "0101010101010101010101010101010101010101010101010101010101010101";

    #[tokio::test]
    async fn env_override_wins_over_store() {
        let store = MemoryStore::new().with_record("karma-hello", "0xdeadbeef");
        let vault = KeyVault::with_override(store, Some(format!("0x{KEY_HEX}")));
        let key = vault.private_key("karma-hello").await.unwrap();
        assert_eq!(key, B256::repeat_byte(0x01));
    }

    #[tokio::test]
    async fn whitespace_override_is_not_a_key() {
        let store = MemoryStore::new().with_record("karma-hello", KEY_HEX);
        let vault = KeyVault::with_override(store, Some("  \n\t ".to_string()));
        let key = vault.private_key("karma-hello").await.unwrap();
        assert_eq!(key, B256::repeat_byte(0x01));
    }

    #[tokio::test]
    async fn nested_user_agent_record_is_preferred() {
        let store = MemoryStore::new()
            .with_record("user-agents/karma-hello", KEY_HEX)
            .with_record("karma-hello", "0202020202020202020202020202020202020202020202020202020202020202");
        let vault = KeyVault::with_override(store, None);
        let key = vault.private_key("karma-hello").await.unwrap();
        assert_eq!(key, B256::repeat_byte(0x01));
    }

    #[tokio::test]
    async fn top_level_record_serves_system_agents() {
        let store = MemoryStore::new().with_record("facilitator", KEY_HEX);
        let vault = KeyVault::with_override(store, None);
        assert!(vault.private_key("facilitator").await.is_ok());
    }

    #[tokio::test]
    async fn whitespace_record_counts_as_absent() {
        let store = MemoryStore::new().with_record("karma-hello", "   ");
        let vault = KeyVault::with_override(store, None);
        assert!(matches!(
            vault.private_key("karma-hello").await,
            Err(KeyVaultError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_everywhere_is_key_not_found() {
        let vault = KeyVault::with_override(MemoryStore::new(), None);
        assert!(matches!(
            vault.private_key("ghost").await,
            Err(KeyVaultError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn malformed_key_material_is_rejected() {
        let store = MemoryStore::new().with_record("karma-hello", "not-hex");
        let vault = KeyVault::with_override(store, None);
        assert!(matches!(
            vault.private_key("karma-hello").await,
            Err(KeyVaultError::InvalidKey(_))
        ));
    }
}
