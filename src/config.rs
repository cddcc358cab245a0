//! Configuration for the facilitator binary.
//!
//! Everything is sourced from CLI flags or environment variables (loaded from
//! `.env` at startup). The hot-wallet key never appears in logs.

use alloy_primitives::B256;
use alloy_signer_local::PrivateKeySigner;
use clap::Parser;
use std::net::IpAddr;
use std::str::FromStr;
use url::Url;

use crate::types::Network;

/// Facilitator server configuration.
#[derive(Parser, Debug, Clone)]
#[command(name = "agentmesh", about = "agentmesh payment facilitator")]
pub struct Config {
    /// Address to bind the HTTP server on.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to bind the HTTP server on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Network this instance settles on.
    #[arg(long, env = "NETWORK", default_value = "avalanche-fuji")]
    pub network: String,

    /// JSON-RPC endpoint of the settled chain.
    #[arg(long, env = "RPC_URL")]
    pub rpc_url: Url,

    /// Hot-wallet private key, 0x-prefixed hex. The wallet pays settlement gas.
    #[arg(long, env = "EVM_PRIVATE_KEY", hide_env_values = true)]
    pub evm_private_key: String,

    /// Whether the chain supports EIP-1559 fee markets.
    #[arg(long, env = "EIP1559", default_value_t = true, action = clap::ArgAction::Set)]
    pub eip1559: bool,

    /// Seconds to wait for a settlement receipt before giving up.
    #[arg(long, env = "TX_RECEIPT_TIMEOUT_SECS", default_value_t = 30)]
    pub receipt_timeout_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown network: {0}")]
    UnknownNetwork(String),
    #[error("invalid hot-wallet private key")]
    InvalidPrivateKey,
}

impl Config {
    pub fn load() -> Result<Self, clap::Error> {
        Config::try_parse()
    }

    pub fn network(&self) -> Result<Network, ConfigError> {
        Network::from_str(&self.network)
            .map_err(|_| ConfigError::UnknownNetwork(self.network.clone()))
    }

    /// Parses the hot-wallet key into a signer. Accepts 0x-prefixed or bare hex.
    pub fn signer(&self) -> Result<PrivateKeySigner, ConfigError> {
        let trimmed = self.evm_private_key.trim();
        let hex_str = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes =
            hex::decode(hex_str).map_err(|_| ConfigError::InvalidPrivateKey)?;
        if bytes.len() != 32 {
            return Err(ConfigError::InvalidPrivateKey);
        }
        let key = B256::from_slice(&bytes);
        PrivateKeySigner::from_bytes(&key).map_err(|_| ConfigError::InvalidPrivateKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_key(key: &str) -> Config {
        Config {
            host: "127.0.0.1".parse().unwrap(),
            port: 8080,
            network: "avalanche-fuji".to_string(),
            rpc_url: Url::parse("http://localhost:8545").unwrap(),
            evm_private_key: key.to_string(),
            eip1559: true,
            receipt_timeout_secs: 30,
        }
    }

    #[test]
    fn parses_prefixed_and_bare_keys() {
        let hex_key = "01".repeat(32);
        assert!(config_with_key(&hex_key).signer().is_ok());
        assert!(config_with_key(&format!("0x{hex_key}")).signer().is_ok());
    }

    #[test]
    fn rejects_short_key() {
        assert!(matches!(
            config_with_key("0xdeadbeef").signer(),
            Err(ConfigError::InvalidPrivateKey)
        ));
    }

    #[test]
    fn resolves_network() {
        let config = config_with_key(&"01".repeat(32));
        assert_eq!(config.network().unwrap(), Network::AvalancheFuji);
    }
}
