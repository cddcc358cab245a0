//! Registry of known token deployments the marketplace settles with.
//!
//! The canonical asset is GLUE on Avalanche Fuji; USDC on Base Sepolia is kept
//! as a second deployment so multi-network payment requirements stay exercised.

use alloy_primitives::address;

use crate::types::{EvmAddress, Network, PaymentRequirements, Scheme, SupportedKind,
    TokenAmount, TokenEip712Metadata};
use crate::util::amount::{AmountParseError, MoneyAmount};

/// A token contract deployment: where it lives and how to sign for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDeployment {
    pub network: Network,
    pub address: EvmAddress,
    pub symbol: &'static str,
    pub decimals: u8,
    pub eip712: TokenEip712Metadata,
}

impl TokenDeployment {
    /// The payment-kind string for this deployment, e.g. `evm-eip3009-GLUE`.
    pub fn kind(&self) -> String {
        format!("evm-eip3009-{}", self.symbol)
    }

    pub fn supported_kind(&self) -> SupportedKind {
        SupportedKind {
            kind: self.kind(),
            scheme: Scheme::Exact,
            network: self.network,
            asset: self.address,
        }
    }

    /// Parses a human-readable amount (`"0.01"`) into this token's smallest unit.
    pub fn parse_amount(&self, input: &str) -> Result<TokenAmount, AmountParseError> {
        MoneyAmount::parse(input)?.as_token_amount(self.decimals as u32)
    }

    /// Payment requirements asking for `amount` paid to `pay_to` on this token.
    pub fn requirements_for(
        &self,
        pay_to: EvmAddress,
        amount: TokenAmount,
        max_timeout_seconds: u64,
    ) -> PaymentRequirements {
        PaymentRequirements {
            scheme: Scheme::Exact,
            network: self.network,
            asset: self.address,
            pay_to,
            max_amount: amount,
            max_timeout_seconds,
            extra: Some(self.eip712.clone()),
        }
    }
}

/// GLUE, the marketplace settlement token.
pub struct GLUE;

impl GLUE {
    pub fn avalanche_fuji() -> TokenDeployment {
        TokenDeployment {
            network: Network::AvalancheFuji,
            address: EvmAddress(address!("0x85a6b035bb4b80b10cbac67b0a4d1b2b0de4fbf0")),
            symbol: "GLUE",
            decimals: 6,
            eip712: TokenEip712Metadata {
                name: "Glue Token".to_string(),
                version: "1".to_string(),
            },
        }
    }
}

/// USDC on Base Sepolia, the secondary test deployment.
pub struct USDC;

impl USDC {
    pub fn base_sepolia() -> TokenDeployment {
        TokenDeployment {
            network: Network::BaseSepolia,
            address: EvmAddress(address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e")),
            symbol: "USDC",
            decimals: 6,
            eip712: TokenEip712Metadata {
                name: "USDC".to_string(),
                version: "2".to_string(),
            },
        }
    }
}

/// All deployments this build knows about.
pub fn known_deployments() -> Vec<TokenDeployment> {
    vec![GLUE::avalanche_fuji(), USDC::base_sepolia()]
}

/// Looks up a known deployment by network and asset address.
pub fn deployment_by_asset(network: Network, asset: EvmAddress) -> Option<TokenDeployment> {
    known_deployments()
        .into_iter()
        .find(|d| d.network == network && d.address == asset)
}
