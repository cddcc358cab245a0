//! Price declarations for pay-gated endpoints.

use agentmesh::networks::TokenDeployment;
use agentmesh::types::{EvmAddress, PaymentRequirements, TokenAmount};

/// Default settlement window offered to buyers, in seconds.
const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 3600;

/// What one endpoint costs: token, recipient, amount, and how long a signed
/// authorization may stay valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceTag {
    pub token: TokenDeployment,
    pub pay_to: EvmAddress,
    pub amount: TokenAmount,
    pub max_timeout_seconds: u64,
}

impl PriceTag {
    pub fn new(token: TokenDeployment, pay_to: EvmAddress, amount: TokenAmount) -> Self {
        Self {
            token,
            pay_to,
            amount,
            max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = seconds;
        self
    }

    /// The requirements entry advertised in `402` responses for this price.
    pub fn to_requirements(&self) -> PaymentRequirements {
        self.token
            .requirements_for(self.pay_to, self.amount, self.max_timeout_seconds)
    }
}
