//! Ledger-side identity and validation records.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Display;

use agentmesh::types::EvmAddress;

/// Dense integer identifier assigned by the identity registry at first
/// registration. Zero means "not yet registered".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub U256);

impl AgentId {
    pub const ZERO: AgentId = AgentId(U256::ZERO);

    pub fn is_registered(&self) -> bool {
        !self.0.is_zero()
    }
}

impl From<u64> for AgentId {
    fn from(value: u64) -> Self {
        AgentId(U256::from(value))
    }
}

impl From<AgentId> for U256 {
    fn from(value: AgentId) -> Self {
        value.0
    }
}

impl Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One identity registry entry. `(domain -> id)` and `(address -> id)` are
/// both bijections; records are never destroyed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub agent_id: AgentId,
    pub domain: String,
    pub address: EvmAddress,
}

/// A pending validation request read back from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationRequestRecord {
    pub validator_id: AgentId,
    pub seller_id: AgentId,
    pub requested_at_block: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_id_means_unregistered() {
        assert!(!AgentId::ZERO.is_registered());
        assert!(AgentId::from(1).is_registered());
    }

    #[test]
    fn record_serde_roundtrip() {
        let record = AgentRecord {
            agent_id: AgentId::from(7),
            domain: "karma-hello.example.test".to_string(),
            address: "0x5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e".parse().unwrap(),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: AgentRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
