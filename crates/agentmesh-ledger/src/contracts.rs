//! Solidity interfaces of the three registries.
//!
//! The revert strings listed next to each write are the ones the deployed
//! contracts emit; [`crate::client`] maps them to typed errors.

use alloy_sol_types::sol;

sol! {
    /// `(domain, address) -> AgentId` registry. Registration pays a fixed fee.
    #[sol(rpc)]
    interface IIdentityRegistry {
        /// Reverts with "agent already registered" when the caller's address
        /// or the domain is already bound.
        function newAgent(string domain, address agentAddress) external payable returns (uint256 agentId);

        /// Reverts with "agent not registered" for unknown callers.
        function updateAgent(string newDomain) external;

        function resolveByAddress(address agentAddress) external view returns (uint256 agentId, string domain);

        function resolveByDomain(string domain) external view returns (uint256 agentId, address agentAddress);
    }

    /// One `(rating, timestamp)` entry per ordered (rater, ratee) pair.
    #[sol(rpc)]
    interface IReputationRegistry {
        /// Reverts with "rating out of range" above 100.
        function rateServer(uint256 serverId, uint8 rating) external;

        /// Reverts with "rating out of range" above 100.
        function rateClient(uint256 clientId, uint8 rating) external;

        function getRating(uint256 raterId, uint256 rateeId) external view returns (uint8 rating, bool exists);
    }

    /// Append-only validation requests and responses keyed by data hash.
    #[sol(rpc)]
    interface IValidationRegistry {
        function validationRequest(uint256 validatorId, uint256 sellerId, bytes32 dataHash) external;

        /// Reverts with "unauthorized validator", "already responded", or
        /// "request expired".
        function validationResponse(bytes32 dataHash, uint8 score) external;

        function getValidationRequest(bytes32 dataHash) external view returns (uint256 validatorId, uint256 sellerId, uint256 requestedAtBlock, bool exists);

        function getValidationResponse(bytes32 dataHash) external view returns (uint8 score, bool exists);
    }
}
