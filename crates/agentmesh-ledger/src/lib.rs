//! Typed facade over the agentmesh on-chain registries.
//!
//! Three registry contracts and one token contract make up the ledger surface:
//!
//! - **Identity**: `(domain, address) -> AgentId`, dense ids, one record per
//!   address for the life of the agent.
//! - **Reputation**: one `(rating, timestamp)` entry per ordered
//!   `(rater, ratee)` pair, overwritten on re-rating.
//! - **Validation**: append-only request/response pairs keyed by a data hash.
//! - **Token**: EIP-20 balance reads; transfers themselves go through the
//!   facilitator, never through this client.
//!
//! Every write builds a transaction, signs it with the agent's key, submits,
//! and waits for one confirmation. Transport failures are retried with
//! exponential backoff; reverts are decoded into typed errors and surfaced
//! immediately.

pub mod client;
pub mod contracts;
pub mod types;

pub use client::{LedgerClient, LedgerError, RatingDirection, RegistryAddresses};
pub use types::{AgentId, AgentRecord, ValidationRequestRecord};
