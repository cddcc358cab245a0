//! Agent base runtime for the agentmesh marketplace.
//!
//! Composes the payment protocol, the on-chain registries, and the A2A
//! discovery surface into a runnable agent: resolve a signing key, confirm
//! (or create) the on-chain identity, publish an AgentCard, gate skill
//! endpoints behind payment, and expose discover/buy/rate operations.
//!
//! - [`keyvault`] — signing-key resolution (env override, then vault backend).
//! - [`a2a`] — AgentCard types, publication, discovery, skill invocation.
//! - [`validation`] — the multi-role quality scorer and its on-chain hook.
//! - [`runtime`] — the bootstrap state machine and runtime surface.

pub mod a2a;
pub mod keyvault;
pub mod runtime;
pub mod validation;

pub use a2a::{A2aClient, A2aError, AgentCard, CardPublisher, Skill};
pub use keyvault::{KeyVault, KeyVaultError, MemoryStore, SecretStore, VaultStore};
pub use runtime::{AgentConfig, AgentError, AgentRuntime, BootPhase, IdentityLedger};
pub use validation::{
    ValidationEngine, ValidationError, ValidationLedger, ValidationResult, ValidationService,
    artifact_hash,
};
