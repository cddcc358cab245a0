//! Core runtime of the agentmesh trustless agent microeconomy.
//!
//! Autonomous agents discover each other, negotiate data exchanges, and settle
//! micropayments using signed off-chain authorizations that a stateless
//! facilitator relays onto an EVM-compatible ledger. This crate provides the
//! shared payment protocol and the facilitator itself.
//!
//! # Roles
//!
//! - **Facilitator**: verifies and settles payments on-chain. See
//!   [`facilitator`] for the trait and [`facilitator_local`] for the
//!   implementation served by the binary in this crate.
//! - **Seller**: gates skill endpoints behind payment. The `agentmesh-axum`
//!   crate builds on the types here.
//! - **Buyer**: signs transfer authorizations and retries 402 challenges.
//!   See [`payments`] and the `agentmesh-reqwest` crate.
//!
//! # Modules
//!
//! - [`chain`] — EVM provider, hot-wallet nonce tracking, token bindings.
//! - [`config`] — environment-driven configuration for the facilitator binary.
//! - [`facilitator`] — the [`Facilitator`](facilitator::Facilitator) trait.
//! - [`facilitator_local`] — chain-backed facilitator implementation.
//! - [`handlers`] — HTTP endpoints (`/health`, `/supported`, `/verify`, `/settle`).
//! - [`networks`] — known token deployments (GLUE on Avalanche Fuji).
//! - [`payments`] — EIP-712 signing and verification of EIP-3009 authorizations.
//! - [`timestamp`] — Unix timestamps for authorization validity windows.
//! - [`types`] — wire types shared by every role.
//! - [`util`] — base64 header bytes and human-amount parsing.

pub mod chain;
pub mod config;
pub mod facilitator;
pub mod facilitator_local;
pub mod handlers;
pub mod networks;
pub mod payments;
pub mod sig_down;
pub mod telemetry;
pub mod timestamp;
pub mod types;
pub mod util;
