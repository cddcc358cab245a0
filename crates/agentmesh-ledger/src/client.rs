//! The ledger client: registry reads and confirmed writes.

use alloy_network::{Ethereum, EthereumWallet};
use alloy_primitives::{B256, U256};
use alloy_provider::{DynProvider, PendingTransactionBuilder, Provider, ProviderBuilder};
use alloy_signer_local::PrivateKeySigner;
use alloy_transport::RpcError;
use std::time::Duration;
use tracing::instrument;
use url::Url;

use agentmesh::chain::IEip3009Token;
use agentmesh::types::{EvmAddress, TokenAmount, TransactionHash};

use crate::contracts::{IIdentityRegistry, IReputationRegistry, IValidationRegistry};
use crate::types::{AgentId, AgentRecord, ValidationRequestRecord};

/// Delays between retries of transport-level failures.
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Where the registries and the token live on the settled chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryAddresses {
    pub identity: EvmAddress,
    pub reputation: EvmAddress,
    pub validation: EvmAddress,
    pub token: EvmAddress,
}

/// Which contract entry point records a rating. Reads are direction-agnostic:
/// the registry keys entries on the ordered (rater, ratee) pair either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingDirection {
    /// A client rating the server it bought from.
    ClientRatesServer,
    /// A server rating the client it sold to.
    ServerRatesClient,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("agent already registered")]
    AlreadyRegistered,
    #[error("agent not registered")]
    NotRegistered,
    #[error("rating {0} out of range 0..=100")]
    InvalidRating(u8),
    #[error("caller is not the designated validator")]
    UnauthorizedValidator,
    #[error("validation request already responded")]
    AlreadyResponded,
    #[error("validation request expired")]
    RequestExpired,
    #[error("no validation request for this data hash")]
    RequestNotFound,
    #[error("transaction reverted: {0}")]
    Reverted(String),
    /// The node accepted the transaction but the receipt poll failed. The
    /// transaction may or may not have been mined; callers reconcile on the
    /// next state read instead of resubmitting.
    #[error("receipt unavailable for accepted transaction: {0}")]
    ReceiptUnknown(String),
    #[error("rpc failure: {0}")]
    Rpc(String),
}

impl LedgerError {
    /// Transport failures before node acceptance are retried; everything
    /// else propagates unchanged. In particular [`LedgerError::ReceiptUnknown`]
    /// is not retryable: replaying the submission could double-spend a
    /// transaction the node already holds.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Rpc(_))
    }

    /// Maps a node-reported revert message to a typed error.
    pub fn from_revert_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("already registered") {
            LedgerError::AlreadyRegistered
        } else if lower.contains("not registered") {
            LedgerError::NotRegistered
        } else if lower.contains("rating out of range") {
            LedgerError::InvalidRating(u8::MAX)
        } else if lower.contains("unauthorized validator") {
            LedgerError::UnauthorizedValidator
        } else if lower.contains("already responded") {
            LedgerError::AlreadyResponded
        } else if lower.contains("request expired") {
            LedgerError::RequestExpired
        } else if lower.contains("no validation request") {
            LedgerError::RequestNotFound
        } else {
            LedgerError::Reverted(message.to_string())
        }
    }
}

fn classify(error: alloy_contract::Error) -> LedgerError {
    match error {
        alloy_contract::Error::TransportError(rpc_error) => match rpc_error {
            RpcError::ErrorResp(payload) => LedgerError::from_revert_message(&payload.message),
            other => LedgerError::Rpc(other.to_string()),
        },
        other => LedgerError::Reverted(other.to_string()),
    }
}

/// Waits for one confirmation of an already-submitted transaction.
///
/// By the time this runs the node has accepted the submission, so a failed
/// receipt poll must never lead to a fresh `send()`: the outcome is reported
/// as [`LedgerError::ReceiptUnknown`] and left for the caller to reconcile on
/// the next state read.
async fn confirm(
    pending: PendingTransactionBuilder<Ethereum>,
    context: &'static str,
) -> Result<TransactionHash, LedgerError> {
    let receipt = pending
        .get_receipt()
        .await
        .map_err(|e| LedgerError::ReceiptUnknown(format!("{context}: {e}")))?;
    if !receipt.status() {
        return Err(LedgerError::Reverted(format!("{context} reverted")));
    }
    Ok(TransactionHash::from(receipt.transaction_hash))
}

/// Typed facade over the three registries and the settlement token.
///
/// All writes are signed with the agent's key and confirmed once before
/// returning.
#[derive(Debug, Clone)]
pub struct LedgerClient {
    address: EvmAddress,
    registration_fee: U256,
    identity: IIdentityRegistry::IIdentityRegistryInstance<DynProvider>,
    reputation: IReputationRegistry::IReputationRegistryInstance<DynProvider>,
    validation: IValidationRegistry::IValidationRegistryInstance<DynProvider>,
    token: IEip3009Token::IEip3009TokenInstance<DynProvider>,
}

impl LedgerClient {
    /// Connects to `rpc_url` with the agent's signing key.
    pub fn connect(
        rpc_url: Url,
        signer: PrivateKeySigner,
        registries: RegistryAddresses,
        registration_fee: TokenAmount,
    ) -> Self {
        let address = EvmAddress(signer.address());
        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(rpc_url)
            .erased();
        Self {
            address,
            registration_fee: registration_fee.into(),
            identity: IIdentityRegistry::new(registries.identity.into(), provider.clone()),
            reputation: IReputationRegistry::new(registries.reputation.into(), provider.clone()),
            validation: IValidationRegistry::new(registries.validation.into(), provider.clone()),
            token: IEip3009Token::new(registries.token.into(), provider),
        }
    }

    /// The agent address this client signs with.
    pub fn address(&self) -> EvmAddress {
        self.address
    }

    async fn with_backoff<T, F, Fut>(&self, op: F) -> Result<T, LedgerError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let mut delays = RETRY_DELAYS.iter();
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => match delays.next() {
                    Some(delay) => {
                        tracing::warn!(error = %e, ?delay, "retrying ledger call");
                        tokio::time::sleep(*delay).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Registers this agent under `domain`, paying the registration fee.
    ///
    /// Fails with [`LedgerError::AlreadyRegistered`] when the address is
    /// already bound; callers recover by resolving the existing record
    /// instead of treating that as fatal.
    #[instrument(skip(self))]
    pub async fn register_agent(&self, domain: &str) -> Result<AgentId, LedgerError> {
        let pending = self
            .with_backoff(|| async {
                self.identity
                    .newAgent(domain.to_string(), self.address.into())
                    .value(self.registration_fee)
                    .send()
                    .await
                    .map_err(classify)
            })
            .await?;
        confirm(pending, "newAgent").await?;

        // The registry assigned the id during the write; read it back.
        let record = self
            .resolve_by_address(self.address)
            .await?
            .ok_or(LedgerError::NotRegistered)?;
        tracing::info!(agent_id = %record.agent_id, domain, "agent registered");
        Ok(record.agent_id)
    }

    /// Re-points this agent's record at a new domain.
    #[instrument(skip(self))]
    pub async fn update_agent(&self, new_domain: &str) -> Result<TransactionHash, LedgerError> {
        let pending = self
            .with_backoff(|| async {
                self.identity
                    .updateAgent(new_domain.to_string())
                    .send()
                    .await
                    .map_err(classify)
            })
            .await?;
        confirm(pending, "updateAgent").await
    }

    pub async fn resolve_by_address(
        &self,
        address: EvmAddress,
    ) -> Result<Option<AgentRecord>, LedgerError> {
        let result = self
            .with_backoff(|| async {
                self.identity
                    .resolveByAddress(address.into())
                    .call()
                    .await
                    .map_err(classify)
            })
            .await?;
        let agent_id = AgentId(result.agentId);
        if !agent_id.is_registered() {
            return Ok(None);
        }
        Ok(Some(AgentRecord {
            agent_id,
            domain: result.domain,
            address,
        }))
    }

    pub async fn resolve_by_domain(
        &self,
        domain: &str,
    ) -> Result<Option<AgentRecord>, LedgerError> {
        let result = self
            .with_backoff(|| async {
                self.identity
                    .resolveByDomain(domain.to_string())
                    .call()
                    .await
                    .map_err(classify)
            })
            .await?;
        let agent_id = AgentId(result.agentId);
        if !agent_id.is_registered() {
            return Ok(None);
        }
        Ok(Some(AgentRecord {
            agent_id,
            domain: domain.to_string(),
            address: EvmAddress(result.agentAddress),
        }))
    }

    /// Records a rating for `counterpart`. A later rating from the same rater
    /// overwrites the earlier one.
    #[instrument(skip(self))]
    pub async fn submit_rating(
        &self,
        counterpart: AgentId,
        rating: u8,
        direction: RatingDirection,
    ) -> Result<TransactionHash, LedgerError> {
        if rating > 100 {
            return Err(LedgerError::InvalidRating(rating));
        }
        let pending = self
            .with_backoff(|| async {
                match direction {
                    RatingDirection::ClientRatesServer => {
                        self.reputation.rateServer(counterpart.into(), rating).send().await
                    }
                    RatingDirection::ServerRatesClient => {
                        self.reputation.rateClient(counterpart.into(), rating).send().await
                    }
                }
                .map_err(classify)
            })
            .await?;
        confirm(pending, "rating").await
    }

    /// Reads the rating `rater` gave `ratee`, if any.
    pub async fn get_rating(
        &self,
        rater: AgentId,
        ratee: AgentId,
    ) -> Result<Option<u8>, LedgerError> {
        let result = self
            .with_backoff(|| async {
                self.reputation
                    .getRating(rater.into(), ratee.into())
                    .call()
                    .await
                    .map_err(classify)
            })
            .await?;
        Ok(result.exists.then_some(result.rating))
    }

    /// Asks `validator` to score the artifact hashing to `data_hash`.
    #[instrument(skip(self))]
    pub async fn request_validation(
        &self,
        validator: AgentId,
        seller: AgentId,
        data_hash: B256,
    ) -> Result<TransactionHash, LedgerError> {
        let pending = self
            .with_backoff(|| async {
                self.validation
                    .validationRequest(validator.into(), seller.into(), data_hash)
                    .send()
                    .await
                    .map_err(classify)
            })
            .await?;
        confirm(pending, "validationRequest").await
    }

    /// Records this validator's score for `data_hash`. The registry enforces
    /// that only the designated validator responds, exactly once, before the
    /// request expires.
    #[instrument(skip(self))]
    pub async fn respond_validation(
        &self,
        data_hash: B256,
        score: u8,
    ) -> Result<TransactionHash, LedgerError> {
        if score > 100 {
            return Err(LedgerError::InvalidRating(score));
        }
        let pending = self
            .with_backoff(|| async {
                self.validation
                    .validationResponse(data_hash, score)
                    .send()
                    .await
                    .map_err(classify)
            })
            .await?;
        confirm(pending, "validationResponse").await
    }

    pub async fn get_validation_request(
        &self,
        data_hash: B256,
    ) -> Result<Option<ValidationRequestRecord>, LedgerError> {
        let result = self
            .with_backoff(|| async {
                self.validation
                    .getValidationRequest(data_hash)
                    .call()
                    .await
                    .map_err(classify)
            })
            .await?;
        if !result.exists {
            return Ok(None);
        }
        Ok(Some(ValidationRequestRecord {
            validator_id: AgentId(result.validatorId),
            seller_id: AgentId(result.sellerId),
            requested_at_block: result.requestedAtBlock.to::<u64>(),
        }))
    }

    pub async fn get_validation_response(
        &self,
        data_hash: B256,
    ) -> Result<Option<u8>, LedgerError> {
        let result = self
            .with_backoff(|| async {
                self.validation
                    .getValidationResponse(data_hash)
                    .call()
                    .await
                    .map_err(classify)
            })
            .await?;
        Ok(result.exists.then_some(result.score))
    }

    /// Settlement-token balance of `address` at the latest head.
    pub async fn token_balance(&self, address: EvmAddress) -> Result<TokenAmount, LedgerError> {
        let balance = self
            .with_backoff(|| async {
                self.token
                    .balanceOf(address.into())
                    .call()
                    .await
                    .map_err(classify)
            })
            .await?;
        Ok(TokenAmount(balance))
    }
}
