//! The agent base: bootstrap state machine and runtime surface.
//!
//! Bootstrap walks `INIT -> KEY_LOADED -> ADDRESS_KNOWN -> IDENTITY_CONFIRMED
//! -> READY`; any failure before `READY` is fatal and surfaces from
//! [`AgentRuntime::bootstrap`]. After that, failures are per-request.
//!
//! The runtime owns nothing global: the vault, ledger client, facilitator
//! client, and A2A client are constructed dependencies, composed here rather
//! than inherited from.

use axum::Router;
use axum::routing::MethodRouter;
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use agentmesh::types::{EvmAddress, SettleResponse, TokenAmount};
use agentmesh_axum::facilitator_client::FacilitatorClient;
use agentmesh_axum::layer::PaymentGate;
use agentmesh_axum::price::PriceTag;
use agentmesh_ledger::client::RatingDirection;
use agentmesh_ledger::{AgentId, AgentRecord, LedgerClient, LedgerError, RegistryAddresses};
use agentmesh_reqwest::{WithPayments, X402Payments, settlement_from_response};
use alloy_signer_local::PrivateKeySigner;

use crate::a2a::{A2aClient, A2aError, AgentCard, CardPublisher, Skill};
use crate::keyvault::{KeyVault, KeyVaultError, SecretStore};

use agentmesh::networks::TokenDeployment;

/// Bootstrap phases, in order. Logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootPhase {
    Init,
    KeyLoaded,
    AddressKnown,
    IdentityConfirmed,
    Ready,
}

/// Static identity and wiring for one agent process.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Vault record name for this agent's key.
    pub agent_name: String,
    /// Discovery handle, DNS-style.
    pub domain: String,
    pub display_name: String,
    pub description: String,
    pub version: String,
    /// RPC endpoint of the settled chain.
    pub rpc_url: Url,
    pub registries: RegistryAddresses,
    /// Token used for skill pricing and purchases.
    pub token: TokenDeployment,
    pub facilitator_url: Url,
    /// Address the skill server binds to.
    pub listen: SocketAddr,
    /// Fee attached to identity registration, in native units.
    pub registration_fee: TokenAmount,
    /// Trust models this agent will transact under.
    pub trust_models: Vec<String>,
    /// Deadline covering a whole purchase (sign + verify + work + settle).
    pub purchase_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("bootstrap failed during {phase:?}: {source}")]
    Bootstrap {
        phase: BootPhase,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    A2a(#[from] A2aError),
    #[error("skill {0} is not on the card")]
    SkillNotFound(String),
    #[error("agent {domain} advertises no supported trust model (has {advertised:?})")]
    UntrustedAgent {
        domain: String,
        advertised: Vec<String>,
    },
    #[error("seller refused payment: {0}")]
    PaymentRefused(String),
    #[error("skill call failed with HTTP {0}")]
    SkillFailed(http::StatusCode),
    #[error("purchase transport failure: {0}")]
    Transport(String),
    #[error("failed to bind skill server: {0}")]
    Serve(#[from] std::io::Error),
}

fn fatal<E: std::error::Error + Send + Sync + 'static>(
    phase: BootPhase,
) -> impl FnOnce(E) -> AgentError {
    move |source| AgentError::Bootstrap {
        phase,
        source: Box::new(source),
    }
}

/// The outcome of a completed purchase.
#[derive(Debug)]
pub struct Purchase {
    pub body: Vec<u8>,
    pub settlement: Option<SettleResponse>,
}

/// A runnable agent: confirmed identity, published card, gated skills,
/// and buyer-side operations.
pub struct AgentRuntime {
    config: AgentConfig,
    signer: PrivateKeySigner,
    record: AgentRecord,
    ledger: LedgerClient,
    publisher: CardPublisher,
    a2a: A2aClient,
    facilitator: FacilitatorClient,
    skills: Vec<(Skill, MethodRouter)>,
}

impl AgentRuntime {
    /// Runs the bootstrap state machine to `READY`.
    ///
    /// Registration treats an already-registered address as success: the
    /// existing record is resolved and reused instead of aborting.
    pub async fn bootstrap<S: SecretStore>(
        config: AgentConfig,
        vault: &KeyVault<S>,
        skills: Vec<(Skill, MethodRouter)>,
    ) -> Result<Self, AgentError> {
        let mut phase = BootPhase::Init;

        let key = vault
            .private_key(&config.agent_name)
            .await
            .map_err(fatal::<KeyVaultError>(phase))?;
        let signer =
            PrivateKeySigner::from_bytes(&key).map_err(|e| AgentError::Bootstrap {
                phase,
                source: Box::new(e),
            })?;
        phase = advance(phase, BootPhase::KeyLoaded, &config.agent_name);

        let address = EvmAddress(signer.address());
        phase = advance(phase, BootPhase::AddressKnown, &config.agent_name);

        let ledger = LedgerClient::connect(
            config.rpc_url.clone(),
            signer.clone(),
            config.registries,
            config.registration_fee,
        );
        let record = confirm_identity(&ledger, address, &config.domain)
            .await
            .map_err(fatal::<LedgerError>(phase))?;
        phase = advance(phase, BootPhase::IdentityConfirmed, &config.agent_name);

        let card = build_card(&config, record.agent_id, &skills);
        let publisher = CardPublisher::new(card);
        let facilitator = FacilitatorClient::try_new(config.facilitator_url.clone())
            .map_err(|e| AgentError::Bootstrap {
                phase,
                source: Box::new(e),
            })?
            .with_timeout(config.purchase_timeout);
        let runtime = Self {
            config,
            signer,
            record,
            ledger,
            publisher,
            a2a: A2aClient::new(),
            facilitator,
            skills,
        };
        advance(phase, BootPhase::Ready, &runtime.config.agent_name);
        Ok(runtime)
    }

    pub fn agent_id(&self) -> AgentId {
        self.record.agent_id
    }

    pub fn address(&self) -> EvmAddress {
        self.record.address
    }

    pub fn record(&self) -> &AgentRecord {
        &self.record
    }

    pub fn ledger(&self) -> &LedgerClient {
        &self.ledger
    }

    pub fn card(&self) -> std::sync::Arc<AgentCard> {
        self.publisher.snapshot()
    }

    /// Adds or replaces a skill after boot and republishes the card.
    pub fn publish_skill(&mut self, skill: Skill, handler: MethodRouter) {
        self.skills.retain(|(s, _)| s.skill_id != skill.skill_id);
        self.skills.push((skill, handler));
        let card = build_card(&self.config, self.record.agent_id, &self.skills);
        self.publisher.publish(card);
    }

    /// The full HTTP surface: card route plus pay-gated skill routes.
    pub fn router(&self) -> Router {
        let mut router = self.publisher.router();
        for (skill, handler) in &self.skills {
            let price = PriceTag::new(
                self.config.token.clone(),
                self.record.address,
                skill.price_amount,
            );
            let gate = PaymentGate::new(self.facilitator.clone()).with_price(price);
            router = router.route(&skill.endpoint_path, handler.clone().layer(gate));
        }
        router
    }

    /// Serves the agent until the token is cancelled.
    pub async fn serve(&self, cancellation: CancellationToken) -> Result<(), AgentError> {
        let listener = tokio::net::TcpListener::bind(self.config.listen).await?;
        tracing::info!(listen = %self.config.listen, domain = %self.config.domain, "agent serving");
        let shutdown = async move { cancellation.cancelled().await };
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }

    /// Finds the agent behind `domain` and returns its card.
    pub async fn discover(&self, domain: &str) -> Result<std::sync::Arc<AgentCard>, AgentError> {
        Ok(self.a2a.discover(domain).await?)
    }

    /// Buys one skill invocation from a discovered agent.
    ///
    /// `max_amount` caps what this purchase may spend; a challenge above the
    /// cap fails with a payment error instead of paying. On a deadline expiry
    /// the settlement may have landed unobserved: callers reconcile by
    /// checking the authorization nonce on-chain before retrying with a fresh
    /// nonce.
    pub async fn buy(
        &self,
        base_url: &Url,
        card: &AgentCard,
        skill_id: &str,
        params: &Value,
        max_amount: TokenAmount,
    ) -> Result<Purchase, AgentError> {
        let skill = card
            .find_skill(skill_id)
            .ok_or_else(|| AgentError::SkillNotFound(skill_id.to_string()))?;

        if !self.config.trust_models.is_empty()
            && !card
                .trust_models
                .iter()
                .any(|m| self.config.trust_models.contains(m))
        {
            return Err(AgentError::UntrustedAgent {
                domain: card.domain.clone(),
                advertised: card.trust_models.clone(),
            });
        }

        let url = base_url
            .join(skill.endpoint_path.trim_start_matches('/'))
            .map_err(|_| AgentError::SkillNotFound(skill_id.to_string()))?;
        let payments =
            X402Payments::with_signer(self.signer.clone()).max(&self.config.token, max_amount);
        let http = reqwest::Client::builder()
            .timeout(self.config.purchase_timeout)
            .redirect(reqwest::redirect::Policy::limited(1))
            .build()
            .map_err(|e| AgentError::Transport(e.to_string()))?
            .with_payments(payments);

        let response = http
            .post(url)
            .json(params)
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::PAYMENT_REQUIRED {
            let error = response
                .json::<agentmesh::types::PaymentRequiredResponse>()
                .await
                .map(|r| r.error)
                .unwrap_or_else(|_| "payment required".to_string());
            return Err(AgentError::PaymentRefused(error));
        }
        if !status.is_success() {
            return Err(AgentError::SkillFailed(status));
        }
        let settlement = settlement_from_response(&response);
        let body = response
            .bytes()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?
            .to_vec();
        Ok(Purchase { body, settlement })
    }

    /// Rates a counterpart agent; re-rating overwrites the previous entry.
    pub async fn rate(
        &self,
        counterpart: AgentId,
        rating: u8,
        direction: RatingDirection,
    ) -> Result<(), AgentError> {
        self.ledger
            .submit_rating(counterpart, rating, direction)
            .await?;
        Ok(())
    }

    /// Reads the rating `rater` gave `ratee`.
    pub async fn rating_of(
        &self,
        rater: AgentId,
        ratee: AgentId,
    ) -> Result<Option<u8>, AgentError> {
        Ok(self.ledger.get_rating(rater, ratee).await?)
    }

    /// This agent's settlement-token balance.
    pub async fn token_balance(&self) -> Result<TokenAmount, AgentError> {
        Ok(self.ledger.token_balance(self.record.address).await?)
    }
}

fn advance(from: BootPhase, to: BootPhase, agent: &str) -> BootPhase {
    tracing::info!(agent, ?from, ?to, "bootstrap phase");
    to
}

/// The identity-registry slice the bootstrap needs. [`LedgerClient`] is the
/// production implementation; tests substitute an in-memory registry.
pub trait IdentityLedger {
    fn resolve_by_address(
        &self,
        address: EvmAddress,
    ) -> impl Future<Output = Result<Option<AgentRecord>, LedgerError>> + Send;

    fn register_agent(
        &self,
        domain: &str,
    ) -> impl Future<Output = Result<AgentId, LedgerError>> + Send;
}

impl IdentityLedger for LedgerClient {
    async fn resolve_by_address(
        &self,
        address: EvmAddress,
    ) -> Result<Option<AgentRecord>, LedgerError> {
        LedgerClient::resolve_by_address(self, address).await
    }

    async fn register_agent(&self, domain: &str) -> Result<AgentId, LedgerError> {
        LedgerClient::register_agent(self, domain).await
    }
}

/// Resolve-or-register. `AlreadyRegistered` from a racing registration is
/// recovered by re-resolving; a registration that still resolves to nothing
/// afterwards is a real failure.
pub async fn confirm_identity<L: IdentityLedger>(
    ledger: &L,
    address: EvmAddress,
    domain: &str,
) -> Result<AgentRecord, LedgerError> {
    if let Some(record) = ledger.resolve_by_address(address).await? {
        tracing::info!(agent_id = %record.agent_id, "identity already on-chain");
        return Ok(record);
    }
    match ledger.register_agent(domain).await {
        Ok(_) | Err(LedgerError::AlreadyRegistered) => {}
        Err(e) => return Err(e),
    }
    ledger
        .resolve_by_address(address)
        .await?
        .ok_or(LedgerError::NotRegistered)
}

fn build_card(config: &AgentConfig, agent_id: AgentId, skills: &[(Skill, MethodRouter)]) -> AgentCard {
    AgentCard {
        agent_id,
        domain: config.domain.clone(),
        name: config.display_name.clone(),
        description: config.description.clone(),
        version: config.version.clone(),
        skills: skills.iter().map(|(s, _)| s.clone()).collect(),
        trust_models: config.trust_models.clone(),
        payment_methods: vec![config.token.kind()],
    }
}
