//! A2A protocol: AgentCard publication, discovery, and skill invocation.
//!
//! Every agent serves its card at `/.well-known/agent-card` with a 60-second
//! cacheability window. Discovery resolves a DNS-style domain to that URL,
//! fetches the card, and validates it structurally before handing it to the
//! caller. Invocation POSTs JSON to the skill's endpoint path; the payment
//! layer is the x402 client's concern, not this module's.

use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use dashmap::DashMap;
use http::HeaderValue;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use url::Url;

use agentmesh::types::TokenAmount;
use agentmesh_ledger::AgentId;

/// Well-known path an AgentCard is served at.
pub const WELL_KNOWN_CARD_PATH: &str = "/.well-known/agent-card";

/// Advisory cacheability window for served cards, in seconds.
pub const CARD_MAX_AGE_SECONDS: u64 = 60;

/// A named, priced operation exposed by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub skill_id: String,
    pub name: String,
    pub description: String,
    pub price_amount: TokenAmount,
    pub price_currency: String,
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
    pub endpoint_path: String,
}

/// The discovery document an agent publishes about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub agent_id: AgentId,
    pub domain: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub skills: Vec<Skill>,
    pub trust_models: Vec<String>,
    pub payment_methods: Vec<String>,
}

impl AgentCard {
    /// Looks up a skill by id.
    pub fn find_skill(&self, skill_id: &str) -> Option<&Skill> {
        self.skills.iter().find(|s| s.skill_id == skill_id)
    }

    /// Structural validation applied to every discovered card.
    pub fn validate(&self) -> Result<(), A2aError> {
        let fail = |detail: &str| {
            Err(A2aError::InvalidAgentCard {
                domain: self.domain.clone(),
                detail: detail.to_string(),
            })
        };
        if self.domain.is_empty() || !self.domain.contains('.') {
            return fail("domain is not a DNS-style name");
        }
        if self.name.is_empty() {
            return fail("name is empty");
        }
        if self.version.is_empty() {
            return fail("version is empty");
        }
        for skill in &self.skills {
            if skill.skill_id.is_empty() {
                return fail("skill with empty id");
            }
            if !skill.endpoint_path.starts_with('/') {
                return fail("skill endpoint path must be absolute");
            }
        }
        let mut ids: Vec<&str> = self.skills.iter().map(|s| s.skill_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.skills.len() {
            return fail("duplicate skill ids");
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum A2aError {
    #[error("agent card at {domain} is invalid: {detail}")]
    InvalidAgentCard { domain: String, detail: String },
    #[error("failed to reach {domain}: {source}")]
    Unreachable {
        domain: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("card endpoint at {domain} returned {status}")]
    BadStatus {
        domain: String,
        status: reqwest::StatusCode,
    },
    #[error("invalid discovery URL for {domain}")]
    BadDomain { domain: String },
}

/// Serves this agent's card with a single writer and many concurrent readers.
///
/// Readers always get a consistent snapshot: updates swap the whole card
/// atomically, so two fetches inside one cache window are byte-identical
/// absent an explicit republish.
#[derive(Debug, Clone)]
pub struct CardPublisher {
    card: Arc<RwLock<Arc<AgentCard>>>,
}

impl CardPublisher {
    pub fn new(card: AgentCard) -> Self {
        Self {
            card: Arc::new(RwLock::new(Arc::new(card))),
        }
    }

    /// Current card snapshot.
    pub fn snapshot(&self) -> Arc<AgentCard> {
        self.card.read().expect("card lock poisoned").clone()
    }

    /// Replaces the published card. Called on any skill-set change.
    pub fn publish(&self, card: AgentCard) {
        *self.card.write().expect("card lock poisoned") = Arc::new(card);
    }

    /// Router fragment serving `GET /.well-known/agent-card`.
    pub fn router(&self) -> Router {
        let publisher = self.clone();
        Router::new().route(
            WELL_KNOWN_CARD_PATH,
            get(move || {
                let publisher = publisher.clone();
                async move {
                    let card = publisher.snapshot();
                    (
                        [(
                            header::CACHE_CONTROL,
                            format!("max-age={CARD_MAX_AGE_SECONDS}"),
                        )],
                        Json(card.as_ref().clone()),
                    )
                        .into_response()
                }
            }),
        )
    }
}

/// Client side of discovery and invocation.
#[derive(Debug, Clone, Default)]
pub struct A2aClient {
    http: reqwest::Client,
    cache: Arc<DashMap<String, (Arc<AgentCard>, Instant)>>,
}

impl A2aClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discovery URL for a domain; host comparison is case-insensitive so the
    /// domain is lowercased before building the URL.
    fn card_url(domain: &str) -> Result<Url, A2aError> {
        let domain = domain.to_ascii_lowercase();
        Url::parse(&format!("https://{domain}{WELL_KNOWN_CARD_PATH}")).map_err(|_| {
            A2aError::BadDomain {
                domain: domain.clone(),
            }
        })
    }

    /// Finds the agent behind `domain` and returns its validated card.
    ///
    /// Cards are cached per domain for the advisory window; any validation
    /// failure purges the cache entry.
    pub async fn discover(&self, domain: &str) -> Result<Arc<AgentCard>, A2aError> {
        let key = domain.to_ascii_lowercase();
        if let Some(entry) = self.cache.get(&key) {
            let (card, fetched_at) = entry.value();
            if fetched_at.elapsed() < Duration::from_secs(CARD_MAX_AGE_SECONDS) {
                return Ok(card.clone());
            }
        }
        let url = Self::card_url(&key)?;
        self.discover_at(url, &key).await
    }

    /// Discovery against an explicit base URL, for deployments that front the
    /// card somewhere other than `https://<domain>/`.
    pub async fn discover_at(
        &self,
        url: Url,
        domain: &str,
    ) -> Result<Arc<AgentCard>, A2aError> {
        let key = domain.to_ascii_lowercase();
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| A2aError::Unreachable {
                domain: key.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            self.cache.remove(&key);
            return Err(A2aError::BadStatus {
                domain: key,
                status,
            });
        }
        let card: AgentCard =
            response
                .json()
                .await
                .map_err(|_| A2aError::InvalidAgentCard {
                    domain: key.clone(),
                    detail: "body is not an AgentCard".to_string(),
                })?;
        if let Err(e) = card.validate() {
            self.cache.remove(&key);
            return Err(e);
        }
        let card = Arc::new(card);
        self.cache.insert(key, (card.clone(), Instant::now()));
        Ok(card)
    }

    /// Invokes a skill: POST to `base_url + endpoint_path` with JSON params
    /// and, when provided, the `X-Payment` header. The response is returned
    /// as-is; payment semantics belong to the x402 layer.
    pub async fn invoke(
        &self,
        base_url: &Url,
        skill: &Skill,
        params: &serde_json::Value,
        payment_header: Option<HeaderValue>,
    ) -> Result<reqwest::Response, A2aError> {
        let url = base_url
            .join(skill.endpoint_path.trim_start_matches('/'))
            .map_err(|_| A2aError::BadDomain {
                domain: base_url.to_string(),
            })?;
        let mut request = self.http.post(url).json(params);
        if let Some(header) = payment_header {
            request = request.header("X-Payment", header);
        }
        request.send().await.map_err(|source| A2aError::Unreachable {
            domain: base_url.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_card() -> AgentCard {
        AgentCard {
            agent_id: AgentId::from(7),
            domain: "karma-hello.example.test".to_string(),
            name: "Karma Hello".to_string(),
            description: "Sells chat logs".to_string(),
            version: "1.2.0".to_string(),
            skills: vec![Skill {
                skill_id: "get_logs".to_string(),
                name: "Get chat logs".to_string(),
                description: "Returns recent chat logs".to_string(),
                price_amount: TokenAmount::from(10_000u64),
                price_currency: "GLUE".to_string(),
                input_schema: serde_json::json!({ "type": "object" }),
                output_schema: serde_json::json!({ "type": "object" }),
                endpoint_path: "/skills/get_logs".to_string(),
            }],
            trust_models: vec!["erc-8004".to_string()],
            payment_methods: vec!["evm-eip3009-GLUE".to_string()],
        }
    }

    #[test]
    fn find_skill_by_id() {
        let card = sample_card();
        assert!(card.find_skill("get_logs").is_some());
        assert!(card.find_skill("get_dreams").is_none());
    }

    #[test]
    fn valid_card_passes_validation() {
        assert!(sample_card().validate().is_ok());
    }

    #[test]
    fn bare_hostname_fails_validation() {
        let mut card = sample_card();
        card.domain = "localhost".to_string();
        assert!(card.validate().is_err());
    }

    #[test]
    fn relative_endpoint_path_fails_validation() {
        let mut card = sample_card();
        card.skills[0].endpoint_path = "skills/get_logs".to_string();
        assert!(card.validate().is_err());
    }

    #[test]
    fn duplicate_skill_ids_fail_validation() {
        let mut card = sample_card();
        let duplicate = card.skills[0].clone();
        card.skills.push(duplicate);
        assert!(card.validate().is_err());
    }

    #[test]
    fn publisher_snapshots_are_stable_until_republish() {
        let publisher = CardPublisher::new(sample_card());
        let first = serde_json::to_vec(publisher.snapshot().as_ref()).unwrap();
        let second = serde_json::to_vec(publisher.snapshot().as_ref()).unwrap();
        assert_eq!(first, second);

        let mut updated = sample_card();
        updated.version = "1.3.0".to_string();
        publisher.publish(updated);
        assert_eq!(publisher.snapshot().version, "1.3.0");
    }

    #[test]
    fn card_serde_roundtrip() {
        let card = sample_card();
        let json = serde_json::to_string(&card).unwrap();
        let back: AgentCard = serde_json::from_str(&json).unwrap();
        assert_eq!(back, card);
    }
}
