//! A [`Facilitator`] implementation that talks to a remote facilitator over HTTP.
//!
//! Sellers embed this client in their [`PaymentGate`](crate::layer::PaymentGate)
//! so verification and settlement run on a shared facilitator instance. The
//! client is cheap to clone; it shares a `reqwest` connection pool.

use http::StatusCode;
use reqwest::Client;
use std::time::Duration;
use url::Url;

use agentmesh::facilitator::Facilitator;
use agentmesh::types::{
    HealthResponse, SettleRequest, SettleResponse, SupportedResponse, VerifyRequest,
    VerifyResponse,
};

/// Client for the facilitator's `/verify`, `/settle`, `/supported`, and
/// `/health` endpoints.
#[derive(Clone, Debug)]
pub struct FacilitatorClient {
    base_url: Url,
    verify_url: Url,
    settle_url: Url,
    supported_url: Url,
    health_url: Url,
    client: Client,
    timeout: Option<Duration>,
}

/// Errors raised while talking to a remote facilitator.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        context: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    /// The facilitator itself reported its RPC as unreachable (HTTP 503).
    #[error("facilitator unavailable: {context}")]
    Unavailable { context: &'static str },
    #[error("unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        context: &'static str,
        status: StatusCode,
        body: String,
    },
}

impl FacilitatorClient {
    /// Constructs a client from the facilitator's base URL.
    pub fn try_new(base_url: Url) -> Result<Self, FacilitatorClientError> {
        let join = |path: &'static str| {
            base_url
                .join(path)
                .map_err(|source| FacilitatorClientError::UrlParse {
                    context: path,
                    source,
                })
        };
        Ok(Self {
            verify_url: join("verify")?,
            settle_url: join("settle")?,
            supported_url: join("supported")?,
            health_url: join("health")?,
            base_url,
            client: Client::new(),
            timeout: None,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Applies a per-request timeout to all facilitator calls.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn post_json<B: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        url: &Url,
        body: &B,
        context: &'static str,
    ) -> Result<R, FacilitatorClientError> {
        let mut request = self.client.post(url.clone()).json(body);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|source| FacilitatorClientError::Http { context, source })?;
        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(FacilitatorClientError::Unavailable { context });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FacilitatorClientError::HttpStatus {
                context,
                status,
                body,
            });
        }
        response
            .json::<R>()
            .await
            .map_err(|source| FacilitatorClientError::JsonDeserialization { context, source })
    }

    async fn get_json<R: serde::de::DeserializeOwned>(
        &self,
        url: &Url,
        context: &'static str,
    ) -> Result<R, FacilitatorClientError> {
        let mut request = self.client.get(url.clone());
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|source| FacilitatorClientError::Http { context, source })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FacilitatorClientError::HttpStatus {
                context,
                status,
                body,
            });
        }
        response
            .json::<R>()
            .await
            .map_err(|source| FacilitatorClientError::JsonDeserialization { context, source })
    }
}

impl TryFrom<&str> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let base_url = Url::parse(value).map_err(|source| FacilitatorClientError::UrlParse {
            context: "base_url",
            source,
        })?;
        FacilitatorClient::try_new(base_url)
    }
}

impl TryFrom<String> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        FacilitatorClient::try_from(value.as_str())
    }
}

impl Facilitator for FacilitatorClient {
    type Error = FacilitatorClientError;

    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        self.post_json(&self.verify_url, request, "verify").await
    }

    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        self.post_json(&self.settle_url, request, "settle").await
    }

    async fn supported(&self) -> Result<SupportedResponse, Self::Error> {
        self.get_json(&self.supported_url, "supported").await
    }

    async fn health(&self) -> Result<HealthResponse, Self::Error> {
        self.get_json(&self.health_url, "health").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_urls_are_joined_from_base() {
        let client = FacilitatorClient::try_from("https://facilitator.example/").unwrap();
        assert_eq!(client.verify_url.as_str(), "https://facilitator.example/verify");
        assert_eq!(client.settle_url.as_str(), "https://facilitator.example/settle");
        assert_eq!(
            client.supported_url.as_str(),
            "https://facilitator.example/supported"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(FacilitatorClient::try_from("not a url").is_err());
    }
}
