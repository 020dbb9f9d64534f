//! Bearer-credentialed JSON GETs against the resource service.

use std::sync::Arc;
use std::time::Duration;

use gatehouse_cache::IdentityProvider;
use gatehouse_core::{FetchError, ResourceKind, SubjectId};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::GatehouseConfig;
use crate::error::ClientResult;

/// Error body shapes the service is known to return.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    identity: Arc<dyn IdentityProvider>,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl RestClient {
    pub fn new(config: &GatehouseConfig, identity: Arc<dyn IdentityProvider>) -> ClientResult<Self> {
        Self::with_base_url(&config.api_base_url, config.request_timeout(), identity)
    }

    pub fn with_base_url(
        base_url: &str,
        request_timeout: Duration,
        identity: Arc<dyn IdentityProvider>,
    ) -> ClientResult<Self> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
            identity,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` with `subject`'s bearer credential.
    ///
    /// Fails with `Credential` before sending anything if `subject` is no
    /// longer signed in. Any non-2xx status is a `Rejected`; a transport
    /// timeout is a `Timeout` so the fetcher can retry it.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        kind: ResourceKind,
        subject: &SubjectId,
        path: &str,
    ) -> Result<T, FetchError> {
        let credential = self.identity.credential(subject).await?;
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(url)
            .bearer_auth(credential)
            .send()
            .await
            .map_err(|e| self.transport_error(kind, e))?;

        self.parse_response(kind, response).await
    }

    async fn parse_response<T: DeserializeOwned>(
        &self,
        kind: ResourceKind,
        response: reqwest::Response,
    ) -> Result<T, FetchError> {
        let status = response.status();
        if status.is_success() {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| self.transport_error(kind, e))?;
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode {
                kind,
                reason: e.to_string(),
            })
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(FetchError::Rejected {
                kind,
                status: status.as_u16(),
                message: error_message(&text, status),
            })
        }
    }

    fn transport_error(&self, kind: ResourceKind, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                kind,
                after: self.request_timeout,
            }
        } else {
            FetchError::Transport {
                kind,
                reason: err.to_string(),
            }
        }
    }
}

fn error_message(body: &str, status: reqwest::StatusCode) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.detail.or(parsed.message).or(parsed.error) {
            return message;
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed.to_string()
    }
}
