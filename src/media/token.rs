//! HTTP client for the token issuance endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::relay::TokenIssuer;
use crate::error::{MeetingError, MeetingResult};

/// Default HTTP request timeout.
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    identity: &'a str,
    session_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(alias = "credential")]
    token: String,
}

/// Fetches relay credentials from `POST <endpoint>`.
pub struct HttpTokenIssuer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTokenIssuer {
    pub fn new(endpoint: &str, timeout: Duration) -> MeetingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MeetingError::TokenFetch(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    async fn issue(&self, identity: &str, session_id: &str) -> MeetingResult<String> {
        debug!("Requesting relay token for {} in {}", identity, session_id);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&TokenRequest {
                identity,
                session_id,
            })
            .send()
            .await
            .map_err(|e| MeetingError::TokenFetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MeetingError::TokenFetch(format!(
                "token endpoint returned {status}"
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| MeetingError::TokenFetch(format!("invalid token response: {e}")))?;

        if body.token.is_empty() {
            return Err(MeetingError::TokenFetch("empty token".to_string()));
        }

        info!("Relay token issued for session {}", session_id);
        Ok(body.token)
    }
}
