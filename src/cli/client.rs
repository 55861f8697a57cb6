//! HTTP client for the local control API of a running session.

use anyhow::{bail, Context, Result};
use serde_json::Value;

pub struct ServiceClient {
    client: reqwest::Client,
    base_url: String,
}

impl ServiceClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn for_port(port: u16) -> Self {
        Self::new(&format!("http://127.0.0.1:{port}"))
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .context("Failed to connect to classmeet service. Is a meeting running?")?;
        read_json(response).await
    }

    pub async fn post(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        let mut request = self.client.post(format!("{}{}", self.base_url, path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .context("Failed to connect to classmeet service. Is a meeting running?")?;
        read_json(response).await
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let json: Value = response
        .json()
        .await
        .context("Invalid response from classmeet service")?;

    if !status.is_success() {
        bail!(
            "{}",
            json.get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error")
        );
    }
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_post_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .and(body_json(json!({ "text": "hi" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sent": true })))
            .mount(&server)
            .await;

        let client = ServiceClient::new(&server.uri());
        let body = client
            .post("/chat", Some(&json!({ "text": "hi" })))
            .await
            .unwrap();
        assert_eq!(body["sent"], true);
    }

    #[tokio::test]
    async fn test_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/screen/toggle"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "error": true,
                "message": "Screen share failed: permission denied"
            })))
            .mount(&server)
            .await;

        let client = ServiceClient::new(&server.uri());
        let err = client.post("/screen/toggle", None).await.unwrap_err();
        assert_eq!(err.to_string(), "Screen share failed: permission denied");
    }
}
