//! Authorization tokens for task API calls.

use async_trait::async_trait;
use jobworker_core::{SystemParams, API_HOST, API_LOGIN_EMAIL, API_LOGIN_PASSWORD, API_LOGIN_URL};
use serde_json::json;

use crate::error::{ExecutionError, Result};
use crate::extract;

/// Obtains the token sent as `Authorization` on every API task of a job.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Issue a token for one job run.
    async fn issue(&self, system: &SystemParams) -> Result<String>;
}

/// Always returns the same token.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenIssuer(pub String);

#[async_trait]
impl TokenIssuer for StaticTokenIssuer {
    async fn issue(&self, _system: &SystemParams) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Logs in against `api_host + api_login_url` and reads `data.token`.
///
/// Without a configured login URL the issuer yields an empty token.
#[derive(Clone, Default)]
pub struct LoginTokenIssuer {
    client: reqwest::Client,
}

impl LoginTokenIssuer {
    /// Create with a default client.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenIssuer for LoginTokenIssuer {
    async fn issue(&self, system: &SystemParams) -> Result<String> {
        let login = system.value(API_LOGIN_URL);
        if login.is_empty() {
            return Ok(String::new());
        }

        let url = format!("{}{}", system.value(API_HOST), login);
        let body = json!({
            "email": system.value(API_LOGIN_EMAIL),
            "password": system.value(API_LOGIN_PASSWORD),
        });

        let response: serde_json::Value = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        extract::navigate(&response, "data.token")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| ExecutionError::Token(format!("no data.token in response from {}", url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn params(host: &str) -> SystemParams {
        SystemParams::new()
            .with(API_HOST, host)
            .with(API_LOGIN_URL, "/auth/login")
            .with(API_LOGIN_EMAIL, "worker@example.com")
            .with(API_LOGIN_PASSWORD, "pw")
    }

    #[tokio::test]
    async fn test_login_reads_data_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_json(json!({"email": "worker@example.com", "password": "pw"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"token": "Bearer abc"}})))
            .mount(&server)
            .await;

        let token = LoginTokenIssuer::new().issue(&params(&server.uri())).await.unwrap();
        assert_eq!(token, "Bearer abc");
    }

    #[tokio::test]
    async fn test_login_without_token_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .mount(&server)
            .await;

        let err = LoginTokenIssuer::new().issue(&params(&server.uri())).await;
        assert!(matches!(err, Err(ExecutionError::Token(_))));
    }

    #[tokio::test]
    async fn test_no_login_url_gives_empty_token() {
        let token = LoginTokenIssuer::new().issue(&SystemParams::new()).await.unwrap();
        assert_eq!(token, "");
        let fixed = StaticTokenIssuer("t".into()).issue(&SystemParams::new()).await.unwrap();
        assert_eq!(fixed, "t");
    }
}
