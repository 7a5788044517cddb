use crate::domain::token::Token;
use crate::infrastructure::error::{InfraError, RefreshError};
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

#[derive(Debug, Clone)]
pub struct CredentialsRequest {
    pub endpoint: Url,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub endpoint: Url,
    pub token: Token,
}

/// The unauthenticated auth endpoints: login, register and token refresh.
#[async_trait]
pub trait AuthHttpClient: Send + Sync {
    async fn login(&self, request: CredentialsRequest) -> Result<Token, InfraError>;

    async fn register(&self, request: CredentialsRequest) -> Result<(), InfraError>;

    async fn refresh_token(&self, request: RefreshRequest) -> Result<Token, RefreshError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestAuthClient {
    client: Client,
}

#[derive(Debug, serde::Serialize)]
struct CredentialsPayload<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, serde::Deserialize)]
struct LoginResponsePayload {
    token: String,
}

// The refresh endpoint answers with a capitalized field name, unlike login.
#[derive(Debug, serde::Deserialize)]
struct RefreshResponsePayload {
    #[serde(rename = "Token")]
    token: Option<String>,
}

impl ReqwestAuthClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    async fn post_credentials(
        &self,
        request: &CredentialsRequest,
        action: &str,
    ) -> Result<String, InfraError> {
        let response = self
            .client
            .post(request.endpoint.clone())
            .json(&CredentialsPayload {
                username: &request.username,
                password: &request.password,
            })
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("network error during {action}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Network(format!("failed reading {action} response: {error}")))?;

        if !status.is_success() {
            let message = if body.trim().is_empty() {
                format!("{action} failed: http {}", status.as_u16())
            } else {
                body
            };
            return Err(InfraError::http(status, message));
        }
        Ok(body)
    }
}

#[async_trait]
impl AuthHttpClient for ReqwestAuthClient {
    async fn login(&self, request: CredentialsRequest) -> Result<Token, InfraError> {
        let body = self.post_credentials(&request, "login").await?;
        let parsed: LoginResponsePayload = serde_json::from_str(&body)?;
        Token::parse(&parsed.token)
            .ok_or_else(|| InfraError::Validation("login response contained an empty token".to_string()))
    }

    async fn register(&self, request: CredentialsRequest) -> Result<(), InfraError> {
        self.post_credentials(&request, "registration").await?;
        Ok(())
    }

    async fn refresh_token(&self, request: RefreshRequest) -> Result<Token, RefreshError> {
        // The body is the bare token serialized as a JSON string, not an object.
        let response = self
            .client
            .post(request.endpoint)
            .json(request.token.as_str())
            .send()
            .await
            .map_err(|error| RefreshError::Network(error.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| RefreshError::Network(format!("failed reading refresh response: {error}")))?;

        if !status.is_success() {
            return Err(RefreshError::Http {
                status: status.as_u16(),
                body,
            });
        }

        parse_refresh_body(&body)
    }
}

fn parse_refresh_body(body: &str) -> Result<Token, RefreshError> {
    let parsed: RefreshResponsePayload = serde_json::from_str(body)
        .map_err(|error| RefreshError::MissingToken(format!("{error}; body={body}")))?;
    parsed
        .token
        .as_deref()
        .and_then(Token::parse)
        .ok_or_else(|| RefreshError::MissingToken(body.to_string()))
}
