use crate::domain::token::DecodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error("invalid session token: {0}")]
    Decode(#[from] DecodeError),
    #[error("not authenticated; log in first")]
    Unauthenticated,
    #[error("session refresh failed: {0}")]
    Refresh(#[from] RefreshError),
    #[error("{body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("{0}")]
    Validation(String),
}

impl InfraError {
    pub fn http(status: reqwest::StatusCode, body: impl Into<String>) -> Self {
        Self::Http {
            status: status.as_u16(),
            body: body.into(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Http { status: 401, .. })
    }

    /// True when the session is gone and the user has to log in again.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated | Self::Decode(_) | Self::Refresh(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("refresh endpoint returned http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error while refreshing: {0}")]
    Network(String),
    #[error("refresh response did not include a token: {0}")]
    MissingToken(String),
}
