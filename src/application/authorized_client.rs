use crate::application::session::{RefreshOutcome, SessionManager};
use crate::infrastructure::api_client::{ApiRequest, ApiResponse, ApiTransport};
use crate::infrastructure::auth_client::AuthHttpClient;
use crate::infrastructure::credential_store::TokenStore;
use crate::infrastructure::error::InfraError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Resource calls with the session token attached. A 401 triggers one
/// refresh and one retry; a second 401 is returned to the caller.
pub struct AuthorizedClient<S, C, T>
where
    S: TokenStore + ?Sized,
    C: AuthHttpClient + ?Sized,
    T: ApiTransport + ?Sized,
{
    session: Arc<SessionManager<S, C>>,
    transport: Arc<T>,
}

impl<S, C, T> AuthorizedClient<S, C, T>
where
    S: TokenStore + ?Sized,
    C: AuthHttpClient + ?Sized,
    T: ApiTransport + ?Sized,
{
    pub fn new(session: Arc<SessionManager<S, C>>, transport: Arc<T>) -> Self {
        Self { session, transport }
    }

    pub fn session(&self) -> &Arc<SessionManager<S, C>> {
        &self.session
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, InfraError> {
        let token = self.session.valid_token()?;
        match self.transport.send(request.clone(), Some(&token)).await {
            Err(error) if error.is_unauthorized() => {
                tracing::info!(path = %request.path(), "request unauthorized; refreshing session");
                match self.session.refresh().await? {
                    RefreshOutcome::Refreshed(token) => self.transport.send(request, Some(&token)).await,
                    RefreshOutcome::NoToken => Err(InfraError::Unauthenticated),
                }
            }
            other => other,
        }
    }

    pub async fn json<R: DeserializeOwned>(&self, request: ApiRequest) -> Result<R, InfraError> {
        self.send(request).await?.into_json()
    }

    pub async fn bytes(&self, request: ApiRequest) -> Result<Bytes, InfraError> {
        self.send(request).await?.into_bytes()
    }

    /// For endpoints whose response body is ignored.
    pub async fn execute(&self, request: ApiRequest) -> Result<(), InfraError> {
        self.send(request).await.map(|_| ())
    }
}
