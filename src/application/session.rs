use crate::domain::token::{self, Claims, DecodeError, Token};
use crate::infrastructure::auth_client::{AuthHttpClient, CredentialsRequest, RefreshRequest};
use crate::infrastructure::credential_store::TokenStore;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use url::Url;

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEndpoints {
    pub login: Url,
    pub register: Url,
    pub refresh: Url,
}

impl SessionEndpoints {
    pub fn from_base_url(base_url: &Url) -> Result<Self, InfraError> {
        let join = |path: &str| {
            base_url.join(path).map_err(|error| {
                InfraError::InvalidConfig(format!("invalid auth endpoint '{path}': {error}"))
            })
        };
        Ok(Self {
            login: join("auth/login")?,
            register: join("auth/register")?,
            refresh: join("auth/refresh")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    NoToken,
    Refreshed(Token),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryCheck {
    NoSession,
    Fresh,
    Refreshed,
}

/// What screens hear about the session. `LoginRequired` means the stored
/// token is already gone and the login flow should be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    Refreshed,
    LoggedOut,
    LoginRequired { reason: String },
}

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct SessionManager<S, C>
where
    S: TokenStore + ?Sized,
    C: AuthHttpClient + ?Sized,
{
    endpoints: SessionEndpoints,
    token_store: Arc<S>,
    auth_client: Arc<C>,
    now_provider: NowProvider,
    refresh_gate: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl<S, C> SessionManager<S, C>
where
    S: TokenStore + ?Sized,
    C: AuthHttpClient + ?Sized,
{
    pub fn new(endpoints: SessionEndpoints, token_store: Arc<S>, auth_client: Arc<C>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            endpoints,
            token_store,
            auth_client,
            now_provider: Arc::new(Utc::now),
            refresh_gate: Mutex::new(()),
            events,
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn get_token(&self) -> Result<Option<Token>, InfraError> {
        self.token_store.load_token()
    }

    pub fn set_token(&self, token: &Token) -> Result<(), InfraError> {
        self.token_store.save_token(token)
    }

    pub fn remove_token(&self) -> Result<(), InfraError> {
        self.token_store.delete_token()
    }

    pub fn decode(&self, token: &Token) -> Result<Claims, DecodeError> {
        token::decode(token)
    }

    pub fn is_expiring_soon(&self, token: &Token, horizon: Duration) -> bool {
        let horizon = chrono::Duration::from_std(horizon)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        token::is_expiring_soon(token, horizon, (self.now_provider)())
    }

    /// Exchanges the stored token for a new one. Any failure clears the
    /// session. Concurrent calls run one after another, so the store only
    /// ever sees complete writes and the last successful refresh wins.
    pub async fn refresh(&self) -> Result<RefreshOutcome, InfraError> {
        let _gate = self.refresh_gate.lock().await;

        let Some(current) = self.get_token()? else {
            return Ok(RefreshOutcome::NoToken);
        };

        let refreshed = self
            .auth_client
            .refresh_token(RefreshRequest {
                endpoint: self.endpoints.refresh.clone(),
                token: current,
            })
            .await;

        match refreshed {
            Ok(token) => {
                self.set_token(&token)?;
                tracing::info!("session token refreshed");
                self.emit(SessionEvent::Refreshed);
                Ok(RefreshOutcome::Refreshed(token))
            }
            Err(error) => {
                tracing::warn!(%error, "session refresh failed; clearing token");
                self.remove_token()?;
                self.emit(SessionEvent::LoginRequired {
                    reason: error.to_string(),
                });
                Err(InfraError::Refresh(error))
            }
        }
    }

    /// The stored token, provided it still decodes. A token that does not
    /// decode ends the session right away instead of attempting a refresh.
    pub fn valid_token(&self) -> Result<Token, InfraError> {
        let Some(token) = self.get_token()? else {
            return Err(InfraError::Unauthenticated);
        };
        match token::decode(&token) {
            Ok(_) => Ok(token),
            Err(error) => {
                self.invalidate(&error)?;
                Err(InfraError::Decode(error))
            }
        }
    }

    pub fn current_claims(&self) -> Result<Claims, InfraError> {
        let token = self.valid_token()?;
        Ok(token::decode(&token)?)
    }

    /// Display and routing hint only; never an authorization decision.
    pub fn current_user_id(&self) -> Result<i64, InfraError> {
        self.current_claims()?
            .user_id()
            .ok_or(InfraError::Decode(DecodeError::MissingClaim("nameidentifier")))
    }

    pub fn expires_at(&self) -> Result<Option<DateTime<Utc>>, InfraError> {
        Ok(self.current_claims()?.expires_at())
    }

    /// One tick of the background check.
    pub async fn check_expiry(&self, horizon: Duration) -> Result<ExpiryCheck, InfraError> {
        let Some(token) = self.get_token()? else {
            return Ok(ExpiryCheck::NoSession);
        };
        if let Err(error) = token::decode(&token) {
            self.invalidate(&error)?;
            return Err(InfraError::Decode(error));
        }
        if !self.is_expiring_soon(&token, horizon) {
            return Ok(ExpiryCheck::Fresh);
        }
        match self.refresh().await? {
            RefreshOutcome::NoToken => Ok(ExpiryCheck::NoSession),
            RefreshOutcome::Refreshed(_) => Ok(ExpiryCheck::Refreshed),
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Token, InfraError> {
        let request = self.credentials(&self.endpoints.login, username, password)?;
        let token = self.auth_client.login(request).await?;
        token::decode(&token)?;
        self.set_token(&token)?;
        tracing::info!("logged in");
        self.emit(SessionEvent::LoggedIn);
        Ok(token)
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<(), InfraError> {
        let request = self.credentials(&self.endpoints.register, username, password)?;
        self.auth_client.register(request).await?;
        tracing::info!("registered new account");
        Ok(())
    }

    /// Waits for an in-flight refresh so it cannot write a token back after
    /// the session is gone.
    pub async fn logout(&self) -> Result<(), InfraError> {
        let _gate = self.refresh_gate.lock().await;
        self.remove_token()?;
        tracing::info!("logged out");
        self.emit(SessionEvent::LoggedOut);
        Ok(())
    }

    fn credentials(
        &self,
        endpoint: &Url,
        username: &str,
        password: &str,
    ) -> Result<CredentialsRequest, InfraError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(InfraError::Validation("username must not be empty".to_string()));
        }
        if password.is_empty() {
            return Err(InfraError::Validation("password must not be empty".to_string()));
        }
        Ok(CredentialsRequest {
            endpoint: endpoint.clone(),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    fn invalidate(&self, error: &DecodeError) -> Result<(), InfraError> {
        tracing::warn!(%error, "stored token is unreadable; clearing session");
        self.remove_token()?;
        self.emit(SessionEvent::LoginRequired {
            reason: error.to_string(),
        });
        Ok(())
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::domain::token::test_tokens::expiring_at;
    use crate::infrastructure::credential_store::InMemoryTokenStore;
    use crate::infrastructure::error::RefreshError;
    use tokio::sync::Notify;

    fn manager(
        store: &Arc<InMemoryTokenStore>,
        client: &Arc<FakeAuthClient>,
    ) -> SessionManager<InMemoryTokenStore, FakeAuthClient> {
        SessionManager::new(endpoints(), Arc::clone(store), Arc::clone(client))
            .with_now_provider(Arc::new(fixed_now))
    }

    #[test]
    fn endpoints_keep_api_prefix() {
        let endpoints = endpoints();
        assert_eq!(endpoints.login.as_str(), "http://localhost:5170/api/auth/login");
        assert_eq!(endpoints.refresh.as_str(), "http://localhost:5170/api/auth/refresh");
    }

    #[tokio::test]
    async fn refresh_without_token_is_noop() {
        let store = Arc::new(InMemoryTokenStore::default());
        let client = Arc::new(FakeAuthClient::default());
        let session = manager(&store, &client);

        let outcome = session.refresh().await.expect("refresh");

        assert_eq!(outcome, RefreshOutcome::NoToken);
        assert_eq!(client.refresh_count(), 0);
    }

    #[tokio::test]
    async fn successful_refresh_replaces_stored_token() {
        let old = expiring_at(fixed_now().timestamp() + 60);
        let new = expiring_at(fixed_now().timestamp() + 3600);
        let store = Arc::new(InMemoryTokenStore::with_token(old.clone()));
        let client = Arc::new(FakeAuthClient::issuing(new.clone()));
        let session = manager(&store, &client);
        let mut events = session.subscribe();

        let outcome = session.refresh().await.expect("refresh");

        assert_eq!(outcome, RefreshOutcome::Refreshed(new.clone()));
        assert_eq!(session.get_token().expect("get"), Some(new));
        assert_eq!(client.refreshed_with.lock().expect("lock").as_slice(), &[old]);
        assert_eq!(events.try_recv().expect("event"), SessionEvent::Refreshed);
    }

    #[tokio::test]
    async fn failed_refresh_clears_token_and_requires_login() {
        let store = Arc::new(InMemoryTokenStore::with_token(expiring_at(1)));
        let client = Arc::new(FakeAuthClient::default());
        client.push_refresh(FakeRefresh::Fail(RefreshError::Http {
            status: 401,
            body: "expired".to_string(),
        }));
        let session = manager(&store, &client);
        let mut events = session.subscribe();

        let result = session.refresh().await;

        assert!(matches!(result, Err(InfraError::Refresh(RefreshError::Http { status: 401, .. }))));
        assert_eq!(session.get_token().expect("get"), None);
        assert!(matches!(
            events.try_recv().expect("event"),
            SessionEvent::LoginRequired { .. }
        ));
    }

    #[tokio::test]
    async fn network_failure_during_refresh_clears_token() {
        let store = Arc::new(InMemoryTokenStore::with_token(expiring_at(1)));
        let client = Arc::new(FakeAuthClient::default());
        client.push_refresh(FakeRefresh::Fail(RefreshError::Network("connection refused".to_string())));
        let session = manager(&store, &client);

        let result = session.refresh().await;

        assert!(result.is_err_and(|error| error.requires_login()));
        assert_eq!(session.get_token().expect("get"), None);
    }

    #[tokio::test]
    async fn concurrent_refreshes_leave_a_whole_token() {
        let first = expiring_at(fixed_now().timestamp() + 3600);
        let second = expiring_at(fixed_now().timestamp() + 7200);
        let store = Arc::new(InMemoryTokenStore::with_token(expiring_at(1)));
        let client = Arc::new(FakeAuthClient::default());
        client.push_refresh(FakeRefresh::Issue(first.clone()));
        client.push_refresh(FakeRefresh::Issue(second.clone()));
        let session = Arc::new(manager(&store, &client));

        let (left, right) = tokio::join!(session.refresh(), session.refresh());

        assert!(left.is_ok() && right.is_ok());
        assert_eq!(client.refresh_count(), 2);
        assert_eq!(session.get_token().expect("get"), Some(second));
        // The second call presented the token the first one stored.
        assert_eq!(client.refreshed_with.lock().expect("lock")[1], first);
    }

    #[test]
    fn valid_token_rejects_and_clears_corrupted_token() {
        let store = Arc::new(InMemoryTokenStore::with_token(Token::new("garbage")));
        let client = Arc::new(FakeAuthClient::default());
        let session = manager(&store, &client);

        let result = session.valid_token();

        assert!(matches!(result, Err(InfraError::Decode(DecodeError::MissingSegments(1)))));
        assert_eq!(session.get_token().expect("get"), None);
        assert!(matches!(session.valid_token(), Err(InfraError::Unauthenticated)));
    }

    #[test]
    fn current_user_id_comes_from_name_identifier() {
        let store = Arc::new(InMemoryTokenStore::with_token(expiring_at(2_000_000_000)));
        let client = Arc::new(FakeAuthClient::default());
        let session = manager(&store, &client);
        assert_eq!(session.current_user_id().expect("user id"), 42);
    }

    #[tokio::test]
    async fn check_expiry_refreshes_only_near_expiry() {
        let fresh = expiring_at(fixed_now().timestamp() + 3600);
        let store = Arc::new(InMemoryTokenStore::with_token(fresh.clone()));
        let client = Arc::new(FakeAuthClient::issuing(fresh.clone()));
        let session = manager(&store, &client);
        let horizon = Duration::from_secs(300);

        assert_eq!(session.check_expiry(horizon).await.expect("check"), ExpiryCheck::Fresh);
        assert_eq!(client.refresh_count(), 0);

        session
            .set_token(&expiring_at(fixed_now().timestamp() + 120))
            .expect("set");
        assert_eq!(session.check_expiry(horizon).await.expect("check"), ExpiryCheck::Refreshed);
        assert_eq!(client.refresh_count(), 1);
        assert_eq!(session.get_token().expect("get"), Some(fresh));
    }

    #[tokio::test]
    async fn check_expiry_with_corrupted_token_does_not_refresh() {
        let store = Arc::new(InMemoryTokenStore::with_token(Token::new("a.%%%.c")));
        let client = Arc::new(FakeAuthClient::default());
        let session = manager(&store, &client);

        let result = session.check_expiry(Duration::from_secs(300)).await;

        assert!(matches!(result, Err(InfraError::Decode(_))));
        assert_eq!(client.refresh_count(), 0);
        assert_eq!(session.get_token().expect("get"), None);
    }

    #[tokio::test]
    async fn login_stores_token_and_logout_clears_it() {
        let issued = expiring_at(fixed_now().timestamp() + 3600);
        let store = Arc::new(InMemoryTokenStore::default());
        let client = Arc::new(FakeAuthClient::issuing(issued.clone()));
        let session = manager(&store, &client);

        session.login("ada", "secret").await.expect("login");
        assert_eq!(session.get_token().expect("get"), Some(issued));

        session.logout().await.expect("logout");
        session.logout().await.expect("logout twice");
        assert_eq!(session.get_token().expect("get"), None);
    }

    /// Holds every refresh until `release` is notified.
    struct GatedAuthClient {
        entered: Arc<Notify>,
        release: Arc<Notify>,
        issued: Token,
    }

    #[async_trait::async_trait]
    impl AuthHttpClient for GatedAuthClient {
        async fn login(&self, _request: CredentialsRequest) -> Result<Token, InfraError> {
            Ok(self.issued.clone())
        }

        async fn register(&self, _request: CredentialsRequest) -> Result<(), InfraError> {
            Ok(())
        }

        async fn refresh_token(&self, _request: RefreshRequest) -> Result<Token, RefreshError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(self.issued.clone())
        }
    }

    #[tokio::test]
    async fn logout_during_refresh_leaves_session_closed() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let client = Arc::new(GatedAuthClient {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
            issued: expiring_at(fixed_now().timestamp() + 3600),
        });
        let store = Arc::new(InMemoryTokenStore::with_token(expiring_at(fixed_now().timestamp() + 60)));
        let session = Arc::new(
            SessionManager::new(endpoints(), Arc::clone(&store), client)
                .with_now_provider(Arc::new(fixed_now)),
        );

        let refreshing = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.refresh().await }
        });
        entered.notified().await;

        let logging_out = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.logout().await }
        });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(!logging_out.is_finished());

        release.notify_one();
        refreshing.await.expect("refresh task").expect("refresh");
        logging_out.await.expect("logout task").expect("logout");

        assert_eq!(session.get_token().expect("get"), None);
        assert!(matches!(session.valid_token(), Err(InfraError::Unauthenticated)));
    }

    #[tokio::test]
    async fn login_with_blank_username_is_rejected_before_sending() {
        let store = Arc::new(InMemoryTokenStore::default());
        let client = Arc::new(FakeAuthClient::issuing(expiring_at(1)));
        let session = manager(&store, &client);

        let result = session.login("  ", "secret").await;

        assert!(matches!(result, Err(InfraError::Validation(_))));
        assert_eq!(client.login_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
