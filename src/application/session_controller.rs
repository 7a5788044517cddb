use crate::application::session::{ExpiryCheck, SessionManager};
use crate::infrastructure::auth_client::AuthHttpClient;
use crate::infrastructure::credential_store::TokenStore;
use crate::infrastructure::error::InfraError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Owns the periodic expiry check. There is one per application; `start`
/// while already running does nothing, and dropping the controller stops
/// the timer.
pub struct SessionController<S, C>
where
    S: TokenStore + ?Sized + 'static,
    C: AuthHttpClient + ?Sized + 'static,
{
    session: Arc<SessionManager<S, C>>,
    check_interval: Duration,
    expiry_horizon: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S, C> SessionController<S, C>
where
    S: TokenStore + ?Sized + 'static,
    C: AuthHttpClient + ?Sized + 'static,
{
    pub fn new(
        session: Arc<SessionManager<S, C>>,
        check_interval: Duration,
        expiry_horizon: Duration,
    ) -> Self {
        Self {
            session,
            check_interval,
            expiry_horizon,
            task: Mutex::new(None),
        }
    }

    /// Returns `false` when the timer was already running.
    pub fn start(&self) -> Result<bool, InfraError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|error| InfraError::InvalidConfig(format!("session timer needs a tokio runtime: {error}")))?;
        let mut task = self.lock_task()?;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(false);
        }

        let session = Arc::clone(&self.session);
        let period = self.check_interval;
        let horizon = self.expiry_horizon;
        *task = Some(runtime.spawn(async move {
            let mut ticks = time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                match session.check_expiry(horizon).await {
                    Ok(ExpiryCheck::Refreshed) => tracing::debug!("session refreshed by timer"),
                    Ok(_) => {}
                    Err(error) => tracing::warn!(%error, "session expiry check failed"),
                }
            }
        }));
        tracing::info!(interval_secs = period.as_secs(), "session timer started");
        Ok(true)
    }

    pub fn stop(&self) -> Result<(), InfraError> {
        if let Some(handle) = self.lock_task()?.take() {
            handle.abort();
            tracing::info!("session timer stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock_task()
            .map(|task| task.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    fn lock_task(&self) -> Result<std::sync::MutexGuard<'_, Option<JoinHandle<()>>>, InfraError> {
        self.task
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("session timer lock poisoned: {error}")))
    }
}

impl<S, C> Drop for SessionController<S, C>
where
    S: TokenStore + ?Sized + 'static,
    C: AuthHttpClient + ?Sized + 'static,
{
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().ok().and_then(Option::take) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session::test_support::*;
    use crate::application::session::SessionEvent;
    use crate::domain::token::test_tokens::expiring_at;
    use crate::domain::token::Token;
    use crate::infrastructure::credential_store::InMemoryTokenStore;
    use crate::infrastructure::error::RefreshError;

    const PERIOD: Duration = Duration::from_secs(60);
    const HORIZON: Duration = Duration::from_secs(300);

    fn controller(
        token: Option<Token>,
        client: &Arc<FakeAuthClient>,
    ) -> (
        Arc<SessionManager<InMemoryTokenStore, FakeAuthClient>>,
        SessionController<InMemoryTokenStore, FakeAuthClient>,
    ) {
        let store = match token {
            Some(token) => InMemoryTokenStore::with_token(token),
            None => InMemoryTokenStore::default(),
        };
        let session = Arc::new(
            SessionManager::new(endpoints(), Arc::new(store), Arc::clone(client))
                .with_now_provider(Arc::new(fixed_now)),
        );
        let controller = SessionController::new(Arc::clone(&session), PERIOD, HORIZON);
        (session, controller)
    }

    #[tokio::test(start_paused = true)]
    async fn timer_refreshes_expiring_token_every_period() {
        let soon = expiring_at(fixed_now().timestamp() + 120);
        let client = Arc::new(FakeAuthClient::issuing(soon.clone()));
        let (_session, controller) = controller(Some(soon), &client);

        assert!(controller.start().expect("start"));
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(client.refresh_count(), 0);

        time::sleep(Duration::from_secs(31)).await;
        assert_eq!(client.refresh_count(), 1);

        time::sleep(PERIOD).await;
        assert_eq!(client.refresh_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_keeps_single_timer() {
        let soon = expiring_at(fixed_now().timestamp() + 120);
        let client = Arc::new(FakeAuthClient::issuing(soon.clone()));
        let (_session, controller) = controller(Some(soon), &client);

        assert!(controller.start().expect("first start"));
        assert!(!controller.start().expect("second start"));
        time::sleep(Duration::from_secs(61)).await;

        assert_eq!(client.refresh_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_future_checks() {
        let soon = expiring_at(fixed_now().timestamp() + 120);
        let client = Arc::new(FakeAuthClient::issuing(soon.clone()));
        let (_session, controller) = controller(Some(soon), &client);

        controller.start().expect("start");
        time::sleep(Duration::from_secs(61)).await;
        controller.stop().expect("stop");
        assert!(!controller.is_running());
        time::sleep(Duration::from_secs(600)).await;

        assert_eq!(client.refresh_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_controller_stops_timer() {
        let soon = expiring_at(fixed_now().timestamp() + 120);
        let client = Arc::new(FakeAuthClient::issuing(soon.clone()));
        let (_session, controller) = controller(Some(soon), &client);

        controller.start().expect("start");
        drop(controller);
        time::sleep(Duration::from_secs(600)).await;

        assert_eq!(client.refresh_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_on_tick_signals_login_required() {
        let soon = expiring_at(fixed_now().timestamp() + 120);
        let client = Arc::new(FakeAuthClient::default());
        client.push_refresh(FakeRefresh::Fail(RefreshError::Http {
            status: 401,
            body: "expired".to_string(),
        }));
        let (session, controller) = controller(Some(soon), &client);
        let mut events = session.subscribe();

        controller.start().expect("start");
        time::sleep(Duration::from_secs(61)).await;

        assert!(matches!(
            events.try_recv().expect("event"),
            SessionEvent::LoginRequired { .. }
        ));
        assert_eq!(session.get_token().expect("get"), None);

        // Later ticks see no session and stay quiet.
        time::sleep(PERIOD).await;
        assert_eq!(client.refresh_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_token_is_left_alone() {
        let fresh = expiring_at(fixed_now().timestamp() + 3600);
        let client = Arc::new(FakeAuthClient::issuing(fresh.clone()));
        let (_session, controller) = controller(Some(fresh), &client);

        controller.start().expect("start");
        time::sleep(Duration::from_secs(181)).await;

        assert_eq!(client.refresh_count(), 0);
    }

    #[test]
    fn start_outside_runtime_is_an_error() {
        let client = Arc::new(FakeAuthClient::default());
        let (_session, controller) = controller(None, &client);
        assert!(matches!(controller.start(), Err(InfraError::InvalidConfig(_))));
    }
}
