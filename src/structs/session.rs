use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::client::AuthApi;
use super::user::{AuthUser, SessionState};
use super::TokenResponse;
use crate::errors::SessionError;
use crate::expiry::{HandlerResult, SessionExpiry};
use crate::storage::TokenStorage;
use crate::token::{decode_unverified, now_epoch_seconds, refresh_delay};

/// Tuning for proactive token renewal.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Share of the remaining lifetime left unused when renewing.
    pub refresh_margin_ratio: f64,
    /// Renew at least this long before expiry.
    pub min_refresh_margin: Duration,
    /// Wait this long before retrying a proactive renewal that failed without a 401.
    pub refresh_retry_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            refresh_margin_ratio: 0.2,
            min_refresh_margin: Duration::from_secs(30),
            refresh_retry_interval: Duration::from_secs(30),
        }
    }
}

/// Owner of the in-memory session: token, user, plan and the two busy flags.
///
/// Cloning is cheap and every clone drives the same session. Constructing a store
/// registers it as the handler of the given [`SessionExpiry`], replacing any
/// previous handler.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn AuthApi>,
    storage: Arc<dyn TokenStorage>,
    expiry: Arc<SessionExpiry>,
    options: SessionOptions,
    state: watch::Sender<SessionState>,
    refresh_timer: Mutex<RefreshTimer>,
}

#[derive(Default)]
struct RefreshTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

#[derive(Clone, Copy)]
enum Credential {
    Login,
    Signup,
}

impl SessionStore {
    pub fn new(
        api: Arc<dyn AuthApi>,
        storage: Arc<dyn TokenStorage>,
        expiry: Arc<SessionExpiry>,
    ) -> Self {
        Self::with_options(api, storage, expiry, SessionOptions::default())
    }

    pub fn with_options(
        api: Arc<dyn AuthApi>,
        storage: Arc<dyn TokenStorage>,
        expiry: Arc<SessionExpiry>,
        options: SessionOptions,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        let store = Self {
            inner: Arc::new(Inner {
                api,
                storage,
                expiry,
                options,
                state,
                refresh_timer: Mutex::new(RefreshTimer::default()),
            }),
        };

        let weak = Arc::downgrade(&store.inner);
        store
            .inner
            .expiry
            .register(Some(Arc::new(move || -> HandlerResult {
                if let Some(inner) = weak.upgrade() {
                    SessionStore { inner }.expire_locally();
                }
                Ok(())
            })));

        store
    }

    /// Snapshot of the current session.
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Watches the session for changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn token(&self) -> Option<String> {
        self.inner.state.borrow().token.clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.state.borrow().is_logged_in()
    }

    /// Restores the stored session, if there is a usable one. Run once at startup.
    ///
    /// A stored token that is malformed, visibly expired, or rejected by the user or
    /// plan fetch is cleared. `is_loading` is false whichever way this returns.
    pub async fn initialize(&self) -> Result<(), SessionError> {
        self.inner.state.send_modify(|s| s.is_loading = true);

        let stored = match self.inner.storage.get_token().await {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read stored token");
                None
            }
        };

        let Some(token) = stored else {
            tracing::debug!("no stored session");
            self.inner.state.send_modify(|s| {
                s.clear_session();
                s.is_loading = false;
            });
            return Ok(());
        };

        let usable = match decode_unverified(&token) {
            Ok(claims) => !claims.is_expired_at(now_epoch_seconds()),
            Err(err) => {
                tracing::debug!(error = %err, "stored token is malformed");
                false
            }
        };

        if !usable {
            tracing::info!("discarding unusable stored token");
            self.clear_stored_token().await;
            self.inner.state.send_modify(|s| {
                s.clear_session();
                s.is_loading = false;
            });
            return Ok(());
        }

        self.inner.state.send_modify(|s| s.token = Some(token.clone()));

        let api = &self.inner.api;
        let (user, plan) = tokio::join!(api.me(&token), api.plan(&token));

        match user.and_then(|user| plan.map(|plan| (user, plan))) {
            Ok((user, plan)) => {
                let mut restored = false;
                self.inner.state.send_modify(|s| {
                    s.is_loading = false;
                    if s.token.as_deref() == Some(token.as_str()) {
                        s.user = Some(user);
                        s.plan = Some(plan);
                        restored = true;
                    }
                });
                if restored {
                    tracing::info!("session restored");
                    self.schedule_refresh(&token);
                }
                Ok(())
            }
            Err(err) => {
                // A sign-in that finished while the fetches were out owns the session now.
                let mut rejected = false;
                self.inner.state.send_modify(|s| {
                    s.is_loading = false;
                    if s.token.as_deref() == Some(token.as_str()) {
                        s.clear_session();
                        rejected = true;
                    }
                });
                if rejected {
                    tracing::warn!(error = %err, "stored session rejected, signing out");
                    self.cancel_refresh();
                    self.clear_stored_token_if(&token).await;
                } else {
                    tracing::debug!(error = %err, "stored session rejected after a newer sign in");
                }
                Err(err)
            }
        }
    }

    /// Signs in. On failure the current session, if any, is left as it was.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthUser, SessionError> {
        self.authenticate(Credential::Login, email, password).await
    }

    /// Creates an account and signs in to it.
    pub async fn signup(&self, email: &str, password: &str) -> Result<AuthUser, SessionError> {
        self.authenticate(Credential::Signup, email, password).await
    }

    /// Clears the stored token and the session. A storage failure is logged, the
    /// in-memory session is dropped regardless.
    pub async fn logout(&self) {
        self.clear_stored_token().await;
        self.cancel_refresh();
        self.inner.state.send_modify(SessionState::clear_session);
        tracing::info!("signed out");
    }

    /// Trades the current token for a fresh one. Does nothing without a session.
    ///
    /// A 401 signs out. Any other failure keeps the current token so a later
    /// attempt can still succeed. Failing to persist the renewed token is logged,
    /// not returned.
    pub async fn refresh_token(&self) -> Result<(), SessionError> {
        let Some(current) = self.token() else {
            return Ok(());
        };

        match self.inner.api.refresh(&current).await {
            Ok(TokenResponse { token }) => {
                // Never bring back a session that was closed while the call was out.
                let applied = self.inner.state.send_if_modified(|s| {
                    if s.token.as_deref() != Some(current.as_str()) {
                        return false;
                    }
                    s.token = Some(token.clone());
                    true
                });
                if !applied {
                    tracing::debug!("session changed during refresh, dropping renewed token");
                    return Ok(());
                }

                self.schedule_refresh(&token);
                // The renewal itself succeeded; the previous stored token stays usable until it expires.
                match self.inner.storage.set_token(&token).await {
                    Ok(()) => tracing::debug!("token refreshed"),
                    Err(err) => {
                        tracing::warn!(error = %err, "token refreshed but could not be persisted");
                    }
                }
                Ok(())
            }
            Err(err) if err.is_unauthorized() => {
                tracing::warn!("token refresh rejected, signing out");
                self.logout().await;
                Err(err)
            }
            Err(err) => {
                tracing::warn!(error = %err, "token refresh failed, keeping current token");
                Err(err)
            }
        }
    }

    async fn authenticate(
        &self,
        credential: Credential,
        email: &str,
        password: &str,
    ) -> Result<AuthUser, SessionError> {
        let _busy = Authenticating::start(&self.inner.state);

        let response = match credential {
            Credential::Login => self.inner.api.login(email, password).await?,
            Credential::Signup => self.inner.api.signup(email, password).await?,
        };
        self.inner.storage.set_token(&response.token).await?;

        let token = response.token;
        let user = response.user;
        self.inner.state.send_modify(|s| {
            s.token = Some(token.clone());
            s.user = Some(user.clone());
            s.plan = None;
        });
        self.inner.expiry.reset();
        self.schedule_refresh(&token);
        tracing::info!(user_id = %user.id, "signed in");

        // The plan is not part of the trust decision; a failure here leaves it unset.
        match self.inner.api.plan(&token).await {
            Ok(plan) => {
                self.inner.state.send_if_modified(|s| {
                    if s.token.as_deref() != Some(token.as_str()) {
                        return false;
                    }
                    s.plan = Some(plan);
                    true
                });
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to load plan after sign in");
            }
        }

        Ok(user)
    }

    /// Drops the session after the API reported it dead. Runs synchronously from
    /// the expiry handler; the stored token is cleared in the background.
    fn expire_locally(&self) {
        let had_session = self.inner.state.send_if_modified(|s| {
            if s.token.is_none() {
                return false;
            }
            s.clear_session();
            true
        });
        if !had_session {
            return;
        }

        self.cancel_refresh();
        match Handle::try_current() {
            Ok(runtime) => {
                let storage = self.inner.storage.clone();
                runtime.spawn(async move {
                    if let Err(err) = storage.clear_token().await {
                        tracing::warn!(error = %err, "failed to clear stored token");
                    }
                });
            }
            Err(_) => {
                tracing::warn!("no async runtime, stored token left in place");
            }
        }
    }

    async fn clear_stored_token(&self) {
        if let Err(err) = self.inner.storage.clear_token().await {
            tracing::warn!(error = %err, "failed to clear stored token");
        }
    }

    /// Clears storage only while it still holds `token`.
    async fn clear_stored_token_if(&self, token: &str) {
        match self.inner.storage.get_token().await {
            Ok(Some(stored)) if stored != token => {
                tracing::debug!("stored token was replaced, leaving it in place");
            }
            Ok(None) => {}
            Ok(Some(_)) | Err(_) => self.clear_stored_token().await,
        }
    }

    fn schedule_refresh(&self, token: &str) {
        let claims = match decode_unverified(token) {
            Ok(claims) => claims,
            Err(err) => {
                tracing::debug!(error = %err, "token has no readable expiry, not scheduling refresh");
                self.cancel_refresh();
                return;
            }
        };

        let options = &self.inner.options;
        match refresh_delay(
            &claims,
            now_epoch_seconds(),
            options.refresh_margin_ratio,
            options.min_refresh_margin,
        ) {
            Some(delay) => self.spawn_refresh_after(delay),
            None => {
                tracing::debug!("token has no future expiry, not scheduling refresh");
                self.cancel_refresh();
            }
        }
    }

    fn spawn_refresh_after(&self, delay: Duration) {
        let Ok(runtime) = Handle::try_current() else {
            tracing::debug!("no async runtime, not scheduling refresh");
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let mut timer = self.inner.lock_timer();
        timer.generation = timer.generation.wrapping_add(1);
        if let Some(handle) = timer.handle.take() {
            handle.abort();
        }
        let generation = timer.generation;
        timer.handle = Some(runtime.spawn(run_refresh_timer(weak, generation, delay)));
        tracing::debug!(delay_secs = delay.as_secs(), "token refresh scheduled");
    }

    fn cancel_refresh(&self) {
        let mut timer = self.inner.lock_timer();
        timer.generation = timer.generation.wrapping_add(1);
        if let Some(handle) = timer.handle.take() {
            handle.abort();
        }
    }
}

async fn run_refresh_timer(weak: Weak<Inner>, generation: u64, delay: Duration) {
    tokio::time::sleep(delay).await;

    let Some(inner) = weak.upgrade() else {
        return;
    };
    {
        let mut timer = inner.lock_timer();
        if timer.generation != generation {
            return;
        }
        // Detach so a reschedule from inside the refresh doesn't abort this task.
        timer.handle = None;
    }

    let store = SessionStore { inner };
    let Err(err) = store.refresh_token().await else {
        return;
    };
    if err.is_unauthorized() {
        return;
    }

    // Transient failure: try again while the token can still be renewed.
    let still_valid = store
        .token()
        .and_then(|token| decode_unverified(&token).ok())
        .is_some_and(|claims| !claims.is_expired_at(now_epoch_seconds()));
    if still_valid {
        store.spawn_refresh_after(store.inner.options.refresh_retry_interval);
    }
}

impl Inner {
    fn lock_timer(&self) -> MutexGuard<'_, RefreshTimer> {
        self.refresh_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let timer = self
            .refresh_timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = timer.handle.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

/// Holds `is_authenticating` up for as long as it lives.
struct Authenticating<'a>(&'a watch::Sender<SessionState>);

impl<'a> Authenticating<'a> {
    fn start(state: &'a watch::Sender<SessionState>) -> Self {
        state.send_modify(|s| s.is_authenticating = true);
        Self(state)
    }
}

impl Drop for Authenticating<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|s| s.is_authenticating = false);
    }
}
