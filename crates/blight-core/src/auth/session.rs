//! Session manager: the credential state machine
//!
//! `Anonymous → Authenticating → Authenticated → (RefreshPending) →
//! Authenticated | Anonymous`. One instance per app session, injected
//! into the API client and the sync engine.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use super::{
    AuthError, AuthResult, AuthSession, AuthUser, RegisterRequest, SessionPersistence, TokenPair,
};

/// Wire-level auth operations, kept behind a trait so the lifecycle
/// logic can be exercised without a server
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> AuthResult<AuthSession>;
    async fn register(&self, request: &RegisterRequest) -> AuthResult<AuthSession>;
    async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair>;
    async fn logout(&self, refresh_token: &str) -> AuthResult<()>;
    async fn logout_all(&self, access_token: &str) -> AuthResult<()>;
    async fn fetch_profile(&self, access_token: &str) -> AuthResult<AuthUser>;
}

/// Lifecycle states of the credential provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated,
    RefreshPending,
}

struct Slot {
    state: SessionState,
    session: Option<AuthSession>,
}

/// Owns the current session and its persistence.
///
/// All state transitions go through this type; callers never touch the
/// token pair directly.
pub struct SessionManager {
    api: Arc<dyn AuthApi>,
    persistence: Arc<dyn SessionPersistence>,
    slot: RwLock<Slot>,
}

impl SessionManager {
    pub fn new(api: Arc<dyn AuthApi>, persistence: Arc<dyn SessionPersistence>) -> Self {
        Self {
            api,
            persistence,
            slot: RwLock::new(Slot {
                state: SessionState::Anonymous,
                session: None,
            }),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.read().state
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().session.is_some()
    }

    /// Snapshot of the signed-in user, if any
    pub fn current_user(&self) -> Option<AuthUser> {
        self.read().session.as_ref().map(|s| s.user.clone())
    }

    /// Access token to attach to the next authenticated call
    pub fn access_token(&self) -> Option<String> {
        self.read()
            .session
            .as_ref()
            .map(|s| s.tokens.access_token.clone())
    }

    /// Restore a persisted session from an earlier run.
    ///
    /// The stored credentials are validated by one profile probe. An
    /// authorization failure of the probe triggers exactly one refresh
    /// attempt; when that fails too the credentials are cleared and the
    /// session goes anonymous. A transport failure keeps the session,
    /// so an offline app start stays signed in.
    pub async fn restore(&self) -> AuthResult<Option<AuthUser>> {
        let Some(stored) = self.persistence.load_session()? else {
            self.write(SessionState::Anonymous, None);
            return Ok(None);
        };

        let access_token = stored.tokens.access_token.clone();
        self.write(SessionState::Authenticated, Some(stored.clone()));

        match self.api.fetch_profile(&access_token).await {
            Ok(user) => {
                let refreshed = AuthSession {
                    tokens: stored.tokens,
                    user: user.clone(),
                };
                self.persistence.save_session(&refreshed)?;
                self.write(SessionState::Authenticated, Some(refreshed));
                Ok(Some(user))
            }
            Err(AuthError::Unauthorized(reason)) => {
                tracing::debug!("Stored access token rejected ({reason}), trying refresh");
                match self.refresh_once().await {
                    Ok(_) => Ok(self.current_user()),
                    Err(error) => {
                        tracing::warn!("Failed to refresh persisted session: {error}");
                        self.clear_local()?;
                        Ok(None)
                    }
                }
            }
            Err(error) => {
                tracing::debug!("Profile probe failed without an auth error, keeping session: {error}");
                Ok(Some(stored.user))
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> AuthResult<AuthUser> {
        self.write_state(SessionState::Authenticating);
        match self.api.login(email, password).await {
            Ok(session) => {
                self.persistence.save_session(&session)?;
                let user = session.user.clone();
                self.write(SessionState::Authenticated, Some(session));
                Ok(user)
            }
            Err(error) => {
                self.write(SessionState::Anonymous, None);
                Err(error)
            }
        }
    }

    pub async fn register(&self, request: &RegisterRequest) -> AuthResult<AuthUser> {
        self.write_state(SessionState::Authenticating);
        match self.api.register(request).await {
            Ok(session) => {
                self.persistence.save_session(&session)?;
                let user = session.user.clone();
                self.write(SessionState::Authenticated, Some(session));
                Ok(user)
            }
            Err(error) => {
                self.write(SessionState::Anonymous, None);
                Err(error)
            }
        }
    }

    /// One refresh attempt, never looped.
    ///
    /// On success both tokens rotate and the new access token is
    /// returned; the superseded pair is discarded immediately. An
    /// authorization failure is terminal: credentials are cleared and
    /// the session goes anonymous. Transport failures leave the session
    /// as it was.
    pub async fn refresh_once(&self) -> AuthResult<String> {
        let Some(stored) = self.read().session.clone() else {
            return Err(AuthError::NotAuthenticated);
        };

        self.write_state(SessionState::RefreshPending);
        match self.api.refresh(&stored.tokens.refresh_token).await {
            Ok(tokens) => {
                let access_token = tokens.access_token.clone();
                let rotated = AuthSession {
                    tokens,
                    user: stored.user,
                };
                self.persistence.save_session(&rotated)?;
                self.write(SessionState::Authenticated, Some(rotated));
                Ok(access_token)
            }
            Err(AuthError::Unauthorized(reason)) => {
                tracing::warn!("Refresh token rejected, forcing logout: {reason}");
                self.clear_local()?;
                Err(AuthError::SessionExpired)
            }
            Err(error) => {
                self.write_state(SessionState::Authenticated);
                Err(error)
            }
        }
    }

    /// Revoke the current refresh token server-side (best-effort) and
    /// always clear local credentials
    pub async fn logout(&self) -> AuthResult<()> {
        let session = self.read().session.clone();
        if let Some(session) = session {
            if let Err(error) = self.api.logout(&session.tokens.refresh_token).await {
                tracing::warn!("Server-side logout failed, clearing local session anyway: {error}");
            }
        }
        self.clear_local()
    }

    /// Revoke every refresh token issued to this user, across all
    /// sessions, then clear local credentials
    pub async fn logout_all(&self) -> AuthResult<()> {
        let session = self.read().session.clone();
        if let Some(session) = session {
            if let Err(error) = self.api.logout_all(&session.tokens.access_token).await {
                tracing::warn!(
                    "Server-side logout-all failed, clearing local session anyway: {error}"
                );
            }
        }
        self.clear_local()
    }

    /// Drop credentials locally without a server round-trip.
    ///
    /// Used by the retry contract when a replayed call still fails on
    /// authorization after a successful refresh.
    pub fn force_logout(&self) {
        if let Err(error) = self.clear_local() {
            tracing::warn!("Failed to clear persisted credentials: {error}");
        }
    }

    fn clear_local(&self) -> AuthResult<()> {
        self.persistence.clear_session()?;
        self.write(SessionState::Anonymous, None);
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, state: SessionState, session: Option<AuthSession>) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.state = state;
        slot.session = session;
    }

    fn write_state(&self, state: SessionState) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemorySessionStore;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn session(access: &str, refresh: &str) -> AuthSession {
        AuthSession {
            tokens: TokenPair {
                access_token: access.to_string(),
                refresh_token: refresh.to_string(),
            },
            user: AuthUser {
                id: "user-1".to_string(),
                email: Some("farmer@example.com".to_string()),
                name: None,
            },
        }
    }

    /// Scripted auth API: profile accepts one specific access token,
    /// refresh accepts one specific refresh token and rotates to a new
    /// pair.
    #[derive(Default)]
    struct ScriptedApi {
        valid_access: Mutex<Option<String>>,
        valid_refresh: Mutex<Option<String>>,
        probe_offline: Mutex<bool>,
        refresh_offline: Mutex<bool>,
        refresh_calls: AtomicUsize,
        logout_calls: AtomicUsize,
        logout_all_calls: AtomicUsize,
        logout_offline: Mutex<bool>,
    }

    impl ScriptedApi {
        fn accepting(access: &str, refresh: &str) -> Self {
            let api = Self::default();
            *api.valid_access.lock().unwrap() = Some(access.to_string());
            *api.valid_refresh.lock().unwrap() = Some(refresh.to_string());
            api
        }

        fn offline_error() -> AuthError {
            // A reqwest connect error is awkward to fabricate; the
            // manager only matches on the Unauthorized variant, so any
            // other variant stands in for a transport failure.
            AuthError::Api("connection refused".to_string())
        }
    }

    #[async_trait]
    impl AuthApi for ScriptedApi {
        async fn login(&self, email: &str, _password: &str) -> AuthResult<AuthSession> {
            if email == "farmer@example.com" {
                let fresh = session("login-access", "login-refresh");
                *self.valid_access.lock().unwrap() = Some("login-access".to_string());
                *self.valid_refresh.lock().unwrap() = Some("login-refresh".to_string());
                Ok(fresh)
            } else {
                Err(AuthError::Unauthorized("Invalid credentials (401)".into()))
            }
        }

        async fn register(&self, request: &RegisterRequest) -> AuthResult<AuthSession> {
            self.login(&request.email, &request.password).await
        }

        async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if *self.refresh_offline.lock().unwrap() {
                return Err(Self::offline_error());
            }
            let valid = self.valid_refresh.lock().unwrap().clone();
            if valid.as_deref() == Some(refresh_token) {
                let count = self.refresh_calls.load(Ordering::SeqCst);
                let rotated = TokenPair {
                    access_token: format!("access-{count}"),
                    refresh_token: format!("refresh-{count}"),
                };
                *self.valid_access.lock().unwrap() = Some(rotated.access_token.clone());
                *self.valid_refresh.lock().unwrap() = Some(rotated.refresh_token.clone());
                Ok(rotated)
            } else {
                Err(AuthError::Unauthorized("Invalid refresh token (401)".into()))
            }
        }

        async fn logout(&self, _refresh_token: &str) -> AuthResult<()> {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            if *self.logout_offline.lock().unwrap() {
                return Err(Self::offline_error());
            }
            Ok(())
        }

        async fn logout_all(&self, _access_token: &str) -> AuthResult<()> {
            self.logout_all_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn fetch_profile(&self, access_token: &str) -> AuthResult<AuthUser> {
            if *self.probe_offline.lock().unwrap() {
                return Err(Self::offline_error());
            }
            let valid = self.valid_access.lock().unwrap().clone();
            if valid.as_deref() == Some(access_token) {
                Ok(AuthUser {
                    id: "user-1".to_string(),
                    email: Some("farmer@example.com".to_string()),
                    name: Some("Field Tester".to_string()),
                })
            } else {
                Err(AuthError::Unauthorized("Invalid access token (401)".into()))
            }
        }
    }

    fn manager(api: ScriptedApi, store: MemorySessionStore) -> (SessionManager, Arc<ScriptedApi>) {
        let api = Arc::new(api);
        (
            SessionManager::new(api.clone(), Arc::new(store)),
            api,
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restore_without_stored_session_stays_anonymous() {
        let (manager, _api) = manager(
            ScriptedApi::accepting("a", "r"),
            MemorySessionStore::new(),
        );
        assert_eq!(manager.restore().await.unwrap(), None);
        assert_eq!(manager.state(), SessionState::Anonymous);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restore_with_valid_access_token_authenticates() {
        let (manager, api) = manager(
            ScriptedApi::accepting("a", "r"),
            MemorySessionStore::with_session(session("a", "r")),
        );

        let user = manager.restore().await.unwrap().unwrap();
        assert_eq!(user.id, "user-1");
        assert_eq!(manager.state(), SessionState::Authenticated);
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restore_with_expired_access_refreshes_exactly_once() {
        let (manager, api) = manager(
            ScriptedApi::accepting("fresh", "r"),
            MemorySessionStore::with_session(session("stale", "r")),
        );

        let user = manager.restore().await.unwrap();
        assert!(user.is_some());
        assert_eq!(manager.state(), SessionState::Authenticated);
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
        // Rotated access token is now the attached one.
        assert_eq!(manager.access_token().as_deref(), Some("access-1"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restore_with_revoked_refresh_clears_credentials() {
        let store = MemorySessionStore::with_session(session("stale", "revoked"));
        let (manager, api) = manager(ScriptedApi::accepting("fresh", "r"), store);

        assert_eq!(manager.restore().await.unwrap(), None);
        assert_eq!(manager.state(), SessionState::Anonymous);
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
        assert!(!manager.is_authenticated());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restore_keeps_session_when_probe_hits_transport_failure() {
        let api = ScriptedApi::accepting("a", "r");
        *api.probe_offline.lock().unwrap() = true;
        let (manager, api) = manager(api, MemorySessionStore::with_session(session("a", "r")));

        // Offline app start: stored credentials stay live.
        assert!(manager.restore().await.unwrap().is_some());
        assert_eq!(manager.state(), SessionState::Authenticated);
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_rotates_both_tokens_and_persists() {
        let store = Arc::new(MemorySessionStore::with_session(session("a", "r")));
        let api: Arc<dyn AuthApi> = Arc::new(ScriptedApi::accepting("a", "r"));
        let manager = SessionManager::new(api, store.clone());
        manager.restore().await.unwrap();

        let access = manager.refresh_once().await.unwrap();
        assert_eq!(access, "access-1");

        let persisted = store.load_session().unwrap().unwrap();
        assert_eq!(persisted.tokens.access_token, "access-1");
        assert_eq!(persisted.tokens.refresh_token, "refresh-1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_with_revoked_token_is_terminal() {
        let (manager, _api) = manager(
            ScriptedApi::accepting("a", "other"),
            MemorySessionStore::with_session(session("a", "revoked")),
        );
        manager.restore().await.unwrap();

        let result = manager.refresh_once().await;
        assert!(matches!(result, Err(AuthError::SessionExpired)));
        assert_eq!(manager.state(), SessionState::Anonymous);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_transport_failure_keeps_session() {
        let api = ScriptedApi::accepting("a", "r");
        *api.refresh_offline.lock().unwrap() = true;
        let (manager, _api) = manager(api, MemorySessionStore::with_session(session("a", "r")));
        manager.restore().await.unwrap();

        assert!(manager.refresh_once().await.is_err());
        assert_eq!(manager.state(), SessionState::Authenticated);
        assert!(manager.is_authenticated());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn logout_clears_local_even_when_server_unreachable() {
        let api = ScriptedApi::accepting("a", "r");
        *api.logout_offline.lock().unwrap() = true;
        let store = Arc::new(MemorySessionStore::with_session(session("a", "r")));
        let api = Arc::new(api);
        let manager = SessionManager::new(api.clone(), store.clone());
        manager.restore().await.unwrap();

        manager.logout().await.unwrap();
        assert_eq!(manager.state(), SessionState::Anonymous);
        assert!(store.load_session().unwrap().is_none());
        assert_eq!(api.logout_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn login_failure_goes_anonymous() {
        let (manager, _api) = manager(
            ScriptedApi::accepting("a", "r"),
            MemorySessionStore::new(),
        );

        assert!(manager.login("intruder@example.com", "nope").await.is_err());
        assert_eq!(manager.state(), SessionState::Anonymous);

        let user = manager.login("farmer@example.com", "pw").await.unwrap();
        assert_eq!(user.id, "user-1");
        assert_eq!(manager.state(), SessionState::Authenticated);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn logout_all_revokes_and_clears() {
        let (manager, api) = manager(
            ScriptedApi::accepting("a", "r"),
            MemorySessionStore::with_session(session("a", "r")),
        );
        manager.restore().await.unwrap();

        manager.logout_all().await.unwrap();
        assert_eq!(api.logout_all_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), SessionState::Anonymous);
    }
}
