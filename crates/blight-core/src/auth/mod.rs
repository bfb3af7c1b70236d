//! Session credential lifecycle
//!
//! Owns the current access/refresh token pair and user snapshot,
//! persists them across restarts, and carries the single-shot
//! refresh-and-retry contract every authenticated call depends on.

mod http;
mod session;

use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpAuthApi;
pub use session::{AuthApi, SessionManager, SessionState};

/// Snapshot of the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Access/refresh token pair
///
/// Both tokens rotate together on every successful refresh; the
/// superseded pair is treated as dead the moment rotation succeeds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// A persisted session: token pair plus the user it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub tokens: TokenPair,
    pub user: AuthUser,
}

/// Registration payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Auth API error: {0}")]
    Api(String),
    #[error("Authorization rejected: {0}")]
    Unauthorized(String),
    #[error("Session expired, sign in again")]
    SessionExpired,
    #[error("No active session")]
    NotAuthenticated,
    #[error("Credential storage error: {0}")]
    Storage(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Where the session survives restarts (keychain, file, memory)
pub trait SessionPersistence: Send + Sync {
    fn load_session(&self) -> AuthResult<Option<AuthSession>>;
    fn save_session(&self, session: &AuthSession) -> AuthResult<()>;
    fn clear_session(&self) -> AuthResult<()>;
}

/// In-memory persistence for tests and ephemeral sessions
#[derive(Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<AuthSession>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a stored session (simulates an earlier app run)
    #[must_use]
    pub fn with_session(session: AuthSession) -> Self {
        Self {
            slot: Mutex::new(Some(session)),
        }
    }
}

impl SessionPersistence for MemorySessionStore {
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        Ok(self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone())
    }

    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        *self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn clear_session(&self) -> AuthResult<()> {
        *self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures for modules whose tests need a live authenticated session.

    use std::sync::Arc;

    use async_trait::async_trait;

    use super::{
        AuthApi, AuthError, AuthResult, AuthSession, AuthUser, MemorySessionStore,
        RegisterRequest, SessionManager, SessionPersistence, TokenPair,
    };

    /// Auth API that accepts everything: probes pass, refreshes rotate.
    pub(crate) struct StaticAuthApi;

    #[async_trait]
    impl AuthApi for StaticAuthApi {
        async fn login(&self, email: &str, _password: &str) -> AuthResult<AuthSession> {
            Ok(test_session_for(email))
        }

        async fn register(&self, request: &RegisterRequest) -> AuthResult<AuthSession> {
            Ok(test_session_for(&request.email))
        }

        async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
            if refresh_token.is_empty() {
                return Err(AuthError::Unauthorized("empty refresh token".to_string()));
            }
            Ok(TokenPair {
                access_token: "rotated-access".to_string(),
                refresh_token: "rotated-refresh".to_string(),
            })
        }

        async fn logout(&self, _refresh_token: &str) -> AuthResult<()> {
            Ok(())
        }

        async fn logout_all(&self, _access_token: &str) -> AuthResult<()> {
            Ok(())
        }

        async fn fetch_profile(&self, _access_token: &str) -> AuthResult<AuthUser> {
            Ok(AuthUser {
                id: "user-1".to_string(),
                email: Some("farmer@example.com".to_string()),
                name: None,
            })
        }
    }

    fn test_session_for(email: &str) -> AuthSession {
        AuthSession {
            tokens: TokenPair {
                access_token: "test-access".to_string(),
                refresh_token: "test-refresh".to_string(),
            },
            user: AuthUser {
                id: "user-1".to_string(),
                email: Some(email.to_string()),
                name: None,
            },
        }
    }

    /// A session manager already signed in as `user-1`
    pub(crate) async fn authenticated_manager() -> Arc<SessionManager> {
        let store = MemorySessionStore::new();
        store.save_session(&test_session_for("farmer@example.com")).unwrap();
        let manager = SessionManager::new(Arc::new(StaticAuthApi), Arc::new(store));
        manager.restore().await.unwrap();
        Arc::new(manager)
    }

    /// A session manager with no stored credentials
    pub(crate) fn anonymous_manager() -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            Arc::new(StaticAuthApi),
            Arc::new(MemorySessionStore::new()),
        ))
    }
}
