//! Remote API surface consumed by the sync engine
//!
//! Wire payloads for the sync endpoints, the [`SyncApi`] seam, and the
//! authorized-call retry contract: attach the current access token; on
//! an authorization failure refresh once, replay once, and force logout
//! if the replay is rejected too.

mod http;

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpSyncApi;

use crate::auth::{AuthError, SessionManager};
use crate::models::{ModelEntry, PredictionRecord, RemedyRecord};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid API configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {0}")]
    Api(String),
    #[error("Authorization rejected: {0}")]
    Unauthorized(String),
    #[error("No active session")]
    NotAuthenticated,
    #[error("Session expired, sign in again")]
    SessionExpired,
    #[error("Authentication failed: {0}")]
    Auth(AuthError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn from_auth(error: AuthError) -> Self {
        match error {
            AuthError::SessionExpired => Self::SessionExpired,
            AuthError::NotAuthenticated => Self::NotAuthenticated,
            other => Self::Auth(other),
        }
    }
}

/// Per-item outcome of a prediction batch upload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionSyncOutcome {
    /// Echo of the client-generated id (the idempotency key)
    pub client_id: String,
    #[serde(default)]
    pub server_id: Option<String>,
    pub status: SyncResultStatus,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncResultStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionSyncResponse {
    pub results: Vec<PredictionSyncOutcome>,
    /// Server clock at acceptance time; recorded as `synced_at` locally
    pub sync_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemedySyncResponse {
    #[serde(default)]
    pub remedies: Vec<RemedyRecord>,
    /// Server clock for the pull; becomes the next cursor value
    pub sync_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUpdateResponse {
    pub update_available: bool,
    #[serde(default)]
    pub current_model: Option<ModelEntry>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Sync endpoints, kept behind a trait so the engine can be exercised
/// against an in-memory server in tests
#[async_trait]
pub trait SyncApi: Send + Sync {
    /// `POST /predictions/sync` — upload the full unsynced batch.
    ///
    /// The server processes items independently, keyed by the client
    /// id; re-submitting an already-accepted id is a no-op.
    async fn sync_predictions(
        &self,
        predictions: &[PredictionRecord],
    ) -> ApiResult<PredictionSyncResponse>;

    /// `GET /remedies/sync?lastSyncTime=` — remedies updated strictly
    /// after the cursor; `None` means "never synced, send everything"
    async fn pull_remedies(&self, last_sync_time: Option<&str>) -> ApiResult<RemedySyncResponse>;

    /// `GET /models/updates?currentVersion=&modelName=` — `current` is
    /// the locally known (name, version); `None` asks for the platform
    /// default
    async fn check_model_updates(
        &self,
        current: Option<(&str, &str)>,
    ) -> ApiResult<ModelUpdateResponse>;
}

/// Run one authenticated call under the retry contract.
///
/// `call` receives the access token to attach and is invoked at most
/// twice: once with the current token and, after a single refresh, once
/// more with the rotated token. A second authorization failure forces
/// logout instead of looping.
pub async fn send_authorized<T, F, Fut>(session: &SessionManager, call: F) -> ApiResult<T>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let token = session.access_token().ok_or(ApiError::NotAuthenticated)?;
    match call(token).await {
        Err(ApiError::Unauthorized(reason)) => {
            tracing::debug!("Access token rejected ({reason}), refreshing once");
            let token = session
                .refresh_once()
                .await
                .map_err(ApiError::from_auth)?;
            match call(token).await {
                Err(ApiError::Unauthorized(reason)) => {
                    tracing::warn!("Replayed call still unauthorized, forcing logout: {reason}");
                    session.force_logout();
                    Err(ApiError::SessionExpired)
                }
                other => other,
            }
        }
        other => other,
    }
}
