//! HTTP implementation of the sync endpoints

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};

use super::{
    send_authorized, ApiError, ApiResult, ModelUpdateResponse, PredictionSyncResponse,
    RemedySyncResponse, SyncApi,
};
use crate::auth::SessionManager;
use crate::models::PredictionRecord;
use crate::util::compact_text;

/// Sync API client for the Blight backend.
///
/// Every call goes through the session manager's retry contract, so an
/// expired access token is refreshed and replayed transparently.
pub struct HttpSyncApi {
    base_url: String,
    client: Client,
    session: Arc<SessionManager>,
}

impl HttpSyncApi {
    pub fn new(base_url: impl AsRef<str>, session: Arc<SessionManager>) -> ApiResult<Self> {
        Ok(Self {
            base_url: crate::util::normalize_base_url(base_url.as_ref())
                .map_err(ApiError::InvalidConfiguration)?,
            client: Client::builder().build()?,
            session,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send<T: for<'de> Deserialize<'de>>(&self, request: RequestBuilder) -> ApiResult<T> {
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Unauthorized(parse_api_error(status, &body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Api(parse_api_error(status, &body)));
        }
        Ok(response.json::<T>().await?)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictionSyncRequest<'a> {
    predictions: &'a [PredictionRecord],
}

#[async_trait]
impl SyncApi for HttpSyncApi {
    async fn sync_predictions(
        &self,
        predictions: &[PredictionRecord],
    ) -> ApiResult<PredictionSyncResponse> {
        send_authorized(&self.session, |token| {
            let body = PredictionSyncRequest { predictions };
            async move {
                self.send(
                    self.client
                        .post(self.url("/predictions/sync"))
                        .bearer_auth(token)
                        .json(&body),
                )
                .await
            }
        })
        .await
    }

    async fn pull_remedies(&self, last_sync_time: Option<&str>) -> ApiResult<RemedySyncResponse> {
        send_authorized(&self.session, |token| {
            let mut request = self
                .client
                .get(self.url("/remedies/sync"))
                .bearer_auth(token);
            if let Some(cursor) = last_sync_time {
                request = request.query(&[("lastSyncTime", cursor)]);
            }
            async move { self.send(request).await }
        })
        .await
    }

    async fn check_model_updates(
        &self,
        current: Option<(&str, &str)>,
    ) -> ApiResult<ModelUpdateResponse> {
        send_authorized(&self.session, |token| {
            let mut request = self
                .client
                .get(self.url("/models/updates"))
                .bearer_auth(token);
            if let Some((name, version)) = current {
                request = request.query(&[("modelName", name), ("currentVersion", version)]);
            }
            async move { self.send(request).await }
        })
        .await
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}
