//! HTTP implementation of the auth endpoints

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;

use super::session::AuthApi;
use super::{AuthError, AuthResult, AuthSession, AuthUser, RegisterRequest, TokenPair};
use crate::util::compact_text;

/// Auth API client for the Blight backend
#[derive(Clone)]
pub struct HttpAuthApi {
    base_url: String,
    client: Client,
}

impl HttpAuthApi {
    pub fn new(base_url: impl AsRef<str>) -> AuthResult<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url.as_ref())?,
            client: Client::builder().build()?,
        })
    }

    /// Build against an existing client (shared connection pool)
    pub fn with_client(base_url: impl AsRef<str>, client: Client) -> AuthResult<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url.as_ref())?,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send<T: for<'de> Deserialize<'de>>(&self, request: RequestBuilder) -> AuthResult<T> {
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Unauthorized(parse_api_error(status, &body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(parse_api_error(status, &body)));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        validate_credentials(email, password)?;
        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });
        let response: SessionResponse = self
            .send(self.client.post(self.url("/auth/login")).json(&payload))
            .await?;
        Ok(response.into())
    }

    async fn register(&self, request: &RegisterRequest) -> AuthResult<AuthSession> {
        validate_credentials(&request.email, &request.password)?;
        let response: SessionResponse = self
            .send(self.client.post(self.url("/auth/register")).json(request))
            .await?;
        Ok(response.into())
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Refresh token must not be empty",
            ));
        }
        let payload = serde_json::json!({ "refreshToken": refresh_token });
        let response: RefreshResponse = self
            .send(self.client.post(self.url("/auth/refresh")).json(&payload))
            .await?;
        Ok(response.tokens)
    }

    async fn logout(&self, refresh_token: &str) -> AuthResult<()> {
        let payload = serde_json::json!({ "refreshToken": refresh_token });
        let response = self
            .client
            .post(self.url("/auth/logout"))
            .json(&payload)
            .send()
            .await?;

        // An already-revoked token is still a successful logout.
        if !(response.status().is_success() || response.status() == StatusCode::UNAUTHORIZED) {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(parse_api_error(status, &body)));
        }
        Ok(())
    }

    async fn logout_all(&self, access_token: &str) -> AuthResult<()> {
        let response = self
            .client
            .post(self.url("/auth/logout-all"))
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(parse_api_error(status, &body)));
        }
        Ok(())
    }

    async fn fetch_profile(&self, access_token: &str) -> AuthResult<AuthUser> {
        let response: ProfileResponse = self
            .send(
                self.client
                    .get(self.url("/auth/profile"))
                    .bearer_auth(access_token)
                    .header("Accept", "application/json"),
            )
            .await?;
        Ok(response.user)
    }
}

fn normalize_base_url(url: &str) -> AuthResult<String> {
    crate::util::normalize_base_url(url).map_err(AuthError::InvalidConfiguration)
}

fn validate_credentials(email: &str, password: &str) -> AuthResult<()> {
    if email.trim().is_empty() {
        return Err(AuthError::Api("Email is required".to_string()));
    }
    if password.trim().is_empty() {
        return Err(AuthError::Api("Password is required".to_string()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    user: AuthUser,
    tokens: TokenPair,
}

impl From<SessionResponse> for AuthSession {
    fn from(value: SessionResponse) -> Self {
        Self {
            tokens: value.tokens,
            user: value.user,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    tokens: TokenPair,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    user: AuthUser,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

pub(crate) fn parse_api_error(status: StatusCode, body: &str) -> String {
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

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_base_url_strips_trailing_slash() {
        let normalized = normalize_base_url("https://api.example.com/").unwrap();
        assert_eq!(normalized, "https://api.example.com");
    }

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url("").is_err());
        assert!(normalize_base_url("api.example.com").is_err());
    }

    #[test]
    fn parse_api_error_prefers_structured_message() {
        let rendered = parse_api_error(
            StatusCode::BAD_REQUEST,
            r#"{"message": "Model not found"}"#,
        );
        assert_eq!(rendered, "Model not found (400)");
    }

    #[test]
    fn parse_api_error_falls_back_to_body_text() {
        let rendered = parse_api_error(StatusCode::BAD_GATEWAY, "upstream offline");
        assert_eq!(rendered, "upstream offline (502)");
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, ""),
            "HTTP 502".to_string()
        );
    }

    #[test]
    fn session_response_decodes_wire_shape() {
        let payload = serde_json::json!({
            "user": { "id": "user-1", "email": "farmer@example.com", "name": null },
            "tokens": { "accessToken": "a", "refreshToken": "r" }
        });
        let response: SessionResponse = serde_json::from_value(payload).unwrap();
        let session: AuthSession = response.into();
        assert_eq!(session.tokens.access_token, "a");
        assert_eq!(session.user.id, "user-1");
    }
}
