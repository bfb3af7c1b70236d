use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] blight_core::Error),
    #[error("Authentication error: {0}")]
    Auth(#[from] blight_core::auth::AuthError),
    #[error("API error: {0}")]
    Api(#[from] blight_core::api::ApiError),
    #[error("Sync error: {0}")]
    Sync(#[from] blight_core::sync::SyncError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}. Set BLIGHT_API_URL to your backend, e.g. https://api.example.com/api")]
    Config(String),
    #[error("Not signed in. Run `blight login <email> <password>` first.")]
    NotSignedIn,
}
