//! Local store facade with graceful degradation
//!
//! Opening the store never takes the app down: when the database cannot
//! be opened the store degrades to "unavailable" and every repository
//! accessor returns [`Error::StoreUnavailable`]. Capture and analysis
//! keep working in memory for the session; only offline caching is lost.

use std::path::Path;

use crate::db::{
    Database, LibSqlCatalogRepository, LibSqlPredictionRepository, LibSqlRemedyRepository,
    LibSqlSettingsRepository,
};
use crate::error::{Error, Result};

/// On-device persistent cache for predictions, remedies, catalog
/// metadata, and sync cursors.
pub struct LocalStore {
    db: Option<Database>,
}

impl LocalStore {
    /// Open (or create) the store at the given path.
    ///
    /// Idempotent; a failure to open degrades instead of propagating.
    pub async fn open(path: impl AsRef<Path>) -> Self {
        match Database::open(&path).await {
            Ok(db) => Self { db: Some(db) },
            Err(error) => {
                tracing::warn!(
                    "Local store unavailable, continuing without offline cache: {error}"
                );
                Self { db: None }
            }
        }
    }

    /// Open an in-memory store (tests and ephemeral sessions)
    pub async fn open_in_memory() -> Self {
        match Database::open_in_memory().await {
            Ok(db) => Self { db: Some(db) },
            Err(error) => {
                tracing::warn!("In-memory store unavailable: {error}");
                Self { db: None }
            }
        }
    }

    /// A store that always reports [`Error::StoreUnavailable`]
    #[must_use]
    pub const fn unavailable() -> Self {
        Self { db: None }
    }

    /// Whether the backing database opened successfully
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.db.is_some()
    }

    fn connection(&self) -> Result<&libsql::Connection> {
        self.db
            .as_ref()
            .map(Database::connection)
            .ok_or(Error::StoreUnavailable)
    }

    /// Prediction cache operations
    pub fn predictions(&self) -> Result<LibSqlPredictionRepository<'_>> {
        Ok(LibSqlPredictionRepository::new(self.connection()?))
    }

    /// Remedy reference cache operations
    pub fn remedies(&self) -> Result<LibSqlRemedyRepository<'_>> {
        Ok(LibSqlRemedyRepository::new(self.connection()?))
    }

    /// Classifier catalog operations
    pub fn catalog(&self) -> Result<LibSqlCatalogRepository<'_>> {
        Ok(LibSqlCatalogRepository::new(self.connection()?))
    }

    /// Opaque key-value settings (sync cursors live here)
    pub fn settings(&self) -> Result<LibSqlSettingsRepository<'_>> {
        Ok(LibSqlSettingsRepository::new(self.connection()?))
    }
}
