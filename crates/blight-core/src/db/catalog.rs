//! Classifier catalog repository

use libsql::{params, Connection, Row};

use super::row::{opt_real, opt_text, parse_datetime, text_or_null};
use crate::error::Result;
use crate::models::ModelEntry;

/// Trait for model catalog operations (async)
#[allow(async_fn_in_trait)]
pub trait CatalogRepository {
    /// Insert-or-replace a catalog entry, keeping the catalog invariants.
    ///
    /// Activation is one atomic read-modify-write: inside a single
    /// transaction the previous active row for the same name (and the
    /// previous global default, when applicable) is cleared before the
    /// new row lands, so the store can never hold two active rows for
    /// one name or two defaults.
    async fn upsert(&self, entry: &ModelEntry) -> Result<()>;

    /// The most recently updated active entry, if any
    async fn get_active(&self) -> Result<Option<ModelEntry>>;

    /// The platform default entry, if any
    async fn get_default(&self) -> Result<Option<ModelEntry>>;

    /// All known catalog entries, newest first
    async fn list(&self) -> Result<Vec<ModelEntry>>;
}

/// libSQL implementation of `CatalogRepository`
pub struct LibSqlCatalogRepository<'a> {
    conn: &'a Connection,
}

const MODEL_COLUMNS: &str = "id, name, version, description, storage_path, input_shape, \
     output_classes, accuracy, is_active, is_default, download_url, checksum, updated_at";

impl<'a> LibSqlCatalogRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entry(row: &Row) -> Result<ModelEntry> {
        let input_shape: String = row.get(5)?;
        let output_classes: String = row.get(6)?;
        let updated_at: String = row.get(12)?;

        Ok(ModelEntry {
            id: row.get(0)?,
            name: row.get(1)?,
            version: row.get(2)?,
            description: opt_text(row, 3)?,
            storage_path: row.get(4)?,
            input_shape: serde_json::from_str(&input_shape)?,
            output_classes: serde_json::from_str(&output_classes)?,
            accuracy: opt_real(row, 7)?,
            is_active: row.get::<i32>(8)? != 0,
            is_default: row.get::<i32>(9)? != 0,
            download_url: opt_text(row, 10)?,
            checksum: opt_text(row, 11)?,
            updated_at: parse_datetime(&updated_at)?,
        })
    }

    async fn get_one(&self, sql: &str) -> Result<Option<ModelEntry>> {
        let mut rows = self.conn.query(sql, ()).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_entry(&row)?)),
            None => Ok(None),
        }
    }
}

impl CatalogRepository for LibSqlCatalogRepository<'_> {
    async fn upsert(&self, entry: &ModelEntry) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        let result = async {
            if entry.is_default {
                self.conn
                    .execute(
                        "UPDATE models SET is_default = 0 WHERE id <> ?",
                        params![entry.id.clone()],
                    )
                    .await?;
            }
            if entry.is_active {
                self.conn
                    .execute(
                        "UPDATE models SET is_active = 0 WHERE name = ? AND id <> ?",
                        params![entry.name.clone(), entry.id.clone()],
                    )
                    .await?;
            }

            self.conn
                .execute(
                    "INSERT OR REPLACE INTO models (
                        id, name, version, description, storage_path, input_shape,
                        output_classes, accuracy, is_active, is_default, download_url,
                        checksum, updated_at
                     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        entry.id.clone(),
                        entry.name.clone(),
                        entry.version.clone(),
                        text_or_null(entry.description.as_deref()),
                        entry.storage_path.clone(),
                        serde_json::to_string(&entry.input_shape)?,
                        serde_json::to_string(&entry.output_classes)?,
                        entry
                            .accuracy
                            .map_or(libsql::Value::Null, libsql::Value::Real),
                        i64::from(entry.is_active),
                        i64::from(entry.is_default),
                        text_or_null(entry.download_url.as_deref()),
                        text_or_null(entry.checksum.as_deref()),
                        entry.updated_at.to_rfc3339(),
                    ],
                )
                .await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.conn.execute("COMMIT", ()).await?;
                Ok(())
            }
            Err(error) => {
                self.conn.execute("ROLLBACK", ()).await.ok();
                Err(error)
            }
        }
    }

    async fn get_active(&self) -> Result<Option<ModelEntry>> {
        let sql = format!(
            "SELECT {MODEL_COLUMNS} FROM models
             WHERE is_active = 1 ORDER BY updated_at DESC LIMIT 1"
        );
        self.get_one(&sql).await
    }

    async fn get_default(&self) -> Result<Option<ModelEntry>> {
        let sql = format!("SELECT {MODEL_COLUMNS} FROM models WHERE is_default = 1 LIMIT 1");
        self.get_one(&sql).await
    }

    async fn list(&self) -> Result<Vec<ModelEntry>> {
        let sql = format!("SELECT {MODEL_COLUMNS} FROM models ORDER BY updated_at DESC");
        let mut rows = self.conn.query(&sql, ()).await?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_entry(&row)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn entry(id: &str, name: &str, version: &str) -> ModelEntry {
        ModelEntry {
            id: id.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            description: None,
            storage_path: String::new(),
            input_shape: vec![1, 224, 224, 3],
            output_classes: vec!["healthy".to_string(), "leaf_spot".to_string()],
            accuracy: Some(0.92),
            is_active: true,
            is_default: false,
            download_url: Some("https://cdn.example.com/m.tflite".to_string()),
            checksum: Some("sha256:abc".to_string()),
            updated_at: Utc::now(),
        }
    }

    async fn active_count(db: &Database, name: &str) -> i64 {
        let mut rows = db
            .connection()
            .query(
                "SELECT COUNT(*) FROM models WHERE name = ? AND is_active = 1",
                params![name],
            )
            .await
            .unwrap();
        rows.next().await.unwrap().unwrap().get(0).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_and_get_active_roundtrip() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlCatalogRepository::new(db.connection());

        let model = entry("model-1", "ginger-disease", "1.0.0");
        repo.upsert(&model).await.unwrap();

        let active = repo.get_active().await.unwrap().unwrap();
        assert_eq!(active, model);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn activating_new_version_deactivates_previous() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlCatalogRepository::new(db.connection());

        repo.upsert(&entry("model-1", "ginger-disease", "1.0.0"))
            .await
            .unwrap();
        repo.upsert(&entry("model-2", "ginger-disease", "2.0.0"))
            .await
            .unwrap();

        assert_eq!(active_count(&db, "ginger-disease").await, 1);
        let active = repo.get_active().await.unwrap().unwrap();
        assert_eq!(active.id, "model-2");
        assert_eq!(active.version, "2.0.0");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn active_rows_per_name_are_independent() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlCatalogRepository::new(db.connection());

        repo.upsert(&entry("model-1", "ginger-disease", "1.0.0"))
            .await
            .unwrap();
        repo.upsert(&entry("model-2", "turmeric-disease", "1.0.0"))
            .await
            .unwrap();

        assert_eq!(active_count(&db, "ginger-disease").await, 1);
        assert_eq!(active_count(&db, "turmeric-disease").await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn only_one_default_globally() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlCatalogRepository::new(db.connection());

        let mut first = entry("model-1", "ginger-disease", "1.0.0");
        first.is_default = true;
        let mut second = entry("model-2", "turmeric-disease", "1.0.0");
        second.is_default = true;
        repo.upsert(&first).await.unwrap();
        repo.upsert(&second).await.unwrap();

        let default = repo.get_default().await.unwrap().unwrap();
        assert_eq!(default.id, "model-2");

        let mut rows = db
            .connection()
            .query("SELECT COUNT(*) FROM models WHERE is_default = 1", ())
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 1);
    }
}
