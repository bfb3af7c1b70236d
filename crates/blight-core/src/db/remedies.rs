//! Remedy reference cache repository

use libsql::{params, Connection, Row};

use super::row::{opt_text, parse_datetime, text_or_null};
use crate::error::{Error, Result};
use crate::models::RemedyRecord;

/// Trait for remedy cache operations (async)
#[allow(async_fn_in_trait)]
pub trait RemedyRepository {
    /// Insert-or-replace a batch of remedies pulled from the server
    async fn upsert_all(&self, remedies: &[RemedyRecord]) -> Result<()>;

    /// All cached remedies, ordered by disease name
    async fn list(&self) -> Result<Vec<RemedyRecord>>;

    /// Look up one remedy by its stable disease code
    async fn get_by_code(&self, disease_code: &str) -> Result<Option<RemedyRecord>>;
}

/// libSQL implementation of `RemedyRepository`
pub struct LibSqlRemedyRepository<'a> {
    conn: &'a Connection,
}

const REMEDY_COLUMNS: &str = "id, disease_name, disease_code, description, symptoms, causes, \
     treatments, prevention_measures, severity, image_url, version, updated_at";

impl<'a> LibSqlRemedyRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_remedy(row: &Row) -> Result<RemedyRecord> {
        let severity: String = row.get(8)?;
        let updated_at: String = row.get(11)?;
        let symptoms: String = row.get(4)?;
        let causes: String = row.get(5)?;
        let treatments: String = row.get(6)?;
        let prevention: String = row.get(7)?;

        Ok(RemedyRecord {
            id: row.get(0)?,
            disease_name: row.get(1)?,
            disease_code: row.get(2)?,
            description: row.get(3)?,
            symptoms: serde_json::from_str(&symptoms)?,
            causes: serde_json::from_str(&causes)?,
            treatments: serde_json::from_str(&treatments)?,
            prevention_measures: serde_json::from_str(&prevention)?,
            severity: severity.parse().map_err(Error::InvalidInput)?,
            image_url: opt_text(row, 9)?,
            version: row.get(10)?,
            updated_at: parse_datetime(&updated_at)?,
        })
    }
}

impl RemedyRepository for LibSqlRemedyRepository<'_> {
    async fn upsert_all(&self, remedies: &[RemedyRecord]) -> Result<()> {
        if remedies.is_empty() {
            return Ok(());
        }

        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        for remedy in remedies {
            let insert = self
                .conn
                .execute(
                    "INSERT OR REPLACE INTO remedies (
                        id, disease_name, disease_code, description, symptoms, causes,
                        treatments, prevention_measures, severity, image_url, version, updated_at
                     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        remedy.id.clone(),
                        remedy.disease_name.clone(),
                        remedy.disease_code.clone(),
                        remedy.description.clone(),
                        serde_json::to_string(&remedy.symptoms)?,
                        serde_json::to_string(&remedy.causes)?,
                        serde_json::to_string(&remedy.treatments)?,
                        serde_json::to_string(&remedy.prevention_measures)?,
                        remedy.severity.as_str(),
                        text_or_null(remedy.image_url.as_deref()),
                        remedy.version,
                        remedy.updated_at.to_rfc3339(),
                    ],
                )
                .await;
            if let Err(error) = insert {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(error.into());
            }
        }
        self.conn.execute("COMMIT", ()).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RemedyRecord>> {
        let sql = format!("SELECT {REMEDY_COLUMNS} FROM remedies ORDER BY disease_name ASC");
        let mut rows = self.conn.query(&sql, ()).await?;
        let mut remedies = Vec::new();
        while let Some(row) = rows.next().await? {
            remedies.push(Self::parse_remedy(&row)?);
        }
        Ok(remedies)
    }

    async fn get_by_code(&self, disease_code: &str) -> Result<Option<RemedyRecord>> {
        let sql = format!("SELECT {REMEDY_COLUMNS} FROM remedies WHERE disease_code = ?");
        let mut rows = self.conn.query(&sql, params![disease_code]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_remedy(&row)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Severity;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn remedy(code: &str, version: i64) -> RemedyRecord {
        RemedyRecord {
            id: format!("remedy-{code}"),
            disease_name: format!("Disease {code}"),
            disease_code: code.to_string(),
            description: "Fungal infection".to_string(),
            symptoms: vec!["brown spots".to_string()],
            causes: vec![],
            treatments: vec!["copper fungicide".to_string()],
            prevention_measures: vec!["crop rotation".to_string()],
            severity: Severity::High,
            image_url: None,
            version,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_and_lookup_by_code() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlRemedyRepository::new(db.connection());

        repo.upsert_all(&[remedy("LEAF_SPOT", 1), remedy("SOFT_ROT", 1)])
            .await
            .unwrap();

        let found = repo.get_by_code("LEAF_SPOT").await.unwrap().unwrap();
        assert_eq!(found.severity, Severity::High);
        assert!(repo.get_by_code("UNKNOWN").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_replaces_older_version() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlRemedyRepository::new(db.connection());

        repo.upsert_all(&[remedy("LEAF_SPOT", 1)]).await.unwrap();
        repo.upsert_all(&[remedy("LEAF_SPOT", 2)]).await.unwrap();

        let all = repo.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].version, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_orders_by_disease_name() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlRemedyRepository::new(db.connection());

        let mut early = remedy("ZED", 1);
        early.disease_name = "Zed blight".to_string();
        let mut late = remedy("ACE", 1);
        late.disease_name = "Ace rot".to_string();
        repo.upsert_all(&[early, late]).await.unwrap();

        let all = repo.list().await.unwrap();
        assert_eq!(all[0].disease_code, "ACE");
        assert_eq!(all[1].disease_code, "ZED");
    }
}
