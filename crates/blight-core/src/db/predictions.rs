//! Prediction repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use chrono::{DateTime, Utc};
use libsql::{params, Connection, Row};

use super::row::{decode_json_opt, json_or_null, opt_datetime, opt_text, parse_datetime, text_or_null};
use crate::error::{Error, Result};
use crate::models::{PredictionId, PredictionRecord};

/// Trait for prediction storage operations (async)
#[allow(async_fn_in_trait)]
pub trait PredictionRepository {
    /// Insert-or-replace a prediction keyed by its client-generated id.
    ///
    /// Safe to call repeatedly with the same id; retries never duplicate.
    async fn upsert(&self, record: &PredictionRecord) -> Result<()>;

    /// List a user's predictions, newest first
    async fn list(&self, user_id: &str, limit: usize, offset: usize)
        -> Result<Vec<PredictionRecord>>;

    /// All predictions not yet accepted by the server, oldest first
    /// so upload order follows capture order
    async fn list_unsynced(&self, user_id: &str) -> Result<Vec<PredictionRecord>>;

    /// Number of predictions still waiting for upload
    async fn count_unsynced(&self, user_id: &str) -> Result<usize>;

    /// Batch-mark predictions as accepted by the server.
    ///
    /// Ids with no matching row are silently ignored.
    async fn mark_synced(&self, ids: &[PredictionId], synced_at: DateTime<Utc>) -> Result<()>;

    /// Delete one prediction (explicit user action)
    async fn delete(&self, id: &PredictionId) -> Result<()>;

    /// Delete every prediction a user captured (account wipe)
    async fn delete_for_user(&self, user_id: &str) -> Result<()>;
}

/// libSQL implementation of `PredictionRepository`
pub struct LibSqlPredictionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlPredictionRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_prediction(row: &Row) -> Result<PredictionRecord> {
        let id: String = row.get(0)?;
        let scores_json: String = row.get(5)?;
        let created_at: String = row.get(14)?;

        Ok(PredictionRecord {
            id: id
                .parse()
                .map_err(|_| Error::InvalidInput(format!("invalid prediction id: {id}")))?,
            user_id: row.get(1)?,
            model_id: row.get(2)?,
            remedy_id: opt_text(row, 3)?,
            image_ref: row.get(4)?,
            scores: serde_json::from_str(&scores_json)?,
            top_prediction: row.get(6)?,
            confidence: row.get(7)?,
            is_offline_capture: row.get::<i32>(8)? != 0,
            device_info: decode_json_opt(opt_text(row, 9)?)?,
            location: decode_json_opt(opt_text(row, 10)?)?,
            notes: opt_text(row, 11)?,
            synced: row.get::<i32>(12)? != 0,
            synced_at: opt_datetime(row, 13)?,
            created_at: parse_datetime(&created_at)?,
        })
    }

    async fn query_predictions(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<PredictionRecord>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_prediction(&row)?);
        }
        Ok(records)
    }
}

const PREDICTION_COLUMNS: &str = "id, user_id, model_id, remedy_id, image_ref, scores, \
     top_prediction, confidence, is_offline_capture, device_info, location, notes, \
     synced, synced_at, created_at";

impl PredictionRepository for LibSqlPredictionRepository<'_> {
    async fn upsert(&self, record: &PredictionRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO predictions (
                    id, user_id, model_id, remedy_id, image_ref, scores,
                    top_prediction, confidence, is_offline_capture, device_info,
                    location, notes, synced, synced_at, created_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    record.id.as_str(),
                    record.user_id.clone(),
                    record.model_id.clone(),
                    text_or_null(record.remedy_id.as_deref()),
                    record.image_ref.clone(),
                    serde_json::to_string(&record.scores)?,
                    record.top_prediction.clone(),
                    record.confidence,
                    i64::from(record.is_offline_capture),
                    json_or_null(record.device_info.as_ref())?,
                    json_or_null(record.location.as_ref())?,
                    text_or_null(record.notes.as_deref()),
                    i64::from(record.synced),
                    text_or_null(record.synced_at.map(|at| at.to_rfc3339()).as_deref()),
                    record.created_at.to_rfc3339(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn list(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PredictionRecord>> {
        let sql = format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions
             WHERE user_id = ?
             ORDER BY created_at DESC
             LIMIT ? OFFSET ?"
        );
        self.query_predictions(&sql, params![user_id, limit as i64, offset as i64])
            .await
    }

    async fn list_unsynced(&self, user_id: &str) -> Result<Vec<PredictionRecord>> {
        let sql = format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions
             WHERE user_id = ? AND synced = 0
             ORDER BY created_at ASC"
        );
        self.query_predictions(&sql, params![user_id]).await
    }

    async fn count_unsynced(&self, user_id: &str) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM predictions WHERE user_id = ? AND synced = 0",
                params![user_id],
            )
            .await?;

        let count = if let Some(row) = rows.next().await? {
            usize::try_from(row.get::<i64>(0)?).unwrap_or(0)
        } else {
            0
        };
        Ok(count)
    }

    async fn mark_synced(&self, ids: &[PredictionId], synced_at: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let synced_at = synced_at.to_rfc3339();
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        for id in ids {
            let update = self
                .conn
                .execute(
                    "UPDATE predictions SET synced = 1, synced_at = ? WHERE id = ?",
                    params![synced_at.clone(), id.as_str()],
                )
                .await;
            if let Err(error) = update {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(error.into());
            }
        }
        self.conn.execute("COMMIT", ()).await?;
        Ok(())
    }

    async fn delete(&self, id: &PredictionId) -> Result<()> {
        let rows = self
            .conn
            .execute("DELETE FROM predictions WHERE id = ?", params![id.as_str()])
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete_for_user(&self, user_id: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM predictions WHERE user_id = ?",
                params![user_id],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{GeoPoint, PredictionScores};
    use pretty_assertions::assert_eq;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn capture(user: &str) -> PredictionRecord {
        let scores: PredictionScores = [
            ("leaf_spot".to_string(), 0.9_f64),
            ("healthy".to_string(), 0.1_f64),
        ]
        .into_iter()
        .collect();
        PredictionRecord::capture(user, "model-1", "file:///captures/leaf.jpg", scores).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_and_list_roundtrip() {
        let db = setup().await;
        let repo = LibSqlPredictionRepository::new(db.connection());

        let record = capture("user-1").with_location(GeoPoint {
            latitude: 9.93,
            longitude: 76.26,
            accuracy: Some(12.0),
        });
        repo.upsert(&record).await.unwrap();

        let listed = repo.list("user-1", 10, 0).await.unwrap();
        assert_eq!(listed, vec![record]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_same_id_does_not_duplicate() {
        let db = setup().await;
        let repo = LibSqlPredictionRepository::new(db.connection());

        let record = capture("user-1");
        repo.upsert(&record).await.unwrap();
        repo.upsert(&record).await.unwrap();

        assert_eq!(repo.list("user-1", 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unsynced_listing_and_marking() {
        let db = setup().await;
        let repo = LibSqlPredictionRepository::new(db.connection());

        let first = capture("user-1");
        let second = capture("user-1");
        let other_user = capture("user-2");
        repo.upsert(&first).await.unwrap();
        repo.upsert(&second).await.unwrap();
        repo.upsert(&other_user).await.unwrap();

        let unsynced = repo.list_unsynced("user-1").await.unwrap();
        assert_eq!(unsynced.len(), 2);
        assert_eq!(repo.count_unsynced("user-1").await.unwrap(), 2);

        let synced_at = Utc::now();
        // Unknown ids are ignored, known ids flip to synced.
        repo.mark_synced(&[first.id, PredictionId::new()], synced_at)
            .await
            .unwrap();

        let unsynced = repo.list_unsynced("user-1").await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].id, second.id);

        let listed = repo.list("user-1", 10, 0).await.unwrap();
        let synced = listed.iter().find(|r| r.id == first.id).unwrap();
        assert!(synced.synced);
        assert!(synced.synced_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_for_user_wipes_only_that_user() {
        let db = setup().await;
        let repo = LibSqlPredictionRepository::new(db.connection());

        repo.upsert(&capture("user-1")).await.unwrap();
        repo.upsert(&capture("user-2")).await.unwrap();

        repo.delete_for_user("user-1").await.unwrap();

        assert!(repo.list("user-1", 10, 0).await.unwrap().is_empty());
        assert_eq!(repo.list("user-2", 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_missing_reports_not_found() {
        let db = setup().await;
        let repo = LibSqlPredictionRepository::new(db.connection());

        let result = repo.delete(&PredictionId::new()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
