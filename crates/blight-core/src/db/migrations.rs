//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    // Check if schema_version table exists
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Migration to version 1: Initial schema
async fn migrate_v1(conn: &Connection) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    // Using a transaction for atomicity

    conn.execute("BEGIN TRANSACTION", ()).await?;

    let statements = [
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Captured predictions, keyed by the client-generated id
        "CREATE TABLE IF NOT EXISTS predictions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            model_id TEXT NOT NULL,
            remedy_id TEXT,
            image_ref TEXT NOT NULL,
            scores TEXT NOT NULL,
            top_prediction TEXT NOT NULL,
            confidence REAL NOT NULL,
            is_offline_capture INTEGER NOT NULL DEFAULT 1,
            device_info TEXT,
            location TEXT,
            notes TEXT,
            synced INTEGER NOT NULL DEFAULT 0,
            synced_at TEXT,
            created_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_predictions_user ON predictions(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_predictions_synced ON predictions(synced)",
        "CREATE INDEX IF NOT EXISTS idx_predictions_created ON predictions(created_at DESC)",
        // Remedy reference cache, latest known row per disease code
        "CREATE TABLE IF NOT EXISTS remedies (
            id TEXT PRIMARY KEY,
            disease_name TEXT NOT NULL,
            disease_code TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL,
            symptoms TEXT NOT NULL,
            causes TEXT NOT NULL,
            treatments TEXT NOT NULL,
            prevention_measures TEXT NOT NULL,
            severity TEXT NOT NULL,
            image_url TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_remedies_code ON remedies(disease_code)",
        // Classifier catalog metadata
        "CREATE TABLE IF NOT EXISTS models (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            description TEXT,
            storage_path TEXT NOT NULL,
            input_shape TEXT NOT NULL,
            output_classes TEXT NOT NULL,
            accuracy REAL,
            is_active INTEGER NOT NULL DEFAULT 0,
            is_default INTEGER NOT NULL DEFAULT 0,
            download_url TEXT,
            checksum TEXT,
            updated_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_models_active ON models(is_active)",
        // Settings table (sync cursors and other opaque key-value state)
        "CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        // Record migration version
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    for statement in statements {
        if let Err(error) = conn.execute(statement, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(error.into());
        }
    }

    conn.execute("COMMIT", ()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test(flavor = "multi_thread")]
    async fn migrations_create_all_tables() {
        let db = Database::open_in_memory().await.unwrap();

        for table in ["predictions", "remedies", "models", "settings"] {
            let mut rows = db
                .connection()
                .query(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?)",
                    [table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            assert_eq!(row.get::<i32>(0).unwrap(), 1, "missing table {table}");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rerun_is_a_noop() {
        let db = Database::open_in_memory().await.unwrap();
        run(db.connection()).await.unwrap();
        run(db.connection()).await.unwrap();

        let mut rows = db
            .connection()
            .query("SELECT COUNT(*) FROM schema_version", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i32>(0).unwrap(), 1);
    }
}
