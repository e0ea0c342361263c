//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

/// Indexed `retrieve_task` columns used by the due-task query and monitoring filters
const RETRIEVE_TASK_INDEXES: [(&str, &str); 10] = [
    ("idx_retrieve_task_device_name", "device_name"),
    ("idx_retrieve_task_queue_name", "queue_name"),
    ("idx_retrieve_task_local_aet", "local_aet"),
    ("idx_retrieve_task_remote_aet", "remote_aet"),
    ("idx_retrieve_task_destination_aet", "destination_aet"),
    ("idx_retrieve_task_created_time", "created_time"),
    ("idx_retrieve_task_updated_time", "updated_time"),
    ("idx_retrieve_task_scheduled_time", "scheduled_time"),
    ("idx_retrieve_task_study_iuid", "study_iuid"),
    ("idx_retrieve_task_batch_id", "batch_id"),
];

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        // Connect to database with foreign key enforcement and WAL mode
        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };

        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: Create initial schema
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v1");

        // Wrap migration in a transaction so partial failures don't leave the DB in a broken state
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = async {
            Self::create_queue_msg_schema(conn).await?;
            Self::create_retrieve_task_schema(conn).await?;
            Self::record_migration(conn, 1).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v1: {}",
                            e
                        )))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!("Database migration v1 complete");
        Ok(())
    }

    /// Create queue_msg table
    async fn create_queue_msg_schema(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE queue_msg (
                pk INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL UNIQUE,
                queue_name TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                num_failures INTEGER NOT NULL DEFAULT 0,
                processing_start_time INTEGER,
                processing_end_time INTEGER,
                error_message TEXT,
                outcome_message TEXT,
                created_time INTEGER NOT NULL,
                updated_time INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create queue_msg table: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Create retrieve_task table and its indexes
    async fn create_retrieve_task_schema(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE retrieve_task (
                pk INTEGER PRIMARY KEY AUTOINCREMENT,
                device_name TEXT NOT NULL,
                queue_name TEXT NOT NULL,
                created_time INTEGER NOT NULL,
                updated_time INTEGER NOT NULL,
                scheduled_time INTEGER,
                local_aet TEXT NOT NULL,
                remote_aet TEXT NOT NULL,
                destination_aet TEXT NOT NULL,
                study_iuid TEXT NOT NULL,
                series_iuid TEXT,
                sop_iuid TEXT,
                batch_id TEXT,
                remaining INTEGER NOT NULL DEFAULT -1,
                completed INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                warning INTEGER NOT NULL DEFAULT 0,
                status_code INTEGER NOT NULL DEFAULT -1,
                error_comment TEXT,
                queue_msg_fk INTEGER UNIQUE REFERENCES queue_msg(pk) ON DELETE SET NULL,
                CHECK (remaining >= -1 AND completed >= 0 AND failed >= 0 AND warning >= 0),
                CHECK (status_code BETWEEN -1 AND 65535),
                CHECK (updated_time >= created_time)
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create retrieve_task table: {}",
                e
            )))
        })?;

        for (name, column) in RETRIEVE_TASK_INDEXES {
            sqlx::query(&format!(
                "CREATE INDEX {} ON retrieve_task({})",
                name, column
            ))
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to create index {}: {}",
                    name, e
                )))
            })?;
        }

        Ok(())
    }

    /// Record an applied migration version
    async fn record_migration(conn: &mut SqliteConnection, version: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Close the database connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
