//! SQLite-based run history store

use crate::core::state::ExecutionStatus;
use crate::persistence::{PersistenceBackend, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use uuid::Uuid;

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Create a new SQLite store
    pub async fn new(db_path: &str) -> Result<Self> {
        let url = if db_path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", db_path)
        };
        let pool = SqlitePool::connect(&url)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        let db_dir = data_dir.join("testcraft");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create '{}'", db_dir.display()))?;

        let db_path = db_dir.join("runs.db");
        let db_path = db_path
            .to_str()
            .context("Database path is not valid UTF-8")?;
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                workdir TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                total_plans INTEGER NOT NULL DEFAULT 0,
                completed_plans INTEGER NOT NULL DEFAULT 0,
                failed_plans INTEGER NOT NULL DEFAULT 0,
                results TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_started_at ON runs(started_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn parse_status(status: &str) -> ExecutionStatus {
        match status {
            "Running" => ExecutionStatus::Running,
            "Completed" => ExecutionStatus::Completed,
            "Failed" => ExecutionStatus::Failed,
            _ => ExecutionStatus::Pending,
        }
    }

    fn from_row(row: &SqliteRow) -> Result<RunSummary> {
        Ok(RunSummary {
            execution_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            run_id: row.get("run_id"),
            workdir: PathBuf::from(row.get::<String, _>("workdir")),
            status: Self::parse_status(&row.get::<String, _>("status")),
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            total_plans: row.get::<i64, _>("total_plans") as usize,
            completed_plans: row.get::<i64, _>("completed_plans") as usize,
            failed_plans: row.get::<i64, _>("failed_plans") as usize,
            results: row.get("results"),
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteRunStore {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, run_id, workdir, status, started_at, completed_at, total_plans, completed_plans, failed_plans, results)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(run.execution_id.to_string())
        .bind(&run.run_id)
        .bind(run.workdir.to_string_lossy().into_owned())
        .bind(format!("{:?}", run.status))
        .bind(Self::to_naive(run.started_at))
        .bind(run.completed_at.map(Self::to_naive))
        .bind(run.total_plans as i64)
        .bind(run.completed_plans as i64)
        .bind(run.failed_plans as i64)
        .bind(&run.results)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, execution_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?1")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query("SELECT * FROM runs ORDER BY started_at DESC LIMIT ?1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list runs")?;

        rows.iter().map(Self::from_row).collect()
    }
}
