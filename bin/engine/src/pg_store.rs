//! Postgres-backed run store.

use async_trait::async_trait;
use autoflow_core::{Result, WorkflowRunId};
use autoflow_workflow::{RunExecutionRecord, RunStore, StoreError};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend {
        details: e.to_string(),
    }
}

/// Stores run records in the `workflow_runs` table.
#[derive(Debug, Clone)]
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    /// Creates a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and applies pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable or a migration fails.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(backend)?;

        tracing::info!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(backend)?;

        Ok(Self::new(pool))
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn create_run(&self, record: &RunExecutionRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_runs
                (id, workflow_id, workflow_version, status, started_at, ended_at, record)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.run_id.to_string())
        .bind(record.workflow_id.to_string())
        .bind(i64::from(record.workflow_version))
        .bind(record.status.as_str())
        .bind(record.started_at)
        .bind(record.ended_at)
        .bind(Json(record))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RunExists {
                run_id: record.run_id,
            }
            .into());
        }
        Ok(())
    }

    async fn seal_run(&self, record: &RunExecutionRecord) -> Result<(), StoreError> {
        let run_id = record.run_id;
        if !record.is_terminal() {
            return Err(StoreError::NotTerminal { run_id }.into());
        }

        let result = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = $2, ended_at = $3, record = $4, sealed = TRUE
            WHERE id = $1 AND NOT sealed
            "#,
        )
        .bind(run_id.to_string())
        .bind(record.status.as_str())
        .bind(record.ended_at)
        .bind(Json(record))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let exists: Option<(bool,)> =
            sqlx::query_as("SELECT sealed FROM workflow_runs WHERE id = $1")
                .bind(run_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        match exists {
            Some(_) => Err(StoreError::AlreadySealed { run_id }.into()),
            None => Err(StoreError::RunNotFound { run_id }.into()),
        }
    }

    async fn get_run(&self, run_id: WorkflowRunId) -> Result<RunExecutionRecord, StoreError> {
        let row: Option<(Json<RunExecutionRecord>,)> =
            sqlx::query_as("SELECT record FROM workflow_runs WHERE id = $1")
                .bind(run_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

        let (Json(record),) = row.ok_or(StoreError::RunNotFound { run_id })?;
        Ok(record)
    }
}
