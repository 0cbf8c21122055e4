//! PostGIS storage layer.
//!
//! [`Storage`] wraps an `sqlx` connection pool for the parcel store: schema
//! migrations on connect, batched bulk loading (flat upsert and JSONB
//! aggregation), and the append-only collection log.
//!
//! The ingestion pipeline is the sole writer; serving layers read the same
//! tables through their own connections.

mod migrations;
pub mod loader;

use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use parcelpipe_shared::{CollectionStatus, LoadMode, NormalizedRow, PipelineError, Result, TableSpec};

pub use loader::{LoadOutcome, MergeMode, merge_elements};

/// Primary storage handle wrapping a Postgres/PostGIS pool.
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    /// Connect to the database and apply pending migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(url)
            .await
            .map_err(|e| PipelineError::Storage(format!("connect failed: {e}")))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Access the underlying pool (used by read-side consumers).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                sqlx::raw_sql(migration.sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| {
                        PipelineError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn schema_version(&self) -> i32 {
        let result: std::result::Result<Option<i32>, _> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await;
        match result {
            Ok(Some(v)) => v,
            _ => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Bulk loading
    // -----------------------------------------------------------------------

    /// Load normalized rows into the spec's target table.
    pub async fn bulk_load(
        &self,
        spec: &TableSpec,
        rows: &[NormalizedRow],
        mode: LoadMode,
    ) -> Result<LoadOutcome> {
        loader::bulk_load(&self.pool, spec, rows, mode).await
    }

    // -----------------------------------------------------------------------
    // Collection log
    // -----------------------------------------------------------------------

    /// Open a collection-log row for one (source, file) invocation.
    /// Returns the generated log id.
    pub async fn insert_collection_log(&self, source: &str, file_name: &str) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        sqlx::query(
            "INSERT INTO collection_logs (id, source, file_name, status, started_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&id)
        .bind(source)
        .bind(file_name)
        .bind(CollectionStatus::Processing.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Finalize a collection-log row. Rows are never mutated afterwards.
    pub async fn finalize_collection_log(
        &self,
        id: &str,
        status: CollectionStatus,
        record_count: i64,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE collection_logs
             SET status = $1, record_count = $2, error = $3, finished_at = $4
             WHERE id = $5",
        )
        .bind(status.as_str())
        .bind(record_count)
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::Storage(e.to_string()))?;
        Ok(())
    }
}
