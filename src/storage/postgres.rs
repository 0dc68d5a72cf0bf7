//! Server-backed store: a connection-pooled Postgres database with
//! `pgvector` providing the native fixed-length vector column that enables
//! indexed (HNSW) KNN.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::Result;

pub struct PostgresStore {
    pool: PgPool,
}

/// Connection pool tuning, named directly after the spec's "configurable
/// max-open, max-idle, max-lifetime" requirement.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_open: u32,
    pub max_idle: u32,
    pub max_lifetime_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: 10,
            max_idle: 4,
            max_lifetime_secs: 30 * 60,
        }
    }
}

impl PostgresStore {
    pub async fn connect(dsn: &str, config: PoolConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_open)
            .min_connections(config.max_idle)
            .max_lifetime(std::time::Duration::from_secs(config.max_lifetime_secs))
            .connect(dsn)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS locations (
                repo_root TEXT NOT NULL,
                path TEXT NOT NULL,
                start_line BIGINT NOT NULL,
                end_line BIGINT NOT NULL,
                chunk_hash TEXT NOT NULL,
                node_type TEXT NOT NULL,
                node_name TEXT,
                language TEXT NOT NULL,
                indexed_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (repo_root, path, start_line, end_line)
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_locations_repo_path ON locations(repo_root, path)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_locations_hash ON locations(chunk_hash)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS symbols (
                repo_root TEXT NOT NULL,
                path TEXT NOT NULL,
                line BIGINT NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                language TEXT NOT NULL,
                scope TEXT,
                signature TEXT,
                PRIMARY KEY (repo_root, name, path, line)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS repo_config (
                repo_root TEXT PRIMARY KEY,
                model_id TEXT NOT NULL,
                dimensions BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS file_state (
                repo_root TEXT NOT NULL,
                path TEXT NOT NULL,
                mtime BIGINT NOT NULL,
                size BIGINT NOT NULL,
                indexed_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (repo_root, path)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS index_lock (
                repo_root TEXT PRIMARY KEY,
                holder_id TEXT NOT NULL,
                locked_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Ensures a dimension-partitioned embeddings table (`embeddings_768`,
    /// `embeddings_1024`, ...) exists, with a fixed-width `vector(dims)`
    /// column and an HNSW index over it so the column can carry a native
    /// ANN index.
    pub async fn ensure_embeddings_table(&self, dimensions: usize) -> Result<String> {
        let table = embeddings_table_name(dimensions);
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                chunk_hash TEXT PRIMARY KEY,
                model_id TEXT NOT NULL,
                vector vector({dimensions}) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"
        );
        sqlx::query(&create).execute(&self.pool).await?;
        let index = format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_hnsw ON {table} \
             USING hnsw (vector vector_cosine_ops) WITH (m = 16, ef_construction = 64)"
        );
        sqlx::query(&index).execute(&self.pool).await?;
        Ok(table)
    }

    pub async fn close(self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

pub fn embeddings_table_name(dimensions: usize) -> String {
    format!("embeddings_{dimensions}")
}
