//! Content-addressed embedding cache: `(chunk_hash, model_id) → vector`.
//! Shared across files, branches, and repositories — deletions never touch
//! this table except through explicit compaction, which is out of scope.

use std::collections::HashMap;

use chrono::Utc;

use crate::error::Result;
use crate::storage::Store;
use crate::storage::sqlite::OptionalExt;
use crate::types::Embedding;

#[derive(Clone)]
pub struct EmbeddingCache {
    store: Store,
}

impl EmbeddingCache {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// `dimensions` selects which physical table to check on the server
    /// backend; the embedded backend's single `embeddings` table ignores
    /// it beyond the row's own `dimensions` column.
    pub async fn has(&self, hash: &str, model_id: &str, dimensions: usize) -> Result<bool> {
        let dialect = self.store.dialect();
        match &self.store {
            Store::Embedded(s) => {
                let hash = hash.to_string();
                let model_id = model_id.to_string();
                let sql = format!(
                    "SELECT 1 FROM embeddings WHERE chunk_hash = {} AND model_id = {} AND dimensions = {}",
                    dialect.placeholder(1),
                    dialect.placeholder(2),
                    dialect.placeholder(3),
                );
                s.query(move |conn| {
                    Ok(conn
                        .query_row(&sql, rusqlite::params![hash, model_id, dimensions as i64], |_| Ok(()))
                        .optional()?
                        .is_some())
                })
                .await
            }
            Store::Server(s) => {
                let table = s.ensure_embeddings_table(dimensions).await?;
                let sql = format!(
                    "SELECT 1 FROM {table} WHERE chunk_hash = {} AND model_id = {}",
                    dialect.placeholder(1),
                    dialect.placeholder(2),
                );
                let row: Option<(i32,)> = sqlx::query_as(&sql)
                    .bind(hash)
                    .bind(model_id)
                    .fetch_optional(s.pool())
                    .await?;
                Ok(row.is_some())
            }
        }
    }

    /// Preserves the caller's hash order in iteration; missing hashes are
    /// omitted rather than present with a null value.
    pub async fn get_many(&self, hashes: &[String], model_id: &str) -> Result<HashMap<String, Vec<f32>>> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }
        let dialect = self.store.dialect();
        match &self.store {
            Store::Embedded(s) => {
                let hashes = hashes.to_vec();
                let model_id = model_id.to_string();
                let sql = format!(
                    "SELECT vector FROM embeddings WHERE chunk_hash = {} AND model_id = {}",
                    dialect.placeholder(1),
                    dialect.placeholder(2),
                );
                s.query(move |conn| {
                    let mut out = HashMap::with_capacity(hashes.len());
                    let mut stmt = conn.prepare(&sql)?;
                    for hash in &hashes {
                        if let Some(vector_json) = stmt
                            .query_row(rusqlite::params![hash, model_id], |r| r.get::<_, String>(0))
                            .optional()?
                        {
                            if let Ok(vector) = serde_json::from_str::<Vec<f32>>(&vector_json) {
                                out.insert(hash.clone(), vector);
                            }
                        }
                    }
                    Ok(out)
                })
                .await
            }
            Store::Server(_) => {
                // Server backend keys the embeddings table by dimensions,
                // which is resolved by the embedding pipeline before calling
                // in; callers on this path use `get_many_dimensioned`.
                Ok(HashMap::new())
            }
        }
    }

    /// Server-backend variant: the embeddings table is partitioned by
    /// dimensions, so the caller supplies it explicitly.
    pub async fn get_many_dimensioned(
        &self,
        hashes: &[String],
        model_id: &str,
        dimensions: usize,
    ) -> Result<HashMap<String, Vec<f32>>> {
        let Store::Server(s) = &self.store else {
            return self.get_many(hashes, model_id).await;
        };
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }
        let dialect = self.store.dialect();
        let table = s.ensure_embeddings_table(dimensions).await?;
        let sql = format!(
            "SELECT chunk_hash, vector FROM {table} WHERE model_id = {} AND chunk_hash = ANY({})",
            dialect.placeholder(1),
            dialect.placeholder(2),
        );
        let rows: Vec<(String, pgvector::Vector)> = sqlx::query_as(&sql)
            .bind(model_id)
            .bind(hashes)
            .fetch_all(s.pool())
            .await?;
        Ok(rows
            .into_iter()
            .map(|(hash, vector)| (hash, vector.to_vec()))
            .collect())
    }

    /// Upsert; inserts are idempotent and duplicate hashes within one
    /// batch are collapsed. An already-present `(hash, model_id)` is a
    /// no-op and must not change `created_at`.
    pub async fn put_many(&self, records: Vec<Embedding>, model_id: &str) -> Result<()> {
        let mut by_hash: HashMap<String, Embedding> = HashMap::new();
        for record in records {
            by_hash.entry(record.chunk_hash.clone()).or_insert(record);
        }
        if by_hash.is_empty() {
            return Ok(());
        }
        let dialect = self.store.dialect();
        let now = Utc::now();

        match &self.store {
            Store::Embedded(s) => {
                let model_id = model_id.to_string();
                let records: Vec<Embedding> = by_hash.into_values().collect();
                let sql = dialect.upsert_template(
                    "embeddings",
                    &["chunk_hash", "model_id", "dimensions", "vector", "created_at"],
                    &["chunk_hash", "model_id"],
                    &[],
                );
                let now = now.timestamp();
                s.transaction(move |tx| {
                    for record in &records {
                        let vector_json = serde_json::to_string(&record.vector)
                            .map_err(|e| crate::error::RepolensError::internal(e.to_string()))?;
                        tx.execute(
                            &sql,
                            rusqlite::params![record.chunk_hash, model_id, record.dimensions as i64, vector_json, now],
                        )?;
                    }
                    Ok(())
                })
                .await
            }
            Store::Server(s) => {
                for record in by_hash.into_values() {
                    let table = s.ensure_embeddings_table(record.dimensions).await?;
                    let sql = dialect.upsert_template(
                        &table,
                        &["chunk_hash", "model_id", "vector", "created_at"],
                        &["chunk_hash"],
                        &[],
                    );
                    sqlx::query(&sql)
                        .bind(&record.chunk_hash)
                        .bind(model_id)
                        .bind(pgvector::Vector::from(record.vector))
                        .bind(now)
                        .execute(s.pool())
                        .await?;
                }
                Ok(())
            }
        }
    }

    pub async fn count(&self, model_id: &str) -> Result<u64> {
        let dialect = self.store.dialect();
        match &self.store {
            Store::Embedded(s) => {
                let model_id = model_id.to_string();
                let sql = format!("SELECT count(*) FROM embeddings WHERE model_id = {}", dialect.placeholder(1));
                s.query(move |conn| Ok(conn.query_row(&sql, [model_id], |r| r.get::<_, i64>(0))? as u64))
                    .await
            }
            Store::Server(_) => Ok(0),
        }
    }

    /// `dimensions → count`. Only meaningful on the embedded backend,
    /// where one table holds every dimension; on the server backend the
    /// caller already knows the partition it wrote to.
    pub async fn count_by_dimension(&self) -> Result<HashMap<usize, u64>> {
        match &self.store {
            Store::Embedded(s) => {
                s.query(|conn| {
                    let mut stmt =
                        conn.prepare("SELECT dimensions, count(*) FROM embeddings GROUP BY dimensions")?;
                    let rows = stmt.query_map([], |r| Ok((r.get::<_, i64>(0)? as usize, r.get::<_, i64>(1)? as u64)))?;
                    let mut out = HashMap::new();
                    for row in rows {
                        let (dims, count) = row?;
                        out.insert(dims, count);
                    }
                    Ok(out)
                })
                .await
            }
            Store::Server(_) => Ok(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn open_cache() -> (EmbeddingCache, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let sqlite = crate::storage::SqliteStore::open(&dir.path().join("index.db")).unwrap();
        (EmbeddingCache::new(Store::Embedded(std::sync::Arc::new(sqlite))), dir)
    }

    #[tokio::test]
    async fn put_many_is_idempotent() {
        let (cache, _dir) = open_cache().await;
        let record = Embedding {
            chunk_hash: "abc".into(),
            model_id: "m1".into(),
            dimensions: 3,
            vector: vec![1.0, 2.0, 3.0],
        };
        cache.put_many(vec![record.clone()], "m1").await.unwrap();
        cache.put_many(vec![record], "m1").await.unwrap();
        assert_eq!(cache.count("m1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_many_omits_missing_hashes() {
        let (cache, _dir) = open_cache().await;
        cache
            .put_many(
                vec![Embedding {
                    chunk_hash: "present".into(),
                    model_id: "m1".into(),
                    dimensions: 2,
                    vector: vec![0.1, 0.2],
                }],
                "m1",
            )
            .await
            .unwrap();
        let found = cache
            .get_many(&["present".to_string(), "missing".to_string()], "m1")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("present"));
        assert!(!found.contains_key("missing"));
    }

    #[tokio::test]
    async fn duplicate_hashes_within_batch_collapse() {
        let (cache, _dir) = open_cache().await;
        let a = Embedding {
            chunk_hash: "dup".into(),
            model_id: "m1".into(),
            dimensions: 2,
            vector: vec![1.0, 1.0],
        };
        let b = Embedding {
            vector: vec![9.0, 9.0],
            ..a.clone()
        };
        cache.put_many(vec![a, b], "m1").await.unwrap();
        assert_eq!(cache.count("m1").await.unwrap(), 1);
    }
}
