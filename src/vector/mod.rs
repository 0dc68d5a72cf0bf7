//! Vector Index: KNN over the embedding cache, either an in-process
//! brute-force scanner or an ANN-indexed backend (HNSW over a native
//! vector column). `is_native() = false` must produce exact results;
//! `is_native() = true` only needs the 90%-overlap consistency contract.

use async_trait::async_trait;
use chrono::Utc;

use crate::error::Result;
use crate::storage::Store;
use crate::types::DistanceMetric;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredId {
    pub id: String,
    pub distance: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn create_index(&self, dimensions: usize, metric: DistanceMetric) -> Result<()>;
    async fn insert(&self, id: &str, vector: &[f32]) -> Result<()>;
    async fn insert_batch(&self, ids: &[String], vectors: &[Vec<f32>]) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
    /// Ordered by distance ascending (closest first).
    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<ScoredId>>;
    async fn count(&self) -> Result<u64>;
    fn is_native(&self) -> bool;
}

fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
        DistanceMetric::L2 => euclidean(a, b),
        DistanceMetric::Dot => -dot(a, b),
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        0.0
    } else {
        dot(a, b) / denom
    }
}

fn norm(a: &[f32]) -> f32 {
    a.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

/// Brute-force scanner over the embedded backend's single `embeddings`
/// table: `O(n · d)` per query, always exact.
pub struct ExactScanIndex {
    store: Store,
    model_id: String,
    metric: DistanceMetric,
}

impl ExactScanIndex {
    pub fn new(store: Store, model_id: impl Into<String>, metric: DistanceMetric) -> Self {
        Self {
            store,
            model_id: model_id.into(),
            metric,
        }
    }
}

#[async_trait]
impl VectorIndex for ExactScanIndex {
    async fn create_index(&self, _dimensions: usize, _metric: DistanceMetric) -> Result<()> {
        Ok(())
    }

    async fn insert(&self, _id: &str, _vector: &[f32]) -> Result<()> {
        // Vectors are already persisted by the embedding cache; the exact
        // scanner reads directly from it and needs no separate index.
        Ok(())
    }

    async fn insert_batch(&self, _ids: &[String], _vectors: &[Vec<f32>]) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<ScoredId>> {
        let Store::Embedded(s) = &self.store else {
            return Ok(Vec::new());
        };
        let dialect = self.store.dialect();
        let sql = format!("SELECT chunk_hash, vector FROM embeddings WHERE model_id = {}", dialect.placeholder(1));
        let model_id = self.model_id.clone();
        let metric = self.metric;
        let query_vector = query_vector.to_vec();
        s.query(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([&model_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?;
            let mut scored = Vec::new();
            for row in rows {
                let (hash, vector_json) = row?;
                if let Ok(vector) = serde_json::from_str::<Vec<f32>>(&vector_json) {
                    scored.push(ScoredId {
                        id: hash,
                        distance: distance(metric, &query_vector, &vector),
                    });
                }
            }
            scored.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(k);
            Ok(scored)
        })
        .await
    }

    async fn count(&self) -> Result<u64> {
        let Store::Embedded(s) = &self.store else {
            return Ok(0);
        };
        let dialect = self.store.dialect();
        let sql = format!("SELECT count(*) FROM embeddings WHERE model_id = {}", dialect.placeholder(1));
        let model_id = self.model_id.clone();
        s.query(move |conn| Ok(conn.query_row(&sql, [&model_id], |r| r.get::<_, i64>(0))? as u64))
            .await
    }

    fn is_native(&self) -> bool {
        false
    }
}

/// HNSW index maintained by the server backend's native vector column.
/// Build parameters default to `m = 16`, `ef_construction = 64`; query-time
/// `ef_search` is adjustable.
pub struct AnnNativeIndex {
    store: Store,
    model_id: String,
    dimensions: usize,
    metric: DistanceMetric,
    ef_search: u32,
}

impl AnnNativeIndex {
    pub fn new(
        store: Store,
        model_id: impl Into<String>,
        dimensions: usize,
        metric: DistanceMetric,
    ) -> Self {
        Self {
            store,
            model_id: model_id.into(),
            dimensions,
            metric,
            ef_search: 40,
        }
    }

    pub fn with_ef_search(mut self, ef_search: u32) -> Self {
        self.ef_search = ef_search;
        self
    }

    fn operator(&self) -> &'static str {
        match self.metric {
            DistanceMetric::Cosine => "<=>",
            DistanceMetric::L2 => "<->",
            DistanceMetric::Dot => "<#>",
        }
    }
}

#[async_trait]
impl VectorIndex for AnnNativeIndex {
    async fn create_index(&self, dimensions: usize, _metric: DistanceMetric) -> Result<()> {
        let Store::Server(s) = &self.store else {
            return Ok(());
        };
        s.ensure_embeddings_table(dimensions).await?;
        Ok(())
    }

    async fn insert(&self, id: &str, vector: &[f32]) -> Result<()> {
        self.insert_batch(&[id.to_string()], &[vector.to_vec()]).await
    }

    async fn insert_batch(&self, ids: &[String], vectors: &[Vec<f32>]) -> Result<()> {
        let Store::Server(s) = &self.store else {
            return Ok(());
        };
        let table = s.ensure_embeddings_table(self.dimensions).await?;
        let dialect = self.store.dialect();
        let sql = dialect.upsert_template(&table, &["chunk_hash", "model_id", "vector", "created_at"], &["chunk_hash"], &[]);
        for (id, vector) in ids.iter().zip(vectors) {
            sqlx::query(&sql)
                .bind(id)
                .bind(&self.model_id)
                .bind(pgvector::Vector::from(vector.clone()))
                .bind(Utc::now())
                .execute(s.pool())
                .await?;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let Store::Server(s) = &self.store else {
            return Ok(());
        };
        let table = s.ensure_embeddings_table(self.dimensions).await?;
        let dialect = self.store.dialect();
        let sql = format!("DELETE FROM {table} WHERE chunk_hash = {}", dialect.placeholder(1));
        sqlx::query(&sql).bind(id).execute(s.pool()).await?;
        Ok(())
    }

    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<ScoredId>> {
        let Store::Server(s) = &self.store else {
            return Ok(Vec::new());
        };
        let table = s.ensure_embeddings_table(self.dimensions).await?;
        sqlx::query(&format!("SET LOCAL hnsw.ef_search = {}", self.ef_search))
            .execute(s.pool())
            .await
            .ok();
        let dialect = self.store.dialect();
        let op = self.operator();
        let (p1, p2, p3) = (dialect.placeholder(1), dialect.placeholder(2), dialect.placeholder(3));
        let sql = format!(
            "SELECT chunk_hash, vector {op} {p1} AS distance FROM {table} \
             WHERE model_id = {p2} ORDER BY vector {op} {p1} LIMIT {p3}"
        );
        let rows: Vec<(String, f32)> = sqlx::query_as(&sql)
            .bind(pgvector::Vector::from(query_vector.to_vec()))
            .bind(&self.model_id)
            .bind(k as i64)
            .fetch_all(s.pool())
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, distance)| ScoredId { id, distance })
            .collect())
    }

    async fn count(&self) -> Result<u64> {
        let Store::Server(s) = &self.store else {
            return Ok(0);
        };
        let table = s.ensure_embeddings_table(self.dimensions).await?;
        let dialect = self.store.dialect();
        let sql = format!("SELECT count(*) FROM {table} WHERE model_id = {}", dialect.placeholder(1));
        let (count,): (i64,) = sqlx::query_as(&sql).bind(&self.model_id).fetch_one(s.pool()).await?;
        Ok(count as u64)
    }

    fn is_native(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn euclidean_distance_of_identical_vectors_is_zero() {
        let a = vec![1.0, 2.0, 3.0];
        assert_eq!(euclidean(&a, &a), 0.0);
    }

    #[test]
    fn cosine_distance_increases_as_vectors_diverge() {
        let a = vec![1.0, 0.0];
        let close = vec![0.9, 0.1];
        let far = vec![0.0, 1.0];
        assert!(distance(DistanceMetric::Cosine, &a, &close) < distance(DistanceMetric::Cosine, &a, &far));
    }
}
