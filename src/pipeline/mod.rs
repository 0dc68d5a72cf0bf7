//! Embedding Pipeline: chunk dedup → cache lookup → batched embed calls →
//! cache/location upsert, plus the dimension-change policy that keeps a
//! repo's active model consistent with its stored locations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::cache::EmbeddingCache;
use crate::catalog::Catalog;
use crate::error::RepolensError;
use crate::error::Result;
use crate::location::LocationStore;
use crate::traits::Embedder;
use crate::traits::ProgressCallback;
use crate::types::Chunk;
use crate::types::Embedding;
use crate::types::Location;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub max_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            max_workers: 4,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(RepolensError::ConfigError {
                field: "batch_size".into(),
                cause: "must be positive".into(),
            });
        }
        if self.max_workers == 0 {
            return Err(RepolensError::ConfigError {
                field: "max_workers".into(),
                cause: "must be positive".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct PipelineStats {
    pub chunks_seen: u64,
    pub cache_hits: u64,
    pub chunks_embedded: u64,
    pub chunks_failed: u64,
}

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(250);
const RETRY_CAP: Duration = Duration::from_secs(4);

pub struct EmbeddingPipeline {
    cache: EmbeddingCache,
    locations: LocationStore,
    catalog: Catalog,
    embedder: Arc<dyn Embedder>,
    config: PipelineConfig,
}

impl EmbeddingPipeline {
    pub fn new(
        cache: EmbeddingCache,
        locations: LocationStore,
        catalog: Catalog,
        embedder: Arc<dyn Embedder>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            cache,
            locations,
            catalog,
            embedder,
            config,
        }
    }

    /// Runs the five-step pipeline against `chunks` for `repo_root`,
    /// reporting progress at least once per completed batch. Fails fast
    /// with `EmbedderUnavailable` if the embedder reports unavailable
    /// before the first call is made.
    pub async fn run(
        &self,
        repo_root: &str,
        chunks: Vec<Chunk>,
        progress: &dyn ProgressCallback,
    ) -> Result<PipelineStats> {
        let mut stats = PipelineStats::default();
        if chunks.is_empty() {
            progress.on_progress(0, 0, None);
            return Ok(stats);
        }

        self.apply_dimension_change_policy(repo_root).await?;

        let model_id = self.embedder.provider_id().to_string();
        let dimensions = self.embedder.dimensions();

        // Step 1: dedupe by hash within this batch, keep one representative
        // chunk but every location deriving from the hash.
        let mut by_hash: HashMap<String, Chunk> = HashMap::new();
        let mut locations_by_hash: HashMap<String, Vec<Chunk>> = HashMap::new();
        for chunk in chunks {
            let hash = chunk.hash();
            locations_by_hash.entry(hash.clone()).or_default().push(chunk.clone());
            by_hash.entry(hash).or_insert(chunk);
        }
        stats.chunks_seen = by_hash.len() as u64;

        // Step 2: partition into cache hit / miss.
        let hashes: Vec<String> = by_hash.keys().cloned().collect();
        let cached = self.cache.get_many_dimensioned(&hashes, &model_id, dimensions).await?;
        let miss_hashes: Vec<String> = hashes.iter().filter(|h| !cached.contains_key(*h)).cloned().collect();
        stats.cache_hits = (hashes.len() - miss_hashes.len()) as u64;

        if !miss_hashes.is_empty() && !self.embedder.available().await {
            return Err(RepolensError::EmbedderUnavailable {
                provider: self.embedder.provider_id().to_string(),
            });
        }

        // Step 3: batched embed calls for the miss set, fanned out up to
        // `max_workers` concurrent requests.
        let total_batches = miss_hashes.len().div_ceil(self.config.batch_size).max(1);
        if miss_hashes.is_empty() {
            progress.on_progress(total_batches, total_batches, None);
        } else {
            let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.max_workers));
            let mut join_set = tokio::task::JoinSet::new();
            for (batch_index, batch_hashes) in miss_hashes.chunks(self.config.batch_size).enumerate() {
                let batch_hashes = batch_hashes.to_vec();
                let texts: Vec<String> = batch_hashes.iter().map(|h| by_hash[h].content.clone()).collect();
                let embedder = self.embedder.clone();
                let semaphore = semaphore.clone();
                join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.expect("embedding semaphore closed");
                    let result = embed_with_retry(embedder.as_ref(), &texts).await;
                    (batch_index, batch_hashes, result)
                });
            }

            let mut completed = 0usize;
            while let Some(joined) = join_set.join_next().await {
                let (batch_index, batch_hashes, result) =
                    joined.map_err(|e| RepolensError::internal(format!("embedding task panicked: {e}")))?;
                match result {
                    Ok(vectors) => {
                        let records: Vec<Embedding> = batch_hashes
                            .iter()
                            .zip(vectors)
                            .map(|(hash, vector)| Embedding {
                                chunk_hash: hash.clone(),
                                model_id: model_id.clone(),
                                dimensions,
                                vector,
                            })
                            .collect();
                        // Step 4: upsert new embeddings into the cache.
                        self.cache.put_many(records, &model_id).await?;
                        stats.chunks_embedded += batch_hashes.len() as u64;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, batch = batch_index, "embedding batch failed permanently, skipping");
                        for hash in &batch_hashes {
                            locations_by_hash.remove(hash);
                        }
                        stats.chunks_failed += batch_hashes.len() as u64;
                    }
                }
                completed += 1;
                progress.on_progress(completed, total_batches, None);
            }
        }

        // Step 5: upsert every surviving chunk's location (hits and misses).
        let mut locations = Vec::new();
        for chunks_for_hash in locations_by_hash.values() {
            for chunk in chunks_for_hash {
                locations.push(Location {
                    repo_root: repo_root.to_string(),
                    path: chunk.path.clone(),
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    chunk_hash: chunk.hash(),
                    node_type: chunk.node_type,
                    node_name: chunk.node_name.clone(),
                    language: chunk.language.clone(),
                    indexed_at: 0,
                });
            }
        }
        self.locations.upsert_many(repo_root, locations).await?;

        progress.on_progress(total_batches, total_batches, None);
        Ok(stats)
    }

    /// Compares the embedder's declared dimensions to the repo's stored
    /// config; on mismatch, atomically deletes the old-dimension locations
    /// and updates the repo config. Embeddings at the old dimension are
    /// left untouched in the shared cache.
    async fn apply_dimension_change_policy(&self, repo_root: &str) -> Result<()> {
        let current = self.catalog.get_repo_config(repo_root).await?;
        let new_dimensions = self.embedder.dimensions();
        let model_id = self.embedder.provider_id();

        match current {
            Some(cfg) if cfg.dimensions != new_dimensions || cfg.model_id != model_id => {
                self.locations.delete_for_repo_dimension(repo_root, cfg.dimensions).await?;
                self.catalog.set_repo_config(repo_root, model_id, new_dimensions).await?;
            }
            None => {
                self.catalog.set_repo_config(repo_root, model_id, new_dimensions).await?;
            }
            Some(_) => {}
        }
        Ok(())
    }
}

async fn embed_with_retry(embedder: &dyn Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let mut delay = RETRY_BASE;
    let mut last_err = None;
    for attempt in 0..RETRY_ATTEMPTS {
        match embedder.embed(texts).await {
            Ok(vectors) => return Ok(vectors),
            Err(e @ RepolensError::DimensionMismatch { .. }) => return Err(e),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "embed call failed, retrying");
                last_err = Some(e);
                if attempt + 1 < RETRY_ATTEMPTS {
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(RETRY_CAP);
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| RepolensError::internal("embed retry loop exited without error")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use crate::storage::SqliteStore;
    use crate::storage::Store;
    use crate::types::NodeType;

    struct CountingEmbedder {
        calls: AtomicUsize,
        dims: usize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![0.1; self.dims]).collect())
        }
        async fn available(&self) -> bool {
            true
        }
        fn provider_id(&self) -> &str {
            "test-model"
        }
        fn dimensions(&self) -> usize {
            self.dims
        }
    }

    fn chunk(path: &str, content: &str) -> Chunk {
        Chunk {
            path: path.into(),
            start_line: 1,
            end_line: 1,
            content: content.into(),
            node_type: NodeType::Function,
            node_name: Some("f".into()),
            language: "rust".into(),
        }
    }

    async fn setup() -> (EmbeddingPipeline, tempfile::TempDir, Arc<CountingEmbedder>) {
        let dir = tempfile::tempdir().unwrap();
        let sqlite = SqliteStore::open(&dir.path().join("index.db")).unwrap();
        let store = Store::Embedded(Arc::new(sqlite));
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            dims: 3,
        });
        let pipeline = EmbeddingPipeline::new(
            EmbeddingCache::new(store.clone()),
            LocationStore::new(store.clone()),
            Catalog::new(store),
            embedder.clone(),
            PipelineConfig::default(),
        );
        (pipeline, dir, embedder)
    }

    #[tokio::test]
    async fn second_run_with_same_chunks_is_all_cache_hits() {
        let (pipeline, _dir, embedder) = setup().await;
        let chunks = vec![chunk("a.rs", "fn a() {}")];
        pipeline.run("/repo", chunks.clone(), &crate::traits::NoopProgress).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

        let stats = pipeline.run("/repo", chunks, &crate::traits::NoopProgress).await.unwrap();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.chunks_embedded, 0);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_hashes_within_batch_embed_once() {
        let (pipeline, _dir, embedder) = setup().await;
        let chunks = vec![chunk("a.rs", "fn dup() {}"), chunk("b.rs", "fn dup() {}")];
        let stats = pipeline.run("/repo", chunks, &crate::traits::NoopProgress).await.unwrap();
        assert_eq!(stats.chunks_embedded, 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let (pipeline, _dir, embedder) = setup().await;
        let stats = pipeline.run("/repo", Vec::new(), &crate::traits::NoopProgress).await.unwrap();
        assert_eq!(stats.chunks_seen, 0);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }
}
