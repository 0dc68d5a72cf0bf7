//! Indexer Facade: drives one `index()` pass end to end — Merkle diff,
//! location teardown for changed files, chunking, the embedding pipeline,
//! and snapshot persistence — under the advisory per-repo lock.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use serde::Serialize;

use crate::cache::EmbeddingCache;
use crate::catalog::Catalog;
use crate::chunking;
use crate::chunking::ChunkingConfig;
use crate::error::Result;
use crate::indexing::lock::IndexLockGuard;
use crate::location::LocationStore;
use crate::merkle;
use crate::pipeline::EmbeddingPipeline;
use crate::pipeline::PipelineConfig;
use crate::storage::Store;
use crate::traits::Embedder;
use crate::traits::NoopProgress;
use crate::traits::ProgressCallback;
use crate::types::Chunk;

/// Files are chunked and handed to the pipeline in batches of this many
/// files at a time, bounding peak memory on large changesets.
const FILE_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Full,
    Incremental,
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub files_processed: u64,
    pub files_deleted: u64,
    pub chunks_created: u64,
    pub cache_hits: u64,
    pub chunks_embedded: u64,
    pub change_type: ChangeType,
    pub duration_ms: u64,
}

/// Aggregate view used by the `get_file`/`hybrid_search` protocol
/// operations to decide whether an index exists at all.
#[derive(Debug, Clone, Serialize)]
pub struct RepoStats {
    pub total_locations: u64,
    pub file_count: u64,
    pub embeddings_cached: u64,
    pub model_id: Option<String>,
    pub dimensions: Option<usize>,
}

pub struct Indexer {
    store: Store,
    embedder: Arc<dyn Embedder>,
    chunking_config: ChunkingConfig,
    pipeline_config: PipelineConfig,
    tool_dir_name: String,
    lock_timeout: Duration,
}

impl Indexer {
    pub fn new(
        store: Store,
        embedder: Arc<dyn Embedder>,
        chunking_config: ChunkingConfig,
        pipeline_config: PipelineConfig,
        tool_dir_name: impl Into<String>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            store,
            embedder,
            chunking_config,
            pipeline_config,
            tool_dir_name: tool_dir_name.into(),
            lock_timeout,
        }
    }

    fn tool_dir(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(&self.tool_dir_name)
    }

    fn merkle_path(&self, repo_root: &Path) -> PathBuf {
        self.tool_dir(repo_root).join("merkle.bin")
    }

    fn lock_path(&self, repo_root: &Path) -> PathBuf {
        self.tool_dir(repo_root).join("index.lock")
    }

    /// Builds a fresh snapshot, diffs it against the previous one (or
    /// treats every file as changed when `force` is set), tears down and
    /// rebuilds locations for the affected files, and persists the new
    /// snapshot. Fails fast with `IndexInProgress` if another run holds the
    /// repo's advisory lock.
    pub async fn index(&self, repo_root: &Path, force: bool) -> Result<IndexStats> {
        self.index_with_progress(repo_root, force, &NoopProgress).await
    }

    pub async fn index_with_progress(
        &self,
        repo_root: &Path,
        force: bool,
        progress: &dyn ProgressCallback,
    ) -> Result<IndexStats> {
        let started = Instant::now();
        let repo_root_str = repo_root.to_string_lossy().into_owned();

        let guard = IndexLockGuard::try_acquire(
            self.store.clone(),
            &repo_root_str,
            self.lock_path(repo_root),
            self.lock_timeout,
        )
        .await?;

        let result = self.index_locked(repo_root, &repo_root_str, force, progress).await;
        guard.release().await?;

        let mut stats = result?;
        stats.duration_ms = started.elapsed().as_millis() as u64;
        Ok(stats)
    }

    async fn index_locked(
        &self,
        repo_root: &Path,
        repo_root_str: &str,
        force: bool,
        progress: &dyn ProgressCallback,
    ) -> Result<IndexStats> {
        // Step 1: build the new snapshot.
        let report = merkle::build(repo_root, &self.tool_dir_name)?;
        let new_snapshot = report
            .snapshot
            .ok_or_else(|| crate::error::RepolensError::internal("merkle build produced no snapshot"))?;
        if !report.skipped.is_empty() {
            tracing::warn!(count = report.skipped.len(), "files skipped during snapshot build");
        }

        // Step 2: diff against the previous snapshot (force treats every
        // file as modified).
        let previous = merkle::load(&self.merkle_path(repo_root))?;
        let (changes, change_type) = match previous {
            Some(ref old) if !force => {
                let changes = merkle::diff(old, &new_snapshot);
                if changes.is_empty() {
                    (changes, ChangeType::None)
                } else {
                    (changes, ChangeType::Incremental)
                }
            }
            _ => {
                let mut all_files = Vec::new();
                collect_file_paths(&new_snapshot.root, &mut all_files);
                (
                    merkle::ChangeSet {
                        added: all_files,
                        modified: Vec::new(),
                        deleted: Vec::new(),
                    },
                    ChangeType::Full,
                )
            }
        };

        if changes.is_empty() {
            return Ok(IndexStats {
                files_processed: 0,
                files_deleted: 0,
                chunks_created: 0,
                cache_hits: 0,
                chunks_embedded: 0,
                change_type,
                duration_ms: 0,
            });
        }

        let store = self.store.clone();
        let locations = LocationStore::new(store.clone());
        let catalog = Catalog::new(store.clone());
        let cache = EmbeddingCache::new(store.clone());

        // Step 3: tear down locations for every deleted or modified file.
        for path in changes.deleted.iter().chain(changes.modified.iter()) {
            locations.delete_by_path(repo_root_str, path).await?;
        }

        // Step 4/5: chunk and embed added/modified files in batches.
        let to_process: Vec<&String> = changes.added.iter().chain(changes.modified.iter()).collect();
        let mut chunks_created = 0u64;
        let mut cache_hits = 0u64;
        let mut chunks_embedded = 0u64;
        let pipeline = EmbeddingPipeline::new(
            cache.clone(),
            locations.clone(),
            catalog.clone(),
            self.embedder.clone(),
            self.pipeline_config,
        );

        let total_files = to_process.len();
        for (batch_index, file_batch) in to_process.chunks(FILE_BATCH_SIZE).enumerate() {
            let mut batch_chunks: Vec<Chunk> = Vec::new();
            for rel_path in file_batch {
                let abs_path = repo_root.join(rel_path);
                let bytes = match std::fs::read(&abs_path) {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::warn!(path = %abs_path.display(), error = %e, "skipping unreadable file");
                        continue;
                    }
                };
                let Ok(source) = String::from_utf8(bytes) else {
                    continue;
                };
                match chunking::chunk(Path::new(rel_path.as_str()), &source, &self.chunking_config) {
                    Ok(chunks) => batch_chunks.extend(chunks),
                    Err(e) => {
                        tracing::warn!(path = %rel_path, error = %e, "chunking failed, skipping file");
                    }
                }
            }
            chunks_created += batch_chunks.len() as u64;

            let batch_stats = pipeline.run(repo_root_str, batch_chunks, progress).await?;
            cache_hits += batch_stats.cache_hits;
            chunks_embedded += batch_stats.chunks_embedded;
            progress.on_progress(batch_index + 1, total_files.div_ceil(FILE_BATCH_SIZE).max(1), None);
        }

        // Step 6: persist the new snapshot only after a successful pass.
        merkle::save(&new_snapshot, &self.merkle_path(repo_root))?;

        Ok(IndexStats {
            files_processed: to_process.len() as u64,
            files_deleted: changes.deleted.len() as u64,
            chunks_created,
            cache_hits,
            chunks_embedded,
            change_type,
            duration_ms: 0,
        })
    }

    pub async fn stats(&self, repo_root: &Path) -> Result<RepoStats> {
        let repo_root_str = repo_root.to_string_lossy().into_owned();
        let store = self.store.clone();
        let locations = LocationStore::new(store.clone());
        let catalog = Catalog::new(store.clone());
        let cache = EmbeddingCache::new(store);

        let location_stats = locations.stats(&repo_root_str).await?;
        let repo_config = catalog.get_repo_config(&repo_root_str).await?;
        let embeddings_cached = match &repo_config {
            Some(cfg) => cache.count(&cfg.model_id).await?,
            None => 0,
        };

        Ok(RepoStats {
            total_locations: location_stats.total_locations,
            file_count: location_stats.file_count,
            embeddings_cached,
            model_id: repo_config.as_ref().map(|c| c.model_id.clone()),
            dimensions: repo_config.as_ref().map(|c| c.dimensions),
        })
    }
}

fn collect_file_paths(node: &merkle::SnapshotNode, out: &mut Vec<String>) {
    if node.is_dir {
        for child in &node.children {
            collect_file_paths(child, out);
        }
    } else {
        out.push(node.path.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use crate::storage::SqliteStore;

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
        }
        async fn available(&self) -> bool {
            true
        }
        fn provider_id(&self) -> &str {
            "test-model"
        }
        fn dimensions(&self) -> usize {
            3
        }
    }

    fn setup_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        dir
    }

    fn make_indexer(dir: &Path, embedder: Arc<CountingEmbedder>) -> Indexer {
        let sqlite = SqliteStore::open(&dir.join(".repolens").join("index.db")).unwrap();
        let store = Store::Embedded(Arc::new(sqlite));
        Indexer::new(
            store,
            embedder,
            ChunkingConfig::default(),
            PipelineConfig::default(),
            ".repolens",
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn first_index_is_a_full_pass() {
        let dir = setup_repo();
        let embedder = Arc::new(CountingEmbedder { calls: AtomicUsize::new(0) });
        let indexer = make_indexer(dir.path(), embedder.clone());

        let stats = indexer.index(dir.path(), false).await.unwrap();
        assert_eq!(stats.change_type, ChangeType::Full);
        assert_eq!(stats.files_processed, 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reindex_with_no_changes_is_a_no_op() {
        let dir = setup_repo();
        let embedder = Arc::new(CountingEmbedder { calls: AtomicUsize::new(0) });
        let indexer = make_indexer(dir.path(), embedder.clone());

        indexer.index(dir.path(), false).await.unwrap();
        let stats = indexer.index(dir.path(), false).await.unwrap();
        assert_eq!(stats.change_type, ChangeType::None);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn modifying_one_file_only_reprocesses_that_file() {
        let dir = setup_repo();
        std::fs::write(dir.path().join("b.rs"), "fn b() {}\n").unwrap();
        let embedder = Arc::new(CountingEmbedder { calls: AtomicUsize::new(0) });
        let indexer = make_indexer(dir.path(), embedder.clone());
        indexer.index(dir.path(), false).await.unwrap();

        std::fs::write(dir.path().join("a.rs"), "fn a() { changed() }\n").unwrap();
        let stats = indexer.index(dir.path(), false).await.unwrap();
        assert_eq!(stats.change_type, ChangeType::Incremental);
        assert_eq!(stats.files_processed, 1);
    }

    #[tokio::test]
    async fn stats_reports_zero_before_any_index() {
        let dir = setup_repo();
        let embedder = Arc::new(CountingEmbedder { calls: AtomicUsize::new(0) });
        let indexer = make_indexer(dir.path(), embedder);
        let stats = indexer.stats(dir.path()).await.unwrap();
        assert_eq!(stats.total_locations, 0);
        assert!(stats.model_id.is_none());
    }
}
