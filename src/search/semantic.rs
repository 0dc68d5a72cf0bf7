//! Semantic Searcher: embed a query, run KNN through the Vector Index,
//! join through the Location Store, optionally hydrate snippets.

use std::sync::Arc;

use crate::error::Result;
use crate::location::LocationStore;
use crate::traits::Embedder;
use crate::traits::SnippetReader;
use crate::types::DistanceMetric;
use crate::types::ResultSource;
use crate::types::StreamResult;
use crate::vector::VectorIndex;

const SNIPPET_CHAR_LIMIT: usize = 500;

/// Oversampling factor applied to `k` before the vector index search, to
/// compensate for the hash → multi-location join potentially narrowing the
/// result set. Clamped to `[1, 3]`.
#[derive(Debug, Clone, Copy)]
pub struct Oversample(pub usize);

impl Default for Oversample {
    fn default() -> Self {
        Self(2)
    }
}

impl Oversample {
    fn factor(self) -> usize {
        self.0.clamp(1, 3)
    }
}

pub struct SemanticSearcher {
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<dyn VectorIndex>,
    locations: LocationStore,
    snippet_reader: Option<Arc<dyn SnippetReader>>,
    metric: DistanceMetric,
}

impl SemanticSearcher {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector_index: Arc<dyn VectorIndex>,
        locations: LocationStore,
        metric: DistanceMetric,
    ) -> Self {
        Self {
            embedder,
            vector_index,
            locations,
            snippet_reader: None,
            metric,
        }
    }

    pub fn with_snippet_reader(mut self, reader: Arc<dyn SnippetReader>) -> Self {
        self.snippet_reader = Some(reader);
        self
    }

    pub async fn available(&self) -> bool {
        self.embedder.available().await
    }

    fn score(&self, distance: f32) -> f32 {
        match self.metric {
            DistanceMetric::Cosine | DistanceMetric::Dot => 1.0 - distance,
            DistanceMetric::L2 => 1.0 / (1.0 + distance),
        }
    }

    /// Single-repo search. Returns an empty list, not an error, when no
    /// embedding exists for `query` in the current index.
    pub async fn search(&self, repo_root: &str, query: &str, k: usize, oversample: Oversample) -> Result<Vec<StreamResult>> {
        self.search_across(&[repo_root.to_string()], query, k, oversample).await
    }

    /// Cross-repo variant: joins through the location store over every repo
    /// in `repo_roots` and annotates each result's `metadata.repo_root`.
    pub async fn search_across(
        &self,
        repo_roots: &[String],
        query: &str,
        k: usize,
        oversample: Oversample,
    ) -> Result<Vec<StreamResult>> {
        let embeddings = self.embedder.embed(std::slice::from_ref(&query.to_string())).await?;
        let Some(query_vector) = embeddings.into_iter().next() else {
            return Ok(Vec::new());
        };

        let oversampled_k = k * oversample.factor();
        let scored_ids = self.vector_index.search(&query_vector, oversampled_k).await?;
        if scored_ids.is_empty() {
            return Ok(Vec::new());
        }

        let hashes: Vec<String> = scored_ids.iter().map(|s| s.id.clone()).collect();
        let by_hash = self.locations.list_across_repos(repo_roots, &hashes).await?;

        let mut out = Vec::new();
        'hashes: for scored in &scored_ids {
            let Some(locations) = by_hash.get(&scored.id) else {
                continue;
            };
            for location in locations {
                if out.len() >= k {
                    break 'hashes;
                }
                let mut snippet = None;
                if let Some(reader) = &self.snippet_reader {
                    if let Ok(content) = reader.read(&location.path, location.start_line, location.end_line).await {
                        snippet = Some(truncate_chars(&content, SNIPPET_CHAR_LIMIT));
                    }
                }
                out.push(StreamResult {
                    id: scored.id.clone(),
                    path: location.path.clone(),
                    line: location.start_line,
                    end_line: location.end_line,
                    score: self.score(scored.distance),
                    source: ResultSource::Semantic,
                    snippet,
                    metadata: serde_json::json!({ "repo_root": location.repo_root }),
                });
            }
        }
        Ok(out)
    }
}

fn truncate_chars(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    use crate::storage::SqliteStore;
    use crate::storage::Store;
    use crate::types::Location;
    use crate::types::NodeType;
    use crate::vector::ExactScanIndex;

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
        async fn available(&self) -> bool {
            true
        }
        fn provider_id(&self) -> &str {
            "fixed"
        }
        fn dimensions(&self) -> usize {
            2
        }
    }

    async fn setup() -> (SemanticSearcher, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let sqlite = SqliteStore::open(&dir.path().join("index.db")).unwrap();
        let store = Store::Embedded(Arc::new(sqlite));

        let cache = crate::cache::EmbeddingCache::new(store.clone());
        cache
            .put_many(
                vec![crate::types::Embedding {
                    chunk_hash: "h1".into(),
                    model_id: "fixed".into(),
                    dimensions: 2,
                    vector: vec![1.0, 0.0],
                }],
                "fixed",
            )
            .await
            .unwrap();

        let locations = LocationStore::new(store.clone());
        locations
            .upsert_many(
                "/repo",
                vec![Location {
                    repo_root: "/repo".into(),
                    path: "a.rs".into(),
                    start_line: 1,
                    end_line: 3,
                    chunk_hash: "h1".into(),
                    node_type: NodeType::Function,
                    node_name: Some("f".into()),
                    language: "rust".into(),
                    indexed_at: 0,
                }],
            )
            .await
            .unwrap();

        let index = ExactScanIndex::new(store, "fixed", DistanceMetric::Cosine);
        let searcher = SemanticSearcher::new(Arc::new(FixedEmbedder), Arc::new(index), locations, DistanceMetric::Cosine);
        (searcher, dir)
    }

    #[tokio::test]
    async fn search_returns_matching_location() {
        let (searcher, _dir) = setup().await;
        let results = searcher.search("/repo", "anything", 5, Oversample::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, "a.rs");
        assert_eq!(results[0].line, 1);
    }

    #[tokio::test]
    async fn no_embedding_yields_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let sqlite = SqliteStore::open(&dir.path().join("index.db")).unwrap();
        let store = Store::Embedded(Arc::new(sqlite));
        let locations = LocationStore::new(store.clone());
        let index = ExactScanIndex::new(store, "fixed", DistanceMetric::Cosine);
        let searcher = SemanticSearcher::new(Arc::new(FixedEmbedder), Arc::new(index), locations, DistanceMetric::Cosine);
        let results = searcher.search("/repo", "q", 5, Oversample::default()).await.unwrap();
        assert!(results.is_empty());
    }
}
