//! Tool protocol service: the six operations the external tool-protocol
//! server dispatches against — `search_keyword`, `get_file`, `find_symbol`,
//! `list_defs_in_file`, `search_semantic`, `hybrid_search` — wired on top
//! of the lexical/symbolic/semantic collaborators and rank fusion.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::error::RepolensError;
use crate::error::Result;
use crate::location::LocationStore;
use crate::merkle::IgnoreSet;
use crate::search;
use crate::search::Oversample;
use crate::search::RecentFilesCache;
use crate::search::SemanticSearcher;
use crate::traits::CrossEncoder;
use crate::traits::LexicalSearch;
use crate::traits::SymbolExtractor;
use crate::types::FusedResult;
use crate::types::ResultSource;
use crate::types::StreamResult;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchKeywordRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    20
}

#[derive(Debug, Clone, Serialize)]
pub struct KeywordHit {
    pub path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub snippet: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchKeywordResponse {
    pub results: Vec<KeywordHit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetFileRequest {
    pub path: String,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetFileResponse {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindSymbolRequest {
    pub name: String,
    pub kind: Option<String>,
    #[serde(default = "default_symbol_limit")]
    pub limit: usize,
}

fn default_symbol_limit() -> usize {
    50
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolHit {
    pub name: String,
    pub kind: String,
    pub path: String,
    pub line: u32,
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FindSymbolResponse {
    pub symbols: Vec<SymbolHit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListDefsInFileRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListDefsInFileResponse {
    pub path: String,
    pub symbols: Vec<SymbolHit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSemanticRequest {
    pub query: String,
    #[serde(default = "default_semantic_limit")]
    pub limit: usize,
}

fn default_semantic_limit() -> usize {
    10
}

#[derive(Debug, Clone, Serialize)]
pub struct SemanticHit {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub snippet: Option<String>,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchSemanticResponse {
    pub available: bool,
    pub results: Vec<SemanticHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HybridSearchRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub keyword_limit: usize,
    #[serde(default = "default_semantic_limit")]
    pub semantic_limit: usize,
    #[serde(default)]
    pub rerank: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HybridHit {
    pub path: String,
    pub line: u32,
    pub end_line: u32,
    pub score: f32,
    pub sources: Vec<ResultSource>,
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HybridSearchResponse {
    pub results: Vec<HybridHit>,
    pub keyword_count: usize,
    pub semantic_count: usize,
    pub semantic_available: bool,
}

/// Per-repo collaborators the protocol service dispatches against. Built
/// once per repo root and reused across calls; `search_semantic` and
/// `hybrid_search` degrade gracefully when `semantic` is `None` (no active
/// embedding model for this repo, or the embedder is off).
pub struct RepolensService {
    repo_root: std::path::PathBuf,
    locations: LocationStore,
    lexical: Arc<dyn LexicalSearch>,
    symbols: Arc<dyn SymbolExtractor>,
    semantic: Option<SemanticSearcher>,
    recent: std::sync::Mutex<RecentFilesCache>,
    oversample: Oversample,
    cross_encoder: Arc<dyn CrossEncoder>,
    rerank_top: usize,
}

impl RepolensService {
    pub fn new(
        repo_root: impl AsRef<Path>,
        locations: LocationStore,
        lexical: Arc<dyn LexicalSearch>,
        symbols: Arc<dyn SymbolExtractor>,
        semantic: Option<SemanticSearcher>,
        oversample: Oversample,
    ) -> Self {
        let repo_root = repo_root.as_ref().to_path_buf();
        Self {
            repo_root,
            locations,
            lexical,
            symbols,
            semantic,
            recent: std::sync::Mutex::new(RecentFilesCache::default()),
            oversample,
            cross_encoder: Arc::new(crate::reranker::PassthroughCrossEncoder),
            rerank_top: 20,
        }
    }

    /// Swaps in a real cross-encoder (and the candidate-window size it
    /// reranks over) for the default no-op passthrough.
    pub fn with_cross_encoder(mut self, cross_encoder: Arc<dyn CrossEncoder>, rerank_top: usize) -> Self {
        self.cross_encoder = cross_encoder;
        self.rerank_top = rerank_top;
        self
    }

    fn repo_root_str(&self) -> String {
        self.repo_root.to_string_lossy().into_owned()
    }

    pub async fn search_keyword(&self, req: SearchKeywordRequest) -> Result<SearchKeywordResponse> {
        let hits = self.lexical.search(&req.query, &self.repo_root_str(), req.top_k).await?;
        Ok(SearchKeywordResponse {
            results: hits
                .into_iter()
                .map(|h| KeywordHit {
                    path: h.path,
                    line_start: h.line_start,
                    line_end: h.line_end,
                    snippet: h.snippet,
                    score: h.score,
                })
                .collect(),
        })
    }

    pub async fn get_file(&self, req: GetFileRequest) -> Result<GetFileResponse> {
        let full = self.repo_root.join(&req.path);
        let content = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| RepolensError::FileReadFailed {
                path: full.clone(),
                cause: e.to_string(),
            })?;

        let content = match (req.start_line, req.end_line) {
            (None, None) => content,
            (start, end) => {
                let start = start.unwrap_or(1).saturating_sub(1) as usize;
                let end = end.map(|e| e as usize).unwrap_or(usize::MAX);
                content
                    .lines()
                    .skip(start)
                    .take(end.saturating_sub(start))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };

        if let Err(e) = self.notify_file_accessed(Path::new(&req.path)).await {
            tracing::warn!("recent-files notify failed for {}: {e}", req.path);
        }

        Ok(GetFileResponse {
            path: req.path,
            content,
        })
    }

    async fn all_repo_files(&self) -> Result<Vec<String>> {
        let ignores = IgnoreSet::load(&self.repo_root, ".repolens")?;
        let mut out = Vec::new();
        walk_files(&self.repo_root, "", &ignores, &mut out)?;
        Ok(out)
    }

    pub async fn find_symbol(&self, req: FindSymbolRequest) -> Result<FindSymbolResponse> {
        let files = self.all_repo_files().await?;
        let all = self.symbols.extract(&self.repo_root_str(), &files).await?;
        let symbols: Vec<SymbolHit> = all
            .into_iter()
            .filter(|s| s.name == req.name)
            .filter(|s| req.kind.as_deref().map(|k| s.kind == k).unwrap_or(true))
            .take(req.limit)
            .map(|s| SymbolHit {
                name: s.name,
                kind: s.kind,
                path: s.path,
                line: s.line,
                scope: s.scope,
            })
            .collect();
        Ok(FindSymbolResponse { symbols })
    }

    pub async fn list_defs_in_file(&self, req: ListDefsInFileRequest) -> Result<ListDefsInFileResponse> {
        let symbols = self
            .symbols
            .extract(&self.repo_root_str(), std::slice::from_ref(&req.path))
            .await?
            .into_iter()
            .map(|s| SymbolHit {
                name: s.name,
                kind: s.kind,
                path: s.path,
                line: s.line,
                scope: s.scope,
            })
            .collect();
        Ok(ListDefsInFileResponse {
            path: req.path,
            symbols,
        })
    }

    /// Returns `{available: false, error: "no index"}` as a successful
    /// response (not an error) when no embedding model is active for this
    /// repo.
    pub async fn search_semantic(&self, req: SearchSemanticRequest) -> Result<SearchSemanticResponse> {
        let Some(semantic) = &self.semantic else {
            return Ok(SearchSemanticResponse {
                available: false,
                results: Vec::new(),
                error: Some("no index".to_string()),
            });
        };
        if !semantic.available().await {
            return Ok(SearchSemanticResponse {
                available: false,
                results: Vec::new(),
                error: Some("no index".to_string()),
            });
        }

        let results = semantic
            .search(&self.repo_root_str(), &req.query, req.limit, self.oversample)
            .await?;
        Ok(SearchSemanticResponse {
            available: true,
            results: results.into_iter().map(stream_to_semantic_hit).collect(),
            error: None,
        })
    }

    /// When the semantic stream is unavailable, falls back to lexical-only
    /// results with `semantic_available: false` rather than failing.
    pub async fn hybrid_search(&self, req: HybridSearchRequest) -> Result<HybridSearchResponse> {
        let repo_root_str = self.repo_root_str();
        let weights = search::weights_for_query(&req.query);

        let lexical_hits = self.lexical.search(&req.query, &repo_root_str, req.keyword_limit).await?;
        let keyword_count = lexical_hits.len();
        let lexical_stream: Vec<StreamResult> = lexical_hits
            .into_iter()
            .map(|h| StreamResult {
                id: format!("{}:{}:{}", h.path, h.line_start, h.line_end),
                path: h.path,
                line: h.line_start,
                end_line: h.line_end,
                score: h.score,
                source: ResultSource::Lexical,
                snippet: Some(h.snippet),
                metadata: serde_json::json!({}),
            })
            .collect();

        let mut streams = vec![lexical_stream];
        let mut semantic_count = 0;
        let mut semantic_available = false;

        if let Some(semantic) = &self.semantic {
            if semantic.available().await {
                let semantic_stream = semantic
                    .search(&repo_root_str, &req.query, req.semantic_limit, self.oversample)
                    .await?;
                semantic_count = semantic_stream.len();
                semantic_available = true;
                streams.push(semantic_stream);
            }
        }

        {
            let recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
            if !recent.is_empty() {
                streams.push(recent.stream(req.keyword_limit));
            }
        }

        let fused = search::fuse(&streams, &weights);
        let limit = req.keyword_limit.max(req.semantic_limit);
        let mut fused = if req.rerank {
            search::rerank(&req.query, fused, limit, self.rerank_top, self.cross_encoder.as_ref()).await
        } else {
            fused
        };
        fused.truncate(limit);

        Ok(HybridSearchResponse {
            results: fused.into_iter().map(fused_to_hybrid_hit).collect(),
            keyword_count,
            semantic_count,
            semantic_available,
        })
    }

    /// Records `path` as recently touched so subsequent `hybrid_search`
    /// calls include it in the recency stream. Called whenever `get_file`
    /// reads a path successfully.
    pub async fn notify_file_accessed(&self, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy().into_owned();
        let found = self.locations.list_file(&self.repo_root_str(), &path_str).await?;
        let mut recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
        recent.notify_file_accessed(path, found);
        Ok(())
    }
}

fn stream_to_semantic_hit(r: StreamResult) -> SemanticHit {
    SemanticHit {
        path: r.path,
        start_line: r.line,
        end_line: r.end_line,
        snippet: r.snippet,
        score: r.score,
    }
}

fn fused_to_hybrid_hit(r: FusedResult) -> HybridHit {
    HybridHit {
        path: r.path,
        line: r.line,
        end_line: r.end_line,
        score: r.score,
        sources: r.sources,
        snippet: r.snippet,
    }
}

fn walk_files(dir: &Path, rel: &str, ignores: &IgnoreSet, out: &mut Vec<String>) -> Result<()> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Ok(());
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let child_rel = if rel.is_empty() { name.clone() } else { format!("{rel}/{name}") };
        let is_dir = entry.path().is_dir();
        if ignores.is_ignored(&child_rel, is_dir) {
            continue;
        }
        if is_dir {
            walk_files(&entry.path(), &child_rel, ignores, out)?;
        } else {
            out.push(child_rel);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    use crate::storage::SqliteStore;
    use crate::storage::Store;
    use crate::traits::LexicalHit;

    struct EmptyLexical;
    #[async_trait]
    impl LexicalSearch for EmptyLexical {
        async fn search(&self, _pattern: &str, _root: &str, _limit: usize) -> Result<Vec<LexicalHit>> {
            Ok(Vec::new())
        }
    }

    struct EmptySymbols;
    #[async_trait]
    impl SymbolExtractor for EmptySymbols {
        async fn extract(&self, _repo_root: &str, _files: &[String]) -> Result<Vec<crate::traits::SymbolRecord>> {
            Ok(Vec::new())
        }
        fn available(&self) -> bool {
            true
        }
    }

    fn make_service(dir: &Path) -> RepolensService {
        let sqlite = SqliteStore::open(&dir.join("index.db")).unwrap();
        let store = Store::Embedded(Arc::new(sqlite));
        RepolensService::new(
            dir,
            LocationStore::new(store),
            Arc::new(EmptyLexical),
            Arc::new(EmptySymbols),
            None,
            Oversample::default(),
        )
    }

    #[tokio::test]
    async fn search_semantic_with_no_model_reports_unavailable_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let service = make_service(dir.path());
        let response = service
            .search_semantic(SearchSemanticRequest {
                query: "anything".into(),
                limit: 10,
            })
            .await
            .unwrap();
        assert!(!response.available);
        assert_eq!(response.error.as_deref(), Some("no index"));
    }

    #[tokio::test]
    async fn hybrid_search_falls_back_to_lexical_only() {
        let dir = tempfile::tempdir().unwrap();
        let service = make_service(dir.path());
        let response = service
            .hybrid_search(HybridSearchRequest {
                query: "anything".into(),
                keyword_limit: 20,
                semantic_limit: 10,
                rerank: false,
            })
            .await
            .unwrap();
        assert!(!response.semantic_available);
        assert_eq!(response.semantic_count, 0);
    }

    #[tokio::test]
    async fn get_file_reads_full_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        let service = make_service(dir.path());
        let response = service
            .get_file(GetFileRequest {
                path: "a.rs".into(),
                start_line: None,
                end_line: None,
            })
            .await
            .unwrap();
        assert_eq!(response.content, "fn a() {}\n");
    }

    #[tokio::test]
    async fn get_file_respects_line_range() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "one\ntwo\nthree\n").unwrap();
        let service = make_service(dir.path());
        let response = service
            .get_file(GetFileRequest {
                path: "a.rs".into(),
                start_line: Some(2),
                end_line: Some(2),
            })
            .await
            .unwrap();
        assert_eq!(response.content, "two");
    }
}
