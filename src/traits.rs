//! Capability traits for collaborators the core consumes but does not own:
//! the embedding provider, the symbol extractor, lexical search, snippet
//! hydration, the reranker, and progress reporting. Concrete adapters live
//! under [`crate::embedder`], [`crate::search::symbols`],
//! [`crate::search::lexical`] and [`crate::reranker`]; tests substitute
//! no-op or in-memory implementations.

use async_trait::async_trait;

use crate::error::Result;

/// A single `{name, kind, path, line}` record produced by the external
/// symbol extractor.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SymbolRecord {
    pub name: String,
    pub kind: String,
    pub path: String,
    pub line: u32,
    pub scope: Option<String>,
    pub signature: Option<String>,
}

/// A single `{path, line_start, line_end, snippet, score}` record produced
/// by the opaque lexical search collaborator.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LexicalHit {
    pub path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub snippet: String,
    pub score: f32,
}

/// Consumed, not defined here: `embed`, `available`, `provider_id`,
/// `dimensions`. Implementations may call out over HTTP to a local model
/// server.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    async fn available(&self) -> bool;
    fn provider_id(&self) -> &str;
    fn dimensions(&self) -> usize;
}

#[async_trait]
pub trait SymbolExtractor: Send + Sync {
    async fn extract(&self, repo_root: &str, files: &[String]) -> Result<Vec<SymbolRecord>>;
    fn available(&self) -> bool;
}

#[async_trait]
pub trait LexicalSearch: Send + Sync {
    async fn search(&self, pattern: &str, root: &str, limit: usize) -> Result<Vec<LexicalHit>>;
}

/// Hydrates a snippet of source for a `(path, start, end)` location. Used
/// by the semantic searcher when the caller wants result text rather than
/// just coordinates.
#[async_trait]
pub trait SnippetReader: Send + Sync {
    async fn read(&self, path: &str, start_line: u32, end_line: u32) -> Result<String>;
}

/// Scores `(query, candidate)` pairs jointly to re-order a short candidate
/// list. Failure is non-fatal to the caller: on error the fused order is
/// kept.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>>;
}

/// A capability trait standing in for closure-based progress callbacks.
/// The caller may pass [`NoopProgress`].
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, current: usize, total: usize, current_file: Option<&str>);
}

pub struct NoopProgress;

impl ProgressCallback for NoopProgress {
    fn on_progress(&self, _current: usize, _total: usize, _current_file: Option<&str>) {}
}

impl<F> ProgressCallback for F
where
    F: Fn(usize, usize, Option<&str>) + Send + Sync,
{
    fn on_progress(&self, current: usize, total: usize, current_file: Option<&str>) {
        self(current, total, current_file)
    }
}
