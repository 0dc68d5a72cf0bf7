//! Search: the default lexical/symbolic adapters, the semantic searcher
//! (component H), rank fusion (component I), and the recent-files temporal
//! signal.

pub mod fusion;
pub mod lexical;
pub mod recent;
pub mod semantic;
pub mod symbols;

pub use fusion::SourceWeights;
pub use fusion::fuse;
pub use fusion::has_symbol_syntax;
pub use fusion::is_identifier_query;
pub use fusion::rerank;
pub use fusion::weights_for_query;
pub use lexical::Bm25LexicalSearch;
pub use recent::RecentFilesCache;
pub use semantic::Oversample;
pub use semantic::SemanticSearcher;
pub use symbols::TagSymbolExtractor;

use std::path::Path;

use async_trait::async_trait;

use crate::error::RepolensError;
use crate::error::Result;
use crate::traits::SnippetReader;

/// Default [`SnippetReader`]: reads `[start_line, end_line]` directly off
/// disk under a repo root. Used by the semantic searcher when a caller
/// wants hydrated text rather than bare coordinates.
pub struct FsSnippetReader {
    repo_root: std::path::PathBuf,
}

impl FsSnippetReader {
    pub fn new(repo_root: impl AsRef<Path>) -> Self {
        Self {
            repo_root: repo_root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl SnippetReader for FsSnippetReader {
    async fn read(&self, path: &str, start_line: u32, end_line: u32) -> Result<String> {
        let full = self.repo_root.join(path);
        let content = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| RepolensError::FileReadFailed {
                path: full.clone(),
                cause: e.to_string(),
            })?;
        let start = start_line.saturating_sub(1) as usize;
        let end = end_line as usize;
        let snippet: String = content
            .lines()
            .skip(start)
            .take(end.saturating_sub(start))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(snippet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_requested_line_range() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "one\ntwo\nthree\nfour\n").unwrap();
        let reader = FsSnippetReader::new(dir.path());
        let content = reader.read("a.rs", 2, 3).await.unwrap();
        assert_eq!(content, "two\nthree");
    }
}
