//! Default [`LexicalSearch`] adapter: BM25 over the working tree's source
//! files. Treated by the rest of the core as an opaque producer of
//! `{path, line_start, line_end, snippet, score}` hits — this module is the
//! one place that knows it is BM25 specifically.

use std::path::Path;

use async_trait::async_trait;
use bm25::Embedder as Bm25Embedder;
use bm25::EmbedderBuilder;
use bm25::Language;

use crate::error::Result;
use crate::merkle::IgnoreSet;
use crate::traits::LexicalHit;
use crate::traits::LexicalSearch;

struct IndexedDoc {
    path: String,
    line_start: u32,
    line_end: u32,
    text: String,
}

/// Chunks every file in `root` into fixed-size line windows and scores them
/// against the query with BM25. Rebuilt fresh on every call — the indexer
/// facade does not persist a BM25 index, since the location store and
/// embedding cache already carry the durable state this core owns.
pub struct Bm25LexicalSearch {
    window_lines: usize,
}

impl Bm25LexicalSearch {
    pub fn new() -> Self {
        Self { window_lines: 30 }
    }

    fn collect_documents(&self, root: &Path) -> Vec<IndexedDoc> {
        let ignores = match IgnoreSet::load(root, ".repolens") {
            Ok(set) => set,
            Err(_) => return Vec::new(),
        };
        let mut docs = Vec::new();
        self.walk(root, root, "", &ignores, &mut docs);
        docs
    }

    fn walk(&self, repo_root: &Path, dir: &Path, rel: &str, ignores: &IgnoreSet, out: &mut Vec<IndexedDoc>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let child_rel = if rel.is_empty() { name.clone() } else { format!("{rel}/{name}") };
            let is_dir = entry.path().is_dir();
            if ignores.is_ignored(&child_rel, is_dir) {
                continue;
            }
            if is_dir {
                self.walk(repo_root, &entry.path(), &child_rel, ignores, out);
            } else if let Ok(content) = std::fs::read_to_string(entry.path()) {
                self.window_file(&child_rel, &content, out);
            }
        }
    }

    fn window_file(&self, rel_path: &str, content: &str, out: &mut Vec<IndexedDoc>) {
        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            return;
        }
        let mut start = 0;
        while start < lines.len() {
            let end = (start + self.window_lines).min(lines.len());
            out.push(IndexedDoc {
                path: rel_path.to_string(),
                line_start: start as u32 + 1,
                line_end: end as u32,
                text: lines[start..end].join("\n"),
            });
            start = end;
        }
    }
}

impl Default for Bm25LexicalSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LexicalSearch for Bm25LexicalSearch {
    async fn search(&self, pattern: &str, root: &str, limit: usize) -> Result<Vec<LexicalHit>> {
        let root_path = Path::new(root).to_path_buf();
        let pattern = pattern.to_string();
        tokio::task::spawn_blocking(move || {
            let searcher = Bm25LexicalSearch::new();
            let docs = searcher.collect_documents(&root_path);
            if docs.is_empty() {
                return Vec::new();
            }
            let corpus: Vec<&str> = docs.iter().map(|d| d.text.as_str()).collect();
            let embedder: Bm25Embedder = EmbedderBuilder::with_fit_to_corpus(Language::English, &corpus).build();
            let query_embedding = embedder.embed(&pattern);

            let mut scored: Vec<(usize, f32)> = docs
                .iter()
                .enumerate()
                .map(|(i, doc)| {
                    let doc_embedding = embedder.embed(&doc.text);
                    (i, query_embedding.score(&doc_embedding))
                })
                .filter(|(_, score)| *score > 0.0)
                .collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(limit);

            scored
                .into_iter()
                .map(|(i, score)| {
                    let doc = &docs[i];
                    LexicalHit {
                        path: doc.path.clone(),
                        line_start: doc.line_start,
                        line_end: doc.line_end,
                        snippet: doc.text.clone(),
                        score,
                    }
                })
                .collect()
        })
        .await
        .map_err(|e| crate::error::RepolensError::internal(format!("bm25 search join: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_file_containing_the_query_term() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn greet_user() {\n    println!(\"hi\");\n}\n").unwrap();
        std::fs::write(dir.path().join("b.rs"), "fn unrelated() {}\n").unwrap();
        let search = Bm25LexicalSearch::new();
        let hits = search.search("greet_user", dir.path().to_str().unwrap(), 10).await.unwrap();
        assert!(hits.iter().any(|h| h.path == "a.rs"));
    }

    #[tokio::test]
    async fn empty_repo_returns_no_hits() {
        let dir = tempfile::tempdir().unwrap();
        let search = Bm25LexicalSearch::new();
        let hits = search.search("anything", dir.path().to_str().unwrap(), 10).await.unwrap();
        assert!(hits.is_empty());
    }
}
