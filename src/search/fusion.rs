//! Rank Fusion: weighted reciprocal-rank fusion over heterogeneous result
//! streams, with query-shape-aware per-source weights and an optional
//! cross-encoder rerank pass.

use std::collections::HashMap;

use crate::traits::CrossEncoder;
use crate::types::FusedResult;
use crate::types::ResultSource;
use crate::types::StreamResult;

/// `k` in the RRF denominator `w_s / (k + rank_s(x))`, fixed by convention.
pub const K_RRF: f32 = 60.0;

/// Per-source weight map for one fusion call. Unknown sources default to
/// `1.0`; callers construct this once per query via [`weights_for_query`].
#[derive(Debug, Clone)]
pub struct SourceWeights {
    weights: HashMap<ResultSource, f32>,
}

impl SourceWeights {
    pub fn uniform() -> Self {
        Self {
            weights: HashMap::new(),
        }
    }

    pub fn with_weight(mut self, source: ResultSource, weight: f32) -> Self {
        self.weights.insert(source, weight);
        self
    }

    fn get(&self, source: ResultSource) -> f32 {
        *self.weights.get(&source).unwrap_or(&1.0)
    }
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self::uniform()
    }
}

/// Symbol-syntax queries (`type:function name:Foo`, `kind:class Bar`) are
/// shaped for the symbolic stream; identifier-style queries (bare
/// `snake_case`/`camelCase` tokens with no spaces) favor exact lexical
/// matches. Neither detector changes the RRF formula itself — both only
/// pick the weights handed to [`fuse`].
pub fn has_symbol_syntax(query: &str) -> bool {
    let q = query.trim();
    ["type:", "kind:", "name:", "symbol:"].iter().any(|prefix| q.contains(prefix))
}

pub fn is_identifier_query(query: &str) -> bool {
    let q = query.trim();
    if q.is_empty() || q.contains(char::is_whitespace) {
        return false;
    }
    q.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == ':')
        && q.chars().any(|c| c.is_alphabetic())
}

/// Derives per-source weights from the query's shape. A symbol-shaped query
/// upweights the symbolic stream; an identifier-shaped query upweights
/// lexical. Neither the recency stream nor semantic are adjusted here.
pub fn weights_for_query(query: &str) -> SourceWeights {
    let mut weights = SourceWeights::uniform();
    if has_symbol_syntax(query) {
        weights = weights.with_weight(ResultSource::Symbolic, 2.0);
    }
    if is_identifier_query(query) {
        weights = weights.with_weight(ResultSource::Lexical, 1.5);
    }
    weights
}

/// Fuses one or more ordered streams into a single ranked list. `id` is the
/// identity used to recognize the same candidate across streams; ties in
/// the combined score are broken lexicographically on `(path, line)`.
pub fn fuse(streams: &[Vec<StreamResult>], weights: &SourceWeights) -> Vec<FusedResult> {
    struct Acc {
        path: String,
        line: u32,
        end_line: u32,
        score: f32,
        sources: Vec<ResultSource>,
        snippet: Option<String>,
        metadata: serde_json::Value,
    }

    let mut acc: HashMap<String, Acc> = HashMap::new();

    for stream in streams {
        for (rank, result) in stream.iter().enumerate() {
            let contribution = weights.get(result.source) / (K_RRF + (rank + 1) as f32);
            let entry = acc.entry(result.id.clone()).or_insert_with(|| Acc {
                path: result.path.clone(),
                line: result.line,
                end_line: result.end_line,
                score: 0.0,
                sources: Vec::new(),
                snippet: result.snippet.clone(),
                metadata: result.metadata.clone(),
            });
            entry.score += contribution;
            if !entry.sources.contains(&result.source) {
                entry.sources.push(result.source);
            }
            if entry.snippet.is_none() {
                entry.snippet = result.snippet.clone();
            }
        }
    }

    let mut fused: Vec<FusedResult> = acc
        .into_iter()
        .map(|(id, a)| FusedResult {
            id,
            path: a.path,
            line: a.line,
            end_line: a.end_line,
            score: a.score,
            sources: a.sources,
            snippet: a.snippet,
            metadata: a.metadata,
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.line.cmp(&b.line))
    });
    fused
}

/// Re-scores the top `rerank_top` fused results with an external
/// cross-encoder and truncates to `k`. Failure is non-fatal: on error the
/// fused order is kept unchanged.
pub async fn rerank(
    query: &str,
    fused: Vec<FusedResult>,
    k: usize,
    rerank_top: usize,
    cross_encoder: &dyn CrossEncoder,
) -> Vec<FusedResult> {
    if fused.is_empty() {
        return fused;
    }
    let split = rerank_top.min(fused.len());
    let (head, tail) = fused.split_at(split);
    let candidates: Vec<String> = head.iter().map(|r| r.snippet.clone().unwrap_or_default()).collect();

    match cross_encoder.score(query, &candidates).await {
        Ok(scores) if scores.len() == head.len() => {
            let mut rescored: Vec<(FusedResult, f32)> = head.iter().cloned().zip(scores).collect();
            rescored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            let mut out: Vec<FusedResult> = rescored.into_iter().map(|(r, _)| r).collect();
            out.extend(tail.iter().cloned());
            out.truncate(k);
            out
        }
        Ok(_) => {
            tracing::warn!("cross-encoder returned mismatched score count, keeping fused order");
            let mut out = fused;
            out.truncate(k);
            out
        }
        Err(e) => {
            tracing::warn!(error = %e, "cross-encoder rerank failed, keeping fused order");
            let mut out = fused;
            out.truncate(k);
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_result(id: &str, path: &str, line: u32, source: ResultSource) -> StreamResult {
        StreamResult {
            id: id.to_string(),
            path: path.to_string(),
            line,
            end_line: line + 2,
            score: 1.0,
            source,
            snippet: None,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn shared_candidate_outranks_single_stream_hits() {
        // lexical: [X@1, Y@3]; semantic: [Y@1, Z@2]
        let lexical = vec![
            stream_result("x", "x.rs", 1, ResultSource::Lexical),
            stream_result("y", "y.rs", 1, ResultSource::Lexical),
            stream_result("dummy", "d.rs", 1, ResultSource::Lexical),
        ];
        let semantic = vec![
            stream_result("y", "y.rs", 1, ResultSource::Semantic),
            stream_result("z", "z.rs", 1, ResultSource::Semantic),
        ];
        let fused = fuse(&[lexical, semantic], &SourceWeights::uniform());
        assert_eq!(fused[0].id, "y");
    }

    #[test]
    fn fusion_is_deterministic_across_runs() {
        let a = vec![stream_result("a", "a.rs", 1, ResultSource::Lexical)];
        let b = vec![stream_result("b", "b.rs", 1, ResultSource::Semantic)];
        let first = fuse(&[a.clone(), b.clone()], &SourceWeights::uniform());
        let second = fuse(&[a, b], &SourceWeights::uniform());
        assert_eq!(first.iter().map(|r| &r.id).collect::<Vec<_>>(), second.iter().map(|r| &r.id).collect::<Vec<_>>());
    }

    #[test]
    fn ties_break_on_path_then_line() {
        let a = vec![stream_result("a", "b.rs", 5, ResultSource::Lexical)];
        let b = vec![stream_result("b", "a.rs", 1, ResultSource::Lexical)];
        let fused = fuse(&[a, b], &SourceWeights::uniform());
        assert_eq!(fused[0].path, "a.rs");
    }

    #[test]
    fn symbol_syntax_is_detected() {
        assert!(has_symbol_syntax("type:function name:Foo"));
        assert!(!has_symbol_syntax("plain query"));
    }

    #[test]
    fn identifier_query_is_detected() {
        assert!(is_identifier_query("snake_case_name"));
        assert!(!is_identifier_query("two words"));
    }
}
