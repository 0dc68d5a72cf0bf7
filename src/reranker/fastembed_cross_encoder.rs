//! Optional neural reranker behind the `neural-reranker` feature: scores
//! `(query, candidate)` pairs by cosine similarity of `fastembed` sentence
//! embeddings rather than a query-term-overlap heuristic.

use std::sync::Mutex;

use async_trait::async_trait;
use fastembed::EmbeddingModel;
use fastembed::InitOptions;
use fastembed::TextEmbedding;

use crate::error::RepolensError;
use crate::error::Result;
use crate::traits::CrossEncoder;

pub struct FastEmbedCrossEncoder {
    model: Mutex<TextEmbedding>,
}

impl FastEmbedCrossEncoder {
    pub fn new() -> Result<Self> {
        let model = TextEmbedding::try_new(InitOptions::new(EmbeddingModel::BGESmallENV15))
            .map_err(|e| RepolensError::internal(format!("fastembed init: {e}")))?;
        Ok(Self { model: Mutex::new(model) })
    }
}

#[async_trait]
impl CrossEncoder for FastEmbedCrossEncoder {
    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let query = query.to_string();
        let candidates = candidates.to_vec();
        let model = &self.model;
        tokio::task::block_in_place(|| {
            let mut model = model.lock().unwrap_or_else(|p| p.into_inner());
            let mut inputs = vec![query.clone()];
            inputs.extend(candidates.iter().cloned());
            let embeddings = model
                .embed(inputs, None)
                .map_err(|e| RepolensError::internal(format!("fastembed embed: {e}")))?;
            let query_vec = &embeddings[0];
            Ok(embeddings[1..].iter().map(|v| cosine(query_vec, v)).collect())
        })
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
