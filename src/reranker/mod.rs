//! Cross-encoder rerank adapters for rank fusion's optional second pass.
//! [`crate::search::fusion::rerank`] is the actual entry point; this module
//! supplies the [`CrossEncoder`] implementations it dispatches against.

#[cfg(feature = "neural-reranker")]
pub mod fastembed_cross_encoder;

#[cfg(feature = "neural-reranker")]
pub use fastembed_cross_encoder::FastEmbedCrossEncoder;

use async_trait::async_trait;

use crate::error::Result;
use crate::traits::CrossEncoder;

/// Used when `search.rerank_enabled = false` or no neural reranker is
/// compiled in: scores every candidate identically, so fusion's rerank
/// pass is a no-op that keeps the RRF order.
pub struct PassthroughCrossEncoder;

#[async_trait]
impl CrossEncoder for PassthroughCrossEncoder {
    async fn score(&self, _query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        Ok(vec![0.0; candidates.len()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passthrough_scores_every_candidate_identically() {
        let encoder = PassthroughCrossEncoder;
        let scores = encoder.score("q", &["a".into(), "b".into()]).await.unwrap();
        assert_eq!(scores, vec![0.0, 0.0]);
    }
}
