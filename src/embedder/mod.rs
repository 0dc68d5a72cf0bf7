//! `Embedder` adapters. The core consumes this capability; it does not
//! define the wire format of any particular provider. [`HttpEmbedder`] is
//! the default adapter, calling out to an OpenAI-compatible embeddings
//! endpoint on a local model server.

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::error::RepolensError;
use crate::error::Result;
use crate::traits::Embedder;

#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            model: model.into(),
            dimensions,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .expect("reqwest client"),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };

        let mut req = self.client.post(format!("{}/embeddings", self.endpoint)).json(&request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| RepolensError::EmbedderTransient {
            cause: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RepolensError::EmbedderTransient {
                cause: format!("status {status}: {body}"),
            });
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| RepolensError::EmbedderTransient {
            cause: e.to_string(),
        })?;

        let mut ordered: Vec<(usize, Vec<f32>)> = parsed.data.into_iter().map(|d| (d.index, d.embedding)).collect();
        ordered.sort_by_key(|(idx, _)| *idx);

        for (_, vector) in &ordered {
            if vector.len() != self.dimensions {
                return Err(RepolensError::DimensionMismatch {
                    expected: self.dimensions,
                    got: vector.len(),
                });
            }
        }

        Ok(ordered.into_iter().map(|(_, v)| v).collect())
    }

    async fn available(&self) -> bool {
        self.client
            .get(format!("{}/health", self.endpoint))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn provider_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Disabled provider: used when `embedding_provider = off`, so the rest of
/// the pipeline can be exercised without a live HTTP endpoint.
pub struct UnavailableEmbedder;

#[async_trait]
impl Embedder for UnavailableEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RepolensError::EmbedderUnavailable {
            provider: "off".into(),
        })
    }

    async fn available(&self) -> bool {
        false
    }

    fn provider_id(&self) -> &str {
        "off"
    }

    fn dimensions(&self) -> usize {
        0
    }
}
