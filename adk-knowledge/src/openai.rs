//! Embedding provider for OpenAI-compatible `/embeddings` endpoints.
//!
//! This module is only available when the `openai` feature is enabled. It talks to the
//! OpenAI API by default, and to any server exposing the same request/response shape
//! (local inference servers, proxies) through [`with_base_url`](OpenAiEmbeddingProvider::with_base_url).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::{EmbeddingProvider, normalize_in_place};
use crate::error::{KnowledgeError, Result};

const PROVIDER: &str = "OpenAI";

/// The default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// The default embedding model.
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// The default dimensionality for `text-embedding-3-small`.
pub const DEFAULT_DIMENSIONS: usize = 1536;

/// An [`EmbeddingProvider`] backed by an OpenAI-compatible embeddings API.
///
/// Returned vectors are re-ordered by the response `index`, L2-normalised, and checked
/// against [`dimensions`](EmbeddingProvider::dimensions).
///
/// # Configuration
///
/// - `base_url` – defaults to `https://api.openai.com/v1`.
/// - `api_key` – optional; sent as a bearer token when set.
/// - `model` – defaults to `text-embedding-3-small`.
/// - `dimensions` – defaults to 1536; [`with_dimensions`](Self::with_dimensions) also asks
///   the API to truncate to that size.
///
/// # Example
///
/// ```rust,ignore
/// use adk_knowledge::openai::OpenAiEmbeddingProvider;
///
/// let provider = OpenAiEmbeddingProvider::from_env()?.with_dimensions(384);
/// let embedding = provider.embed("hello world").await?;
/// ```
pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    request_dimensions: Option<usize>,
}

impl OpenAiEmbeddingProvider {
    /// Create a provider for the OpenAI API with the given key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(KnowledgeError::embedding(PROVIDER, "API key must not be empty"));
        }
        Ok(Self::keyless().with_api_key(api_key))
    }

    /// Create a provider that sends no `Authorization` header, for local servers.
    pub fn keyless() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            dimensions: DEFAULT_DIMENSIONS,
            request_dimensions: None,
        }
    }

    /// Create a provider from `OPENAI_API_KEY` and, if set, `OPENAI_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            KnowledgeError::embedding(PROVIDER, "OPENAI_API_KEY environment variable not set")
        })?;
        let provider = Self::new(api_key)?;
        Ok(match std::env::var("OPENAI_BASE_URL") {
            Ok(url) if !url.trim().is_empty() => provider.with_base_url(url),
            _ => provider,
        })
    }

    /// Point the provider at another OpenAI-compatible server (e.g. `http://localhost:8080/v1`).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the model name (e.g. `text-embedding-3-large`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the output dimensions.
    ///
    /// The API is asked to truncate embeddings to this size, and responses of any other
    /// size are rejected.
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }

    /// The full embeddings endpoint URL.
    pub fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Order response rows by `index`, then validate count and dimension and normalise.
fn collect_embeddings(
    mut data: Vec<EmbeddingData>,
    expected_count: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected_count {
        return Err(KnowledgeError::embedding(
            PROVIDER,
            format!("API returned {} embeddings for {expected_count} inputs", data.len()),
        ));
    }
    data.sort_by_key(|d| d.index);

    data.into_iter()
        .map(|d| {
            if d.embedding.len() != dimensions {
                return Err(KnowledgeError::DimensionMismatch {
                    expected: dimensions,
                    actual: d.embedding.len(),
                });
            }
            let mut embedding = d.embedding;
            normalize_in_place(&mut embedding);
            Ok(embedding)
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, text_len = text.len(), "embedding single text");

        let results = self.embed_batch(&[text]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| KnowledgeError::embedding(PROVIDER, "API returned empty response"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(provider = PROVIDER, batch_size = texts.len(), model = %self.model, "embedding batch");

        let request_body =
            EmbeddingRequest { model: &self.model, input: texts, dimensions: self.request_dimensions };
        let mut request = self.client.post(self.endpoint()).json(&request_body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "request failed");
            KnowledgeError::embedding(PROVIDER, format!("request failed: {e}"))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail =
                serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body);

            error!(provider = PROVIDER, %status, "API error");
            return Err(KnowledgeError::embedding(PROVIDER, format!("API returned {status}: {detail}")));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "failed to parse response");
            KnowledgeError::embedding(PROVIDER, format!("failed to parse response: {e}"))
        })?;

        collect_embeddings(parsed.data, texts.len(), self.dimensions)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
