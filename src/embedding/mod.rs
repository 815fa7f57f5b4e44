//! Embedding provider abstraction and the shared embedding gateway.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API with batching, retry, and backoff.
//! - **`LocalProvider`**: runs models in-process via fastembed (`local-models` feature).
//!
//! Chunk text at ingest time and query text at search time both go through
//! the same [`EmbeddingGateway`], so the two live in one vector space. The
//! gateway unit-normalizes every vector; the stores rely on this so that
//! inner product equals cosine similarity.
//!
//! # Provider Selection
//!
//! | Config Value | Provider |
//! |-------------|----------|
//! | `"ollama"` | [`OllamaProvider`] |
//! | `"openai"` | [`OpenAIProvider`] |
//! | `"local"` | `LocalProvider` (requires `--features local-models`) |

#[cfg(feature = "local-models")]
mod local;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::http::{build_client, post_json};

#[cfg(feature = "local-models")]
pub use local::LocalProvider;

/// Trait for embedding providers.
///
/// The dimension reported by [`dims`](EmbeddingProvider::dims) fixes the
/// vector store's dimension for the process lifetime.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `768`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Normalizing, dimension-checking front for an [`EmbeddingProvider`].
#[derive(Clone)]
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
        }
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed `texts` in batches; every returned vector has length `dims()` and unit norm.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let dims = self.dims();
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let vectors = self.provider.embed(batch).await?;
            if vectors.len() != batch.len() {
                bail!(
                    "embedding model {} returned {} vectors for {} inputs",
                    self.model_name(),
                    vectors.len(),
                    batch.len()
                );
            }
            for mut v in vectors {
                if v.len() != dims {
                    bail!(
                        "embedding model {} returned dimension {}, expected {}",
                        self.model_name(),
                        v.len(),
                        dims
                    );
                }
                normalize(&mut v);
                out.push(v);
            }
        }

        Ok(out)
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_texts(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// Scale `v` to unit L2 norm in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured Ollama URL (default: `http://localhost:11434`).
/// Requires Ollama to be running with an embedding model pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            client: build_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json(
            &self.client,
            &format!("{}/api/embed", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|a| a.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
                .ok_or_else(|| {
                    anyhow::anyhow!("Invalid Ollama response: embedding is not an array")
                })
        })
        .collect()
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API (or any compatible server).
///
/// Calls `POST {url}/v1/embeddings`; `url` defaults to `https://api.openai.com`.
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: config.max_retries,
            client: build_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json(
            &self.client,
            &format!("{}/v1/embeddings", self.url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Create the configured [`EmbeddingProvider`].
///
/// # Errors
///
/// Returns an error for unknown provider names or if the provider
/// cannot be initialized (missing config, API key, or feature flag).
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        #[cfg(feature = "local-models")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-models"))]
        "local" => bail!("Local embedding provider requires --features local-models"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Returns `[i, 1, 0, ...]` for input `i`, recording batch sizes.
    struct CountingProvider {
        dims: usize,
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.batches.lock().unwrap().push(texts.len());
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; self.dims];
                    v[0] = t.len() as f32;
                    v[1] = 1.0;
                    v
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn gateway_batches_and_normalizes() {
        let provider = Arc::new(CountingProvider {
            dims: 4,
            batches: Mutex::new(Vec::new()),
        });
        let gateway = EmbeddingGateway::new(provider.clone(), 2);
        let texts: Vec<String> = ["a", "bbb", "cc", "dddd", "e"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let vectors = gateway.embed_texts(&texts).await.unwrap();
        assert_eq!(vectors.len(), 5);
        for v in &vectors {
            assert_eq!(v.len(), 4);
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
        assert_eq!(*provider.batches.lock().unwrap(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn gateway_rejects_wrong_dimension() {
        struct Short;
        #[async_trait]
        impl EmbeddingProvider for Short {
            fn model_name(&self) -> &str {
                "short"
            }
            fn dims(&self) -> usize {
                8
            }
            async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![1.0; 3]).collect())
            }
        }

        let gateway = EmbeddingGateway::new(Arc::new(Short), 16);
        let err = gateway.embed_query("q").await.unwrap_err();
        assert!(err.to_string().contains("dimension 3"));
    }

    #[test]
    fn normalize_leaves_zero_vector() {
        let mut v = vec![0.0f32; 3];
        normalize(&mut v);
        assert_eq!(v, vec![0.0; 3]);

        let mut v = vec![3.0f32, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn openai_response_is_reordered_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn ollama_response_requires_embeddings() {
        let json = serde_json::json!({ "embeddings": [[0.5, 0.5]] });
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![vec![0.5, 0.5]]);
        assert!(parse_ollama_response(&serde_json::json!({})).is_err());
    }
}
