//! Cross-encoder reranking.
//!
//! A reranker scores `(query, candidate text)` pairs and its score replaces
//! raw similarity as the ranking key. Reranking is optional: callers check
//! [`Reranker::availability`] and fall back to plain truncation when it is
//! not [`Capability::Ready`] or when scoring fails.
//!
//! | Config Value | Reranker |
//! |-------------|----------|
//! | `"disabled"` | [`DisabledReranker`] |
//! | `"http"` | [`HttpReranker`] (text-embeddings-inference `/rerank`) |
//! | `"local"` | `LocalReranker` (requires `--features local-models`) |

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::config::RerankConfig;
use crate::http::{build_client, post_json};
use crate::models::Capability;

#[async_trait]
pub trait Reranker: Send + Sync {
    fn availability(&self) -> Capability;

    /// One relevance score per text, in input order.
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f64>>;
}

pub struct DisabledReranker;

#[async_trait]
impl Reranker for DisabledReranker {
    fn availability(&self) -> Capability {
        Capability::Disabled
    }

    async fn score(&self, _query: &str, _texts: &[String]) -> Result<Vec<f64>> {
        bail!("reranking is disabled")
    }
}

/// Reranker served over HTTP in the text-embeddings-inference format.
///
/// Request `{"query": .., "texts": [..]}`, response `[{"index": i, "score": s}, ..]`
/// in arbitrary order.
pub struct HttpReranker {
    url: String,
    client: reqwest::Client,
}

impl HttpReranker {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("rerank.url is required for the http reranker"))?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client: build_client(config.timeout_secs)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RankedText {
    index: usize,
    score: f64,
}

pub(crate) fn scores_by_index(body: serde_json::Value, count: usize) -> Result<Vec<f64>> {
    let ranked: Vec<RankedText> = serde_json::from_value(body)?;
    let mut scores = vec![None; count];
    for r in ranked {
        match scores.get_mut(r.index) {
            Some(slot) => *slot = Some(r.score),
            None => bail!("reranker returned out-of-range index {}", r.index),
        }
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| anyhow::anyhow!("reranker returned no score for text {}", i)))
        .collect()
}

#[async_trait]
impl Reranker for HttpReranker {
    fn availability(&self) -> Capability {
        Capability::Ready
    }

    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f64>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({ "query": query, "texts": texts, "raw_scores": false });
        let url = format!("{}/rerank", self.url);
        let response = post_json(&self.client, &url, None, &body, 1, "Rerank").await?;
        scores_by_index(response, texts.len())
    }
}

#[cfg(feature = "local-models")]
pub use local::LocalReranker;

#[cfg(feature = "local-models")]
mod local {
    use super::*;
    use std::sync::Mutex;

    /// In-process cross-encoder via fastembed.
    ///
    /// A model that fails to load leaves the reranker [`Capability::Unavailable`]
    /// instead of failing startup.
    pub struct LocalReranker {
        model: Result<Arc<Mutex<fastembed::TextRerank>>, String>,
    }

    impl LocalReranker {
        pub fn new(config: &RerankConfig) -> Self {
            let model = match config.model.as_str() {
                "bge-reranker-base" => Ok(fastembed::RerankerModel::BGERerankerBase),
                "jina-reranker-v1-turbo-en" => Ok(fastembed::RerankerModel::JINARerankerV1TurboEn),
                other => Err(format!("unknown local rerank model '{}'", other)),
            }
            .and_then(|m| {
                fastembed::TextRerank::try_new(
                    fastembed::RerankInitOptions::new(m).with_show_download_progress(true),
                )
                .map_err(|e| e.to_string())
            })
            .map(|m| Arc::new(Mutex::new(m)));
            if let Err(reason) = &model {
                tracing::warn!(%reason, "local reranker unavailable");
            }
            Self { model }
        }
    }

    #[async_trait]
    impl Reranker for LocalReranker {
        fn availability(&self) -> Capability {
            match &self.model {
                Ok(_) => Capability::Ready,
                Err(reason) => Capability::Unavailable(reason.clone()),
            }
        }

        async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f64>> {
            let model = match &self.model {
                Ok(m) => m.clone(),
                Err(reason) => bail!("local reranker unavailable: {}", reason),
            };
            let query = query.to_string();
            let texts = texts.to_vec();
            let count = texts.len();
            tokio::task::spawn_blocking(move || {
                let mut model = model
                    .lock()
                    .map_err(|_| anyhow::anyhow!("local rerank model lock poisoned"))?;
                let docs: Vec<&str> = texts.iter().map(String::as_str).collect();
                let results = model
                    .rerank(query.as_str(), docs, false, None)
                    .map_err(|e| anyhow::anyhow!("Local rerank failed: {}", e))?;
                let mut scores = vec![0.0; count];
                for r in results {
                    if let Some(slot) = scores.get_mut(r.index) {
                        *slot = r.score as f64;
                    }
                }
                Ok(scores)
            })
            .await?
        }
    }
}

/// Build the configured reranker.
pub fn create_reranker(config: &RerankConfig) -> Result<Arc<dyn Reranker>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledReranker)),
        "http" => Ok(Arc::new(HttpReranker::new(config)?)),
        #[cfg(feature = "local-models")]
        "local" => Ok(Arc::new(local::LocalReranker::new(config))),
        #[cfg(not(feature = "local-models"))]
        "local" => Ok(Arc::new(UnavailableReranker(
            "built without the local-models feature".to_string(),
        ))),
        other => bail!("Unknown rerank provider: {}", other),
    }
}

/// Placeholder for a configured reranker that cannot run in this build.
pub struct UnavailableReranker(pub String);

#[async_trait]
impl Reranker for UnavailableReranker {
    fn availability(&self) -> Capability {
        Capability::Unavailable(self.0.clone())
    }

    async fn score(&self, _query: &str, _texts: &[String]) -> Result<Vec<f64>> {
        bail!("reranker unavailable: {}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_are_reordered_by_index() {
        let body = json!([
            { "index": 2, "score": 0.1 },
            { "index": 0, "score": 0.9 },
            { "index": 1, "score": 0.5 }
        ]);
        assert_eq!(scores_by_index(body, 3).unwrap(), vec![0.9, 0.5, 0.1]);
    }

    #[test]
    fn missing_scores_are_an_error() {
        let body = json!([{ "index": 0, "score": 0.9 }]);
        assert!(scores_by_index(body, 2).is_err());
        let body = json!([{ "index": 5, "score": 0.9 }]);
        assert!(scores_by_index(body, 2).is_err());
    }

    #[test]
    fn disabled_by_default() {
        let reranker = create_reranker(&RerankConfig::default()).unwrap();
        assert_eq!(reranker.availability(), Capability::Disabled);
    }
}
