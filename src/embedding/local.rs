//! In-process embeddings via fastembed.
//!
//! Models are downloaded on first use from Hugging Face and cached. After the
//! initial download no network calls are made.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;

pub struct LocalProvider {
    model_name: String,
    dims: usize,
    model: Arc<Mutex<fastembed::TextEmbedding>>,
}

impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "bge-base-en-v1.5".to_string());
        let (fastembed_model, default_dims) = config_to_fastembed_model(&model_name)?;
        let dims = config.dims.unwrap_or(default_dims);

        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;

        Ok(Self {
            model_name,
            dims,
            model: Arc::new(Mutex::new(model)),
        })
    }
}

fn config_to_fastembed_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    match name {
        "all-minilm-l6-v2" => Ok((fastembed::EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((fastembed::EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((fastembed::EmbeddingModel::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((fastembed::EmbeddingModel::BGELargeENV15, 1024)),
        "nomic-embed-text-v1.5" => Ok((fastembed::EmbeddingModel::NomicEmbedTextV15, 768)),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5",
            other
        ),
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            model
                .embed(texts, None)
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}
