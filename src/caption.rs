//! Frame captioning collaborator.
//!
//! Captioning is optional. The orchestrator asks [`Captioner::availability`]
//! before the stage and skips it entirely unless the answer is
//! [`Capability::Ready`]; a disabled captioner is never called.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde_json::json;
use std::path::Path;

use crate::config::CaptioningConfig;
use crate::http::{build_client, post_json};
use crate::models::Capability;

#[async_trait]
pub trait Captioner: Send + Sync {
    fn availability(&self) -> Capability;

    /// Describe one image in a short sentence.
    async fn caption(&self, image: &Path) -> Result<String>;
}

/// Captioner used when `[captioning] provider = "disabled"`.
pub struct DisabledCaptioner;

#[async_trait]
impl Captioner for DisabledCaptioner {
    fn availability(&self) -> Capability {
        Capability::Disabled
    }

    async fn caption(&self, _image: &Path) -> Result<String> {
        anyhow::bail!("captioning is disabled")
    }
}

/// Vision-language captioning through Ollama's `/api/generate`.
pub struct OllamaCaptioner {
    url: String,
    model: String,
    prompt: String,
    client: reqwest::Client,
}

impl OllamaCaptioner {
    pub fn new(config: &CaptioningConfig) -> Result<Self> {
        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            prompt: config.prompt.clone(),
            client: build_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Captioner for OllamaCaptioner {
    fn availability(&self) -> Capability {
        Capability::Ready
    }

    async fn caption(&self, image: &Path) -> Result<String> {
        let bytes = tokio::fs::read(image)
            .await
            .with_context(|| format!("Failed to read frame: {}", image.display()))?;
        let body = json!({
            "model": self.model,
            "prompt": self.prompt,
            "images": [base64::engine::general_purpose::STANDARD.encode(bytes)],
            "stream": false,
        });
        let url = format!("{}/api/generate", self.url);
        let response = post_json(&self.client, &url, None, &body, 2, "Ollama").await?;
        let caption = response["response"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Ollama response missing 'response' field"))?;
        Ok(caption.trim().to_string())
    }
}

/// Build the configured captioner.
pub fn create_captioner(config: &CaptioningConfig) -> Result<std::sync::Arc<dyn Captioner>> {
    match config.provider.as_str() {
        "ollama" => Ok(std::sync::Arc::new(OllamaCaptioner::new(config)?)),
        _ => Ok(std::sync::Arc::new(DisabledCaptioner)),
    }
}
