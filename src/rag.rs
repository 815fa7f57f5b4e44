//! Answer synthesis over one video.
//!
//! Supporting chunks come from the secondary keyword index (BM25), are laid
//! out as timestamped evidence in a prompt, and a local LLM writes the
//! answer with timestamp citations.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use crate::config::LlmConfig;
use crate::error::IngestError;
use crate::http::{build_client, post_json};
use crate::keyword_index::{keyword_search, KeywordHit};
use crate::layout::{is_safe_video_id, DataLayout};

const SYSTEM_PROMPT: &str = "You are a video-context search assistant.
Answer using only the evidence below, taken from the video's transcript and visual captions.
Always cite timestamps like [12.3s-18.4s]. If the evidence is weak or missing, say so.";

#[async_trait]
pub trait AnswerModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Non-streaming text generation through Ollama's `/api/generate`.
pub struct OllamaAnswerModel {
    url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaAnswerModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client: build_client(config.timeout_secs)?,
        })
    }

    /// Same endpoint, different model.
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            url: self.url.clone(),
            model: model.to_string(),
            client: self.client.clone(),
        }
    }
}

#[async_trait]
impl AnswerModel for OllamaAnswerModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        let url = format!("{}/api/generate", self.url);
        let response = post_json(&self.client, &url, None, &body, 1, "Ollama").await?;
        response["response"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("Ollama response missing 'response' field"))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RagSource {
    pub start: f64,
    pub end: f64,
    pub transcript: String,
    pub caption: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RagAnswer {
    pub query: String,
    pub answer: String,
    pub sources: Vec<RagSource>,
}

pub(crate) fn build_prompt(question: &str, hits: &[KeywordHit]) -> String {
    let mut prompt = String::from(SYSTEM_PROMPT);
    prompt.push_str("\n\nEvidence:\n");
    if hits.is_empty() {
        prompt.push_str("(no matching passages)\n");
    }
    for hit in hits {
        let c = &hit.chunk;
        prompt.push_str(&format!("[{:.1}s-{:.1}s] {}", c.start, c.end, c.transcript));
        if !c.caption.is_empty() {
            prompt.push_str(&format!(" (visual: {})", c.caption));
        }
        prompt.push('\n');
    }
    prompt.push_str(&format!("\nUser question: {}\n", question.trim()));
    prompt
}

/// Answer `question` about one ingested video.
///
/// # Errors
///
/// [`IngestError::NotFound`] (inside the `anyhow` chain) when the video has
/// no keyword index, plus any model failure.
pub async fn answer_question(
    layout: &DataLayout,
    video_id: &str,
    question: &str,
    top_k: usize,
    model: &dyn AnswerModel,
) -> Result<RagAnswer> {
    let db_path = layout.keyword_db(video_id);
    if !is_safe_video_id(video_id) || !db_path.is_file() {
        return Err(IngestError::NotFound(format!("index for video {}", video_id)).into());
    }

    let hits = keyword_search(&db_path, question, top_k.max(1))
        .await
        .context("keyword retrieval failed")?;
    tracing::debug!(video_id, hits = hits.len(), model = model.model_name(), "synthesizing answer");

    let answer = model.generate(&build_prompt(question, &hits)).await?;
    Ok(RagAnswer {
        query: question.to_string(),
        answer,
        sources: hits
            .into_iter()
            .map(|h| RagSource {
                start: h.chunk.start,
                end: h.chunk.end,
                transcript: h.chunk.transcript,
                caption: h.chunk.caption,
                score: h.score,
            })
            .collect(),
    })
}
