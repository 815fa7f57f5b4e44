use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub captioning: CaptioningConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

/// Vector backend, chosen once per process.
///
/// ```toml
/// [vector_store]
/// backend = "networked"
/// url = "http://localhost:6333"
/// collection = "video_chunks"
/// ```
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum VectorStoreConfig {
    /// One flat index per video under `path` (default `<data_dir>/index`).
    Local {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// One shared collection per embedding dimension on a Qdrant service.
    Networked {
        url: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_collection")]
        collection: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        VectorStoreConfig::Local { path: None }
    }
}

fn default_collection() -> String {
    "video_chunks".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "ollama".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Thresholds for the adaptive result cutoff.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct CutoffConfig {
    #[serde(default)]
    pub min_score: f64,
    #[serde(default = "default_relative_min")]
    pub relative_min: f64,
    #[serde(default = "default_dropoff_gap")]
    pub dropoff_gap: f64,
    #[serde(default = "default_min_return_hits")]
    pub min_return_hits: usize,
}

impl Default for CutoffConfig {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            relative_min: default_relative_min(),
            dropoff_gap: default_dropoff_gap(),
            min_return_hits: default_min_return_hits(),
        }
    }
}

fn default_relative_min() -> f64 {
    0.90
}
fn default_dropoff_gap() -> f64 {
    0.08
}
fn default_min_return_hits() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Candidate pool size. Unset means `max(top_k, 50)`.
    #[serde(default)]
    pub retrieve_k: Option<usize>,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(flatten)]
    pub cutoff: CutoffConfig,
    /// Thresholds applied instead of `cutoff` when rerank scores are in play.
    #[serde(default)]
    pub rerank_cutoff: Option<CutoffConfig>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            retrieve_k: None,
            default_top_k: default_top_k(),
            cutoff: CutoffConfig::default(),
            rerank_cutoff: None,
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_rerank_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            url: None,
            model: default_rerank_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_rerank_model() -> String {
    "bge-reranker-base".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    #[serde(default = "default_ytdlp")]
    pub ytdlp: String,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ytdlp: default_ytdlp(),
            ffmpeg: default_ffmpeg(),
        }
    }
}

fn default_ytdlp() -> String {
    "yt-dlp".to_string()
}
fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranscriptionConfig {
    #[serde(default = "default_transcription_url")]
    pub url: String,
    #[serde(default = "default_whisper_model")]
    pub model: String,
    #[serde(default = "default_long_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            url: default_transcription_url(),
            model: default_whisper_model(),
            timeout_secs: default_long_timeout_secs(),
        }
    }
}

fn default_transcription_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_whisper_model() -> String {
    "base".to_string()
}
fn default_long_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaptioningConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_caption_model")]
    pub model: String,
    #[serde(default = "default_caption_prompt")]
    pub prompt: String,
    #[serde(default = "default_long_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CaptioningConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            url: default_ollama_url(),
            model: default_caption_model(),
            prompt: default_caption_prompt(),
            timeout_secs: default_long_timeout_secs(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_caption_model() -> String {
    "llava".to_string()
}
fn default_caption_prompt() -> String {
    "Describe this video frame in one short sentence.".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_model() -> String {
    "llama3.1:8b".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    180
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7331".to_string()
}

impl Config {
    /// Directory holding the local backend's per-video indexes.
    pub fn local_index_dir(&self) -> PathBuf {
        match &self.vector_store {
            VectorStoreConfig::Local { path: Some(p) } => p.clone(),
            _ => self.storage.data_dir.join("index"),
        }
    }
}

impl RerankConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl CutoffConfig {
    fn validate(&self, section: &str) -> Result<()> {
        if !self.min_score.is_finite() {
            bail!("{}.min_score must be finite", section);
        }
        if !(0.0..=1.0).contains(&self.relative_min) {
            bail!("{}.relative_min must be in [0.0, 1.0]", section);
        }
        if !(self.dropoff_gap.is_finite() && self.dropoff_gap > 0.0) {
            bail!("{}.dropoff_gap must be > 0", section);
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a TOML config string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Retrieval
    if config.retrieval.default_top_k == 0 {
        bail!("retrieval.default_top_k must be >= 1");
    }
    if config.retrieval.retrieve_k == Some(0) {
        bail!("retrieval.retrieve_k must be >= 1 when set");
    }
    config.retrieval.cutoff.validate("retrieval")?;
    if let Some(rc) = &config.retrieval.rerank_cutoff {
        rc.validate("retrieval.rerank_cutoff")?;
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "ollama" | "openai" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be ollama, openai, or local.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.provider != "local" {
        if config.embedding.dims.is_none() {
            bail!(
                "embedding.dims must be set when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // Vector store
    if let VectorStoreConfig::Networked {
        url, collection, ..
    } = &config.vector_store
    {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("vector_store.url must be an http(s) URL, got '{}'", url);
        }
        if collection.trim().is_empty() {
            bail!("vector_store.collection must not be empty");
        }
    }

    match config.rerank.provider.as_str() {
        "disabled" | "local" => {}
        "http" => {
            if config.rerank.url.is_none() {
                bail!("rerank.url is required when provider is 'http'");
            }
        }
        other => bail!(
            "Unknown rerank provider: '{}'. Must be disabled, http, or local.",
            other
        ),
    }

    match config.captioning.provider.as_str() {
        "disabled" | "ollama" => {}
        other => bail!(
            "Unknown captioning provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }

    Ok(config)
}
