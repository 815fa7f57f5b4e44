//! Core data models used throughout Video Harness.
//!
//! These types represent the videos, chunks, and search hits that flow
//! through the ingestion and retrieval pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Where the video bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A URL handed to the network-fetch collaborator.
    Remote,
    /// A path on the local filesystem, copied into the artifact tree.
    Local,
}

impl FromStr for SourceKind {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" | "youtube" | "url" => Ok(SourceKind::Remote),
            "local" | "file" => Ok(SourceKind::Local),
            other => Err(IngestError::InvalidSource(format!(
                "source kind must be remote or local, got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Remote => f.write_str("remote"),
            SourceKind::Local => f.write_str("local"),
        }
    }
}

/// Parameters for one ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub source_kind: SourceKind,
    /// URL or local path, depending on `source_kind`.
    pub source: String,
    /// Frames sampled per second. `<= 0` skips frame extraction.
    pub fps: f64,
    /// Keep at most this many frames. `Some(0)` skips frame extraction.
    pub max_frames: Option<usize>,
    /// When false the captioning stage is skipped entirely.
    pub enable_captions: bool,
}

impl IngestRequest {
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            source_kind: SourceKind::Local,
            source: path.into(),
            fps: 1.0,
            max_frames: None,
            enable_captions: true,
        }
    }

    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            source_kind: SourceKind::Remote,
            ..Self::local(url)
        }
    }

    /// Whether the frame extraction stage runs at all.
    pub fn wants_frames(&self) -> bool {
        self.fps > 0.0 && self.max_frames != Some(0)
    }
}

/// Immutable record written once at ingest start (`meta/<id>/meta.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: String,
    pub source_kind: SourceKind,
    pub source: String,
    pub fps: f64,
    pub max_frames: Option<usize>,
    pub enable_captions: bool,
    pub created_at: DateTime<Utc>,
}

impl VideoRecord {
    pub fn new(video_id: &str, req: &IngestRequest) -> Self {
        Self {
            video_id: video_id.to_string(),
            source_kind: req.source_kind,
            source: req.source.clone(),
            fps: req.fps,
            max_frames: req.max_frames,
            enable_captions: req.enable_captions,
            created_at: Utc::now(),
        }
    }
}

/// One speech-to-text segment, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// A sampled frame with its timestamp and (possibly empty) caption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDescription {
    pub frame_file: String,
    pub timestamp: f64,
    pub caption: String,
}

/// Atomic retrieval unit: one transcript segment plus its aligned captions.
///
/// This is also the payload stored next to every vector, in the local
/// metadata log and as the networked collection's point payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub video_id: String,
    pub start: f64,
    pub end: f64,
    pub transcript: String,
    pub caption: String,
    /// Representative frame filename, if any frame was selected.
    #[serde(default)]
    pub frame_file: Option<String>,
    /// `transcript + " " + caption`, trimmed. This is what gets embedded.
    pub text: String,
    /// Caller-supplied point id. Normalized by the networked backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_id: Option<String>,
}

impl Chunk {
    pub fn new(
        video_id: &str,
        start: f64,
        end: f64,
        transcript: &str,
        caption: String,
        frame_file: Option<String>,
    ) -> Self {
        let transcript = transcript.trim().to_string();
        let text = format!("{} {}", transcript, caption).trim().to_string();
        Self {
            video_id: video_id.to_string(),
            start,
            end,
            transcript,
            caption,
            frame_file,
            text,
            point_id: None,
        }
    }
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Acquire,
    ExtractAudio,
    ExtractFrames,
    Transcribe,
    Caption,
    Align,
    Embed,
    Upsert,
    SecondaryIndex,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Acquire => "acquire",
            Stage::ExtractAudio => "extract_audio",
            Stage::ExtractFrames => "extract_frames",
            Stage::Transcribe => "transcribe",
            Stage::Caption => "caption",
            Stage::Align => "align",
            Stage::Embed => "embed",
            Stage::Upsert => "upsert",
            Stage::SecondaryIndex => "secondary_index",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an ingest ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Completed {
        video_id: String,
        chunks_indexed: usize,
    },
    /// Cancellation was observed before `stage` started.
    Cancelled { video_id: String, stage: Stage },
}

impl IngestOutcome {
    pub fn video_id(&self) -> &str {
        match self {
            IngestOutcome::Completed { video_id, .. } | IngestOutcome::Cancelled { video_id, .. } => {
                video_id
            }
        }
    }
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub video_id: String,
    pub start: f64,
    pub end: f64,
    /// Rerank score when reranking ran, otherwise raw similarity.
    pub score: f64,
    pub transcript: String,
    pub caption: String,
    pub thumbnail_path: Option<String>,
}

/// Whether an optional collaborator can be used right now.
///
/// Optional stages (captioning, reranking) check this instead of treating a
/// failed call as "absent".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Ready,
    /// Turned off by configuration or request.
    Disabled,
    /// Configured but not usable, with the reason.
    Unavailable(String),
}

impl Capability {
    pub fn is_ready(&self) -> bool {
        matches!(self, Capability::Ready)
    }
}
