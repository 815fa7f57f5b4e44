//! Ingestion pipeline orchestration.
//!
//! Drives one video through a fixed sequence of stages:
//!
//! ```text
//! acquire → extract_audio → extract_frames → transcribe → caption
//!         → align → embed → upsert → secondary_index
//! ```
//!
//! - The cancellation token is checked before every stage. When it is set
//!   the ingest stops with [`IngestOutcome::Cancelled`] and whatever was
//!   already persisted stays on disk. Collaborator calls in flight are not
//!   interrupted.
//! - `extract_frames` is skipped when `fps <= 0` or `max_frames == 0`.
//!   `caption` is skipped (the captioner is never called) when captions are
//!   off for the request or the captioner is not ready.
//! - Any collaborator failure up to and including `upsert` is fatal and
//!   returned as [`IngestError::Stage`] with its original error chain.
//! - `secondary_index` failures are logged and swallowed.
//!
//! The metadata record is written before acquisition, so even a failed or
//! cancelled ingest leaves `meta/<video_id>/meta.json` behind.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::cancel::{CancelRegistry, CancelToken, IngestHandle};
use crate::caption::{create_captioner, Captioner};
use crate::chunk::{align_transcript_and_captions, frame_timestamp, parse_frame_number};
use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingGateway};
use crate::error::IngestError;
use crate::keyword_index::{KeywordIndexer, SecondaryIndexer};
use crate::layout::{write_json, DataLayout};
use crate::media::{ensure_non_empty, FfmpegDecoder, MediaDecoder, MediaFetcher, YtDlpFetcher};
use crate::models::{
    Capability, Chunk, FrameDescription, IngestOutcome, IngestRequest, SourceKind, Stage,
    TranscriptSegment, VideoRecord,
};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, NoProgress};
use crate::store::{open_store, VectorStore};
use crate::transcribe::{HttpTranscriber, Transcriber};

/// Everything the pipeline delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn MediaFetcher>,
    pub decoder: Arc<dyn MediaDecoder>,
    pub transcriber: Arc<dyn Transcriber>,
    pub captioner: Arc<dyn Captioner>,
    pub embedder: EmbeddingGateway,
    pub store: Arc<dyn VectorStore>,
    pub secondary: Arc<dyn SecondaryIndexer>,
}

impl Collaborators {
    /// Build the default collaborators. Opens (and for the networked
    /// backend, connects to) the vector store.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder = EmbeddingGateway::new(
            create_provider(&config.embedding)?,
            config.embedding.batch_size,
        );
        let store = open_store(config, embedder.dims()).await?;
        Ok(Self {
            fetcher: Arc::new(YtDlpFetcher::new(&config.media)),
            decoder: Arc::new(FfmpegDecoder::new(&config.media)),
            transcriber: Arc::new(HttpTranscriber::new(&config.transcription)?),
            captioner: create_captioner(&config.captioning)?,
            embedder,
            store,
            secondary: Arc::new(KeywordIndexer::new(DataLayout::new(config))),
        })
    }
}

/// Runs ingests and owns the registry used to cancel them.
pub struct Orchestrator {
    layout: DataLayout,
    collab: Collaborators,
    registry: Arc<CancelRegistry>,
    progress: Arc<dyn IngestProgressReporter>,
}

/// A new 10-hex-character video id.
pub fn new_video_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(10);
    id
}

impl Orchestrator {
    pub fn new(layout: DataLayout, collab: Collaborators) -> Self {
        Self {
            layout,
            collab,
            registry: Arc::new(CancelRegistry::new()),
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn IngestProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn registry(&self) -> &Arc<CancelRegistry> {
        &self.registry
    }

    /// Ingest under a fresh handle.
    pub async fn ingest(&self, req: &IngestRequest) -> Result<IngestOutcome, IngestError> {
        self.ingest_as(IngestHandle::new(), req).await
    }

    /// Ingest under `handle`, so the caller can cancel it through the registry.
    pub async fn ingest_as(
        &self,
        handle: IngestHandle,
        req: &IngestRequest,
    ) -> Result<IngestOutcome, IngestError> {
        let token = self.registry.register_as(handle.clone());
        let result = self.ingest_with_token(req, &token).await;
        self.registry.complete(&handle);
        result
    }

    /// Ingest observing an externally owned token.
    pub async fn ingest_with_token(
        &self,
        req: &IngestRequest,
        token: &CancelToken,
    ) -> Result<IngestOutcome, IngestError> {
        validate(req).await?;

        let video_id = new_video_id();
        let run = Run {
            orch: self,
            token,
            video_id: video_id.clone(),
        };
        tracing::info!(video_id = %video_id, source = %req.source, kind = %req.source_kind, "ingest started");

        write_json(&self.layout.meta_file(&video_id), &VideoRecord::new(&video_id, req)).await?;

        let result = run.execute(req).await;
        match &result {
            Ok(IngestOutcome::Completed { chunks_indexed, .. }) => {
                tracing::info!(video_id = %video_id, chunks = chunks_indexed, "ingest finished");
                self.progress.report(IngestProgressEvent::Finished {
                    video_id: video_id.clone(),
                    chunks: *chunks_indexed,
                });
            }
            Ok(IngestOutcome::Cancelled { stage, .. }) => {
                tracing::info!(video_id = %video_id, %stage, "ingest cancelled");
                self.progress.report(IngestProgressEvent::Cancelled {
                    video_id: video_id.clone(),
                    stage: *stage,
                });
            }
            Err(e) => tracing::error!(video_id = %video_id, error = %e, "ingest failed"),
        }
        result
    }
}

/// Reject malformed requests and missing local sources before any artifact is written.
async fn validate(req: &IngestRequest) -> Result<(), IngestError> {
    if req.source.trim().is_empty() {
        return Err(IngestError::InvalidSource("source must not be empty".into()));
    }
    if !req.fps.is_finite() {
        return Err(IngestError::InvalidSource(format!("fps must be finite, got {}", req.fps)));
    }
    if req.source_kind == SourceKind::Local {
        match tokio::fs::metadata(&req.source).await {
            Ok(m) if m.is_file() => {}
            _ => return Err(IngestError::NotFound(format!("local video {}", req.source))),
        }
    }
    Ok(())
}

struct Run<'a> {
    orch: &'a Orchestrator,
    token: &'a CancelToken,
    video_id: String,
}

impl Run<'_> {
    /// Stage boundary: returns the cancelled outcome, or announces the stage.
    fn enter(&self, stage: Stage) -> Option<IngestOutcome> {
        if self.token.is_cancelled() {
            return Some(IngestOutcome::Cancelled {
                video_id: self.video_id.clone(),
                stage,
            });
        }
        tracing::info!(video_id = %self.video_id, %stage, "stage started");
        self.orch.progress.report(IngestProgressEvent::Stage {
            video_id: self.video_id.clone(),
            stage,
        });
        None
    }

    fn skip(&self, stage: Stage, reason: &'static str) {
        tracing::info!(video_id = %self.video_id, %stage, reason, "stage skipped");
        self.orch.progress.report(IngestProgressEvent::Skipped {
            video_id: self.video_id.clone(),
            stage,
            reason,
        });
    }

    async fn execute(&self, req: &IngestRequest) -> Result<IngestOutcome, IngestError> {
        let layout = &self.orch.layout;
        let c = &self.orch.collab;
        let id = self.video_id.as_str();

        if let Some(outcome) = self.enter(Stage::Acquire) {
            return Ok(outcome);
        }
        let video = layout.video_file(id);
        self.acquire(req, &video)
            .await
            .map_err(|e| IngestError::stage(Stage::Acquire, e))?;

        if let Some(outcome) = self.enter(Stage::ExtractAudio) {
            return Ok(outcome);
        }
        let audio = layout.audio_file(id);
        c.decoder
            .extract_audio(&video, &audio)
            .await
            .map_err(|e| IngestError::stage(Stage::ExtractAudio, e))?;

        let frames: Vec<PathBuf> = if req.wants_frames() {
            if let Some(outcome) = self.enter(Stage::ExtractFrames) {
                return Ok(outcome);
            }
            c.decoder
                .extract_frames(&video, &layout.frames_dir(id), req.fps, req.max_frames)
                .await
                .map_err(|e| IngestError::stage(Stage::ExtractFrames, e))?
        } else {
            self.skip(Stage::ExtractFrames, "sampling disabled");
            Vec::new()
        };

        if let Some(outcome) = self.enter(Stage::Transcribe) {
            return Ok(outcome);
        }
        let segments: Vec<TranscriptSegment> = c
            .transcriber
            .transcribe(&audio)
            .await
            .map_err(|e| IngestError::stage(Stage::Transcribe, e))?;
        write_json(&layout.transcript_file(id), &segments).await?;

        let descriptions = if frames.is_empty() {
            self.skip(Stage::Caption, "no frames");
            Vec::new()
        } else if !req.enable_captions {
            self.skip(Stage::Caption, "captions off");
            describe_frames(&frames, req.fps, None)
        } else {
            match c.captioner.availability() {
                Capability::Ready => {
                    if let Some(outcome) = self.enter(Stage::Caption) {
                        return Ok(outcome);
                    }
                    let mut captions = Vec::with_capacity(frames.len());
                    for frame in &frames {
                        let caption = c
                            .captioner
                            .caption(frame)
                            .await
                            .map_err(|e| IngestError::stage(Stage::Caption, e))?;
                        captions.push(caption);
                    }
                    describe_frames(&frames, req.fps, Some(captions))
                }
                Capability::Disabled => {
                    self.skip(Stage::Caption, "captioner disabled");
                    describe_frames(&frames, req.fps, None)
                }
                Capability::Unavailable(reason) => {
                    tracing::warn!(video_id = %id, %reason, "captioner unavailable");
                    self.skip(Stage::Caption, "captioner unavailable");
                    describe_frames(&frames, req.fps, None)
                }
            }
        };

        if let Some(outcome) = self.enter(Stage::Align) {
            return Ok(outcome);
        }
        let chunks: Vec<Chunk> = align_transcript_and_captions(id, &segments, &descriptions);
        write_json(&layout.chunks_file(id), &chunks).await?;

        if let Some(outcome) = self.enter(Stage::Embed) {
            return Ok(outcome);
        }
        let texts: Vec<String> = chunks.iter().map(|ch| ch.text.clone()).collect();
        let vectors = c
            .embedder
            .embed_texts(&texts)
            .await
            .map_err(|e| IngestError::stage(Stage::Embed, e))?;

        if let Some(outcome) = self.enter(Stage::Upsert) {
            return Ok(outcome);
        }
        c.store
            .add_or_upsert(&vectors, &chunks)
            .await
            .map_err(|e| IngestError::stage(Stage::Upsert, e))?;

        if let Some(outcome) = self.enter(Stage::SecondaryIndex) {
            return Ok(outcome);
        }
        if let Err(e) = c.secondary.build(id, &chunks).await {
            tracing::warn!(video_id = %id, error = %format!("{:#}", e), "secondary index build failed; continuing");
        }

        Ok(IngestOutcome::Completed {
            video_id: self.video_id.clone(),
            chunks_indexed: chunks.len(),
        })
    }

    async fn acquire(&self, req: &IngestRequest, dest: &Path) -> Result<()> {
        match req.source_kind {
            SourceKind::Remote => self.orch.collab.fetcher.fetch(&req.source, dest).await,
            SourceKind::Local => {
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::copy(&req.source, dest).await?;
                ensure_non_empty(dest).await
            }
        }
    }
}

/// Pair frame files with timestamps and (optionally) captions.
///
/// The timestamp comes from the ordinal in the file name, falling back to
/// the 1-based list position for files that carry none.
fn describe_frames(frames: &[PathBuf], fps: f64, captions: Option<Vec<String>>) -> Vec<FrameDescription> {
    let mut captions = captions.map(|c| c.into_iter());
    frames
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let frame_file = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let ordinal = parse_frame_number(&frame_file).unwrap_or(i as u64 + 1);
            FrameDescription {
                timestamp: frame_timestamp(ordinal, fps),
                caption: captions
                    .as_mut()
                    .and_then(|c| c.next())
                    .unwrap_or_default(),
                frame_file,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_ids_are_ten_hex_chars() {
        let id = new_video_id();
        assert_eq!(id.len(), 10);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_video_id());
    }

    #[test]
    fn frames_get_timestamps_from_ordinals() {
        let frames = vec![
            PathBuf::from("/f/frame_000001.jpg"),
            PathBuf::from("/f/frame_000003.jpg"),
        ];
        let described = describe_frames(&frames, 2.0, Some(vec!["a".into(), "b".into()]));
        assert_eq!(described[0].timestamp, 0.0);
        assert_eq!(described[1].timestamp, 1.0);
        assert_eq!(described[1].caption, "b");
        assert_eq!(described[1].frame_file, "frame_000003.jpg");

        let uncaptioned = describe_frames(&frames, 2.0, None);
        assert!(uncaptioned.iter().all(|f| f.caption.is_empty()));
    }
}
