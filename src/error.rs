//! Typed failures for ingestion and vector storage.
//!
//! Most plumbing in the crate returns [`anyhow::Result`]. The two enums here
//! exist because callers branch on the failure kind: the HTTP surface maps
//! [`IngestError::NotFound`] to 404 and [`IngestError::InvalidSource`] to
//! 400, and the store constructor must report an unreachable service as a
//! configuration failure rather than a search miss.
//!
//! Cancellation is deliberately absent from [`IngestError`]; a cancelled
//! ingest is reported through [`IngestOutcome::Cancelled`](crate::models::IngestOutcome).

use thiserror::Error;

use crate::models::Stage;

/// Fatal ingest failures.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The request named an unknown source kind or an unusable parameter.
    #[error("invalid ingest request: {0}")]
    InvalidSource(String),

    /// A local source file (or another required input) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A collaborator failed. The original error chain is preserved.
    #[error("{stage} stage failed: {source:#}")]
    Stage {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    /// Writing the artifact tree failed.
    #[error("artifact write failed: {0}")]
    Artifact(#[from] std::io::Error),
}

impl IngestError {
    pub fn stage(stage: Stage, source: impl Into<anyhow::Error>) -> Self {
        IngestError::Stage {
            stage,
            source: source.into(),
        }
    }
}

/// Vector store failures, shared by both backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector store at {endpoint} is unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("no vector index for video {0}")]
    NotFound(String),

    #[error("vector has dimension {actual}, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{vectors} vectors but {metadata} metadata records")]
    LengthMismatch { vectors: usize, metadata: usize },

    #[error("local backend writes one video per call, got {0} and {1}")]
    MixedVideos(String, String),

    #[error("invalid video id '{0}'")]
    InvalidVideoId(String),

    #[error("local backend requires a video_id to search")]
    FilterRequired,

    #[error("corrupt index file {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("vector store request failed: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
