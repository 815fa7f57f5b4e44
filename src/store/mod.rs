//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait is the uniform add/search contract used by the
//! ingest pipeline and the retrieval engine. Two backends implement it:
//!
//! | Backend | Module | Layout |
//! |---------|--------|--------|
//! | Local | [`local`] | one flat index file + metadata log per video |
//! | Networked | [`qdrant`] | one Qdrant collection per embedding dimension, `video_id` payload filter |
//!
//! The backend is chosen once per process by [`open_store`]; there is no
//! per-call fallback from one backend to the other.
//!
//! All stored and query vectors are unit-normalized by the
//! [`EmbeddingGateway`](crate::embedding::EmbeddingGateway), so inner product
//! equals cosine similarity in both backends.

pub mod local;
pub mod qdrant;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Config, VectorStoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::models::Chunk;

pub use local::LocalStore;
pub use qdrant::{normalize_point_id, PointId, QdrantStore};

/// A search result: similarity score plus the stored chunk metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub score: f64,
    pub chunk: Chunk,
}

/// Abstract vector storage backend.
///
/// # Contract
///
/// - [`add_or_upsert`](VectorStore::add_or_upsert) requires one metadata
///   record per vector, and every vector must have length [`dims`](VectorStore::dims).
///   A search issued after the call returns sees all of the call's writes or
///   none of them.
/// - [`search`](VectorStore::search) returns at most `top_k` points in
///   descending similarity.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;

    /// Vector dimension accepted by this store.
    fn dims(&self) -> usize;

    async fn add_or_upsert(&self, vectors: &[Vec<f32>], metadata: &[Chunk]) -> StoreResult<()>;

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        video_id: Option<&str>,
    ) -> StoreResult<Vec<ScoredPoint>>;
}

/// Open the configured backend for vectors of dimension `dims`.
///
/// # Errors
///
/// For the networked backend, an unreachable service is reported as
/// [`StoreError::Unreachable`]. It is never downgraded to the local backend.
pub async fn open_store(config: &Config, dims: usize) -> StoreResult<Arc<dyn VectorStore>> {
    match &config.vector_store {
        VectorStoreConfig::Local { .. } => {
            Ok(Arc::new(LocalStore::new(config.local_index_dir(), dims)))
        }
        VectorStoreConfig::Networked {
            url,
            api_key,
            collection,
            timeout_secs,
        } => {
            let api_key = api_key
                .clone()
                .or_else(|| std::env::var("QDRANT_API_KEY").ok());
            let store = QdrantStore::connect(url, api_key, collection, dims, *timeout_secs).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Shared input validation for both backends.
pub(crate) fn check_batch(dims: usize, vectors: &[Vec<f32>], metadata: &[Chunk]) -> StoreResult<()> {
    if vectors.len() != metadata.len() {
        return Err(StoreError::LengthMismatch {
            vectors: vectors.len(),
            metadata: metadata.len(),
        });
    }
    check_dims(dims, vectors.iter().map(|v| v.as_slice()))
}

pub(crate) fn check_dims<'a>(
    dims: usize,
    vectors: impl IntoIterator<Item = &'a [f32]>,
) -> StoreResult<()> {
    for v in vectors {
        if v.len() != dims {
            return Err(StoreError::DimensionMismatch {
                expected: dims,
                actual: v.len(),
            });
        }
    }
    Ok(())
}
