//! Local flat-index backend.
//!
//! One directory per video under the index root:
//!
//! ```text
//! <root>/<video_id>/index.bin    flat f32 matrix, rewritten in full on every add
//! <root>/<video_id>/meta.jsonl   append-only chunk log, line N describes row N
//! ```
//!
//! Search is exhaustive inner product over every row, which is enough for
//! the few hundred chunks a single video produces.
//!
//! `index.bin` layout (little-endian):
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | magic `VHFI` |
//! | 4 | 4 | format version (`1`) |
//! | 8 | 4 | dimension |
//! | 12 | 8 | row count |
//! | 20 | count × dim × 4 | rows |
//!
//! # Visibility
//!
//! An add appends metadata first and then atomically renames the new index
//! file into place. Readers only join metadata lines below the index row
//! count, so a search never observes half of an add. Metadata lines left
//! behind by an interrupted add are trimmed at the start of the next add.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::{check_batch, check_dims, ScoredPoint, VectorStore};
use crate::error::{StoreError, StoreResult};
use crate::models::Chunk;

const MAGIC: &[u8; 4] = b"VHFI";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 20;

pub const INDEX_FILE: &str = "index.bin";
pub const META_FILE: &str = "meta.jsonl";

/// Flat (exhaustive) inner-product index.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dims: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add(&mut self, vectors: &[Vec<f32>]) -> StoreResult<()> {
        check_dims(self.dims, vectors.iter().map(|v| v.as_slice()))?;
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    /// Top `k` `(ordinal, inner product)` pairs, best first.
    pub fn search(&self, query: &[f32], k: usize) -> StoreResult<Vec<(usize, f32)>> {
        check_dims(self.dims, [query])?;
        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dims)
            .enumerate()
            .map(|(i, row)| (i, dot(row, query)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dims as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for &v in &self.data {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8], path: &Path) -> StoreResult<Self> {
        let corrupt = |reason: &str| StoreError::Corrupt {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };

        if bytes.len() < HEADER_LEN || &bytes[0..4] != MAGIC {
            return Err(corrupt("missing header"));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != VERSION {
            return Err(corrupt(&format!("unsupported version {}", version)));
        }
        let dims = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[12..20]);
        let count = usize::try_from(u64::from_le_bytes(count_bytes))
            .map_err(|_| corrupt("row count overflows"))?;
        let expected = count
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| corrupt("row count overflows"))?;

        let body = &bytes[HEADER_LEN..];
        if body.len() != expected {
            return Err(corrupt("row data length does not match header"));
        }
        let data = body
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self { dims, data })
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// [`VectorStore`] over per-video flat index files.
pub struct LocalStore {
    root: PathBuf,
    dims: usize,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, dims: usize) -> Self {
        Self {
            root: root.into(),
            dims,
        }
    }

    pub fn video_dir(&self, video_id: &str) -> StoreResult<PathBuf> {
        let safe = !video_id.is_empty()
            && video_id != "."
            && video_id != ".."
            && !video_id.contains(['/', '\\']);
        if !safe {
            return Err(StoreError::InvalidVideoId(video_id.to_string()));
        }
        Ok(self.root.join(video_id))
    }

    async fn load_index(&self, dir: &Path) -> StoreResult<Option<FlatIndex>> {
        let path = dir.join(INDEX_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let index = FlatIndex::from_bytes(&bytes, &path)?;
                if index.dims() != self.dims {
                    return Err(StoreError::DimensionMismatch {
                        expected: self.dims,
                        actual: index.dims(),
                    });
                }
                Ok(Some(index))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop metadata lines beyond `rows` left by an interrupted add.
    async fn trim_meta(&self, dir: &Path, rows: usize) -> StoreResult<()> {
        let path = dir.join(META_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.len() <= rows {
            return Ok(());
        }
        tracing::warn!(
            path = %path.display(),
            orphaned = lines.len() - rows,
            "trimming metadata lines without index rows"
        );
        let mut kept = lines[..rows].join("\n");
        if !kept.is_empty() {
            kept.push('\n');
        }
        write_atomic(&path, kept.as_bytes()).await
    }
}

#[async_trait]
impl VectorStore for LocalStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn add_or_upsert(&self, vectors: &[Vec<f32>], metadata: &[Chunk]) -> StoreResult<()> {
        check_batch(self.dims, vectors, metadata)?;
        let video_id = match metadata.first() {
            Some(first) => first.video_id.clone(),
            None => return Ok(()),
        };
        if let Some(other) = metadata.iter().find(|c| c.video_id != video_id) {
            return Err(StoreError::MixedVideos(video_id, other.video_id.clone()));
        }

        let dir = self.video_dir(&video_id)?;
        tokio::fs::create_dir_all(&dir).await?;

        let mut index = self
            .load_index(&dir)
            .await?
            .unwrap_or_else(|| FlatIndex::new(self.dims));
        self.trim_meta(&dir, index.len()).await?;
        index.add(vectors)?;

        let mut lines = String::new();
        for chunk in metadata {
            lines.push_str(&serde_json::to_string(chunk)?);
            lines.push('\n');
        }
        let mut log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(META_FILE))
            .await?;
        log.write_all(lines.as_bytes()).await?;
        log.sync_all().await?;

        write_atomic(&dir.join(INDEX_FILE), &index.to_bytes()).await?;
        tracing::debug!(video_id = %video_id, rows = index.len(), "local index written");
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        video_id: Option<&str>,
    ) -> StoreResult<Vec<ScoredPoint>> {
        let video_id = video_id.ok_or(StoreError::FilterRequired)?;
        let dir = self.video_dir(video_id)?;
        let index = self
            .load_index(&dir)
            .await?
            .ok_or_else(|| StoreError::NotFound(video_id.to_string()))?;

        let content = match tokio::fs::read_to_string(dir.join(META_FILE)).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let metas: Vec<Chunk> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .take(index.len())
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;

        let hits = index.search(query, top_k)?;
        Ok(hits
            .into_iter()
            .filter_map(|(ordinal, score)| {
                metas.get(ordinal).map(|chunk| ScoredPoint {
                    score: score as f64,
                    chunk: chunk.clone(),
                })
            })
            .collect())
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::normalize;
    use tempfile::TempDir;

    fn chunk(video_id: &str, i: usize) -> Chunk {
        Chunk::new(
            video_id,
            i as f64,
            i as f64 + 1.0,
            &format!("segment {}", i),
            String::new(),
            None,
        )
    }

    fn unit(seed: usize, dims: usize) -> Vec<f32> {
        let mut v: Vec<f32> = (0..dims)
            .map(|j| ((seed * 31 + j * 7) % 13) as f32 - 6.0)
            .collect();
        normalize(&mut v);
        v
    }

    #[test]
    fn flat_index_bytes_roundtrip() {
        let mut index = FlatIndex::new(3);
        index.add(&[vec![1.0, 2.0, 3.0], vec![-1.0, 0.5, 0.0]]).unwrap();
        let bytes = index.to_bytes();
        let back = FlatIndex::from_bytes(&bytes, Path::new("x")).unwrap();
        assert_eq!(back, index);
        assert_eq!(back.len(), 2);
    }

    #[test]
    fn flat_index_rejects_truncated_file() {
        let mut index = FlatIndex::new(2);
        index.add(&[vec![1.0, 0.0]]).unwrap();
        let bytes = index.to_bytes();
        let err = FlatIndex::from_bytes(&bytes[..bytes.len() - 1], Path::new("x")).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn flat_index_rejects_overflowing_row_count() {
        let mut bytes = FlatIndex::new(4).to_bytes();
        bytes[12..20].copy_from_slice(&(1u64 << 62).to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        let err = FlatIndex::from_bytes(&bytes, Path::new("x")).unwrap_err();
        match err {
            StoreError::Corrupt { reason, .. } => assert_eq!(reason, "row count overflows"),
            other => panic!("expected corrupt index, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn query_with_stored_vector_ranks_it_first() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path(), 8);
        let vectors: Vec<Vec<f32>> = (0..10).map(|i| unit(i, 8)).collect();
        let metas: Vec<Chunk> = (0..10).map(|i| chunk("vid", i)).collect();
        store.add_or_upsert(&vectors, &metas).await.unwrap();

        let hits = store.search(&vectors[6], 3, Some("vid")).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk, metas[6]);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn second_add_appends_rows() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path(), 4);
        store
            .add_or_upsert(&[unit(1, 4)], &[chunk("v", 0)])
            .await
            .unwrap();
        store
            .add_or_upsert(&[unit(2, 4)], &[chunk("v", 1)])
            .await
            .unwrap();

        let hits = store.search(&unit(2, 4), 10, Some("v")).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.start, 1.0);
    }

    #[tokio::test]
    async fn orphaned_metadata_is_invisible_and_trimmed() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path(), 4);
        store
            .add_or_upsert(&[unit(1, 4)], &[chunk("v", 0)])
            .await
            .unwrap();

        // Simulate an add that appended metadata but never renamed its index.
        let meta_path = tmp.path().join("v").join(META_FILE);
        let mut content = std::fs::read_to_string(&meta_path).unwrap();
        content.push_str(&serde_json::to_string(&chunk("v", 99)).unwrap());
        content.push('\n');
        std::fs::write(&meta_path, content).unwrap();

        let hits = store.search(&unit(1, 4), 10, Some("v")).await.unwrap();
        assert_eq!(hits.len(), 1);

        store
            .add_or_upsert(&[unit(3, 4)], &[chunk("v", 2)])
            .await
            .unwrap();
        let lines = std::fs::read_to_string(&meta_path).unwrap();
        assert_eq!(lines.lines().count(), 2);
        assert!(!lines.contains("segment 99"));
    }

    #[tokio::test]
    async fn missing_index_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path(), 4);
        let err = store.search(&unit(0, 4), 5, Some("nope")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn search_requires_video_id() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path(), 4);
        let err = store.search(&unit(0, 4), 5, None).await.unwrap_err();
        assert!(matches!(err, StoreError::FilterRequired));
    }

    #[tokio::test]
    async fn rejects_mismatched_inputs() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path(), 4);

        let err = store
            .add_or_upsert(&[unit(0, 4), unit(1, 4)], &[chunk("v", 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LengthMismatch { vectors: 2, metadata: 1 }));

        let err = store
            .add_or_upsert(&[vec![1.0; 3]], &[chunk("v", 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 4, actual: 3 }));

        let err = store
            .add_or_upsert(&[unit(0, 4), unit(1, 4)], &[chunk("a", 0), chunk("b", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MixedVideos(..)));

        let err = store
            .add_or_upsert(&[unit(0, 4)], &[chunk("../escape", 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidVideoId(_)));
        assert!(!tmp.path().join("v").exists());
    }
}
