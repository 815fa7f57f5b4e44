//! Read back what an ingest persisted.
//!
//! Used by `vh meta` and `GET /videos/{id}/meta`.

use serde::Serialize;
use std::path::Path;

use crate::error::IngestError;
use crate::layout::{is_safe_video_id, DataLayout};
use crate::models::{Chunk, VideoRecord};

/// Metadata record plus chunk count, as served by the meta endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct VideoMetaResponse {
    #[serde(flatten)]
    pub record: VideoRecord,
    /// `None` until the align stage has written the chunk list.
    pub chunks: Option<usize>,
}

async fn read_json<T: serde::de::DeserializeOwned>(
    path: &Path,
    what: &str,
    video_id: &str,
) -> Result<T, IngestError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(IngestError::NotFound(format!("{} for video {}", what, video_id)))
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes).map_err(|e| {
        IngestError::Artifact(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{}: {}", path.display(), e),
        ))
    })
}

fn check_id(video_id: &str) -> Result<(), IngestError> {
    if is_safe_video_id(video_id) {
        Ok(())
    } else {
        Err(IngestError::NotFound(format!("video {}", video_id)))
    }
}

/// Load `meta/<id>/meta.json`.
pub async fn load_video_record(layout: &DataLayout, video_id: &str) -> Result<VideoRecord, IngestError> {
    check_id(video_id)?;
    read_json(&layout.meta_file(video_id), "metadata", video_id).await
}

/// Load the ordered chunk list written by the align stage.
pub async fn load_chunks(layout: &DataLayout, video_id: &str) -> Result<Vec<Chunk>, IngestError> {
    check_id(video_id)?;
    read_json(&layout.chunks_file(video_id), "chunk list", video_id).await
}

pub async fn get_video_meta(layout: &DataLayout, video_id: &str) -> Result<VideoMetaResponse, IngestError> {
    let record = load_video_record(layout, video_id).await?;
    let chunks = match load_chunks(layout, video_id).await {
        Ok(c) => Some(c.len()),
        Err(IngestError::NotFound(_)) => None,
        Err(e) => return Err(e),
    };
    Ok(VideoMetaResponse { record, chunks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::write_json;
    use crate::models::IngestRequest;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let layout = DataLayout::with_root(tmp.path());
        let err = load_video_record(&layout, "nothere").await.unwrap_err();
        assert!(matches!(err, IngestError::NotFound(_)));
        let err = load_video_record(&layout, "../x").await.unwrap_err();
        assert!(matches!(err, IngestError::NotFound(_)));
    }

    #[tokio::test]
    async fn meta_without_chunks_reports_none() {
        let tmp = TempDir::new().unwrap();
        let layout = DataLayout::with_root(tmp.path());
        let record = VideoRecord::new("v1", &IngestRequest::local("/tmp/a.mp4"));
        write_json(&layout.meta_file("v1"), &record).await.unwrap();

        let meta = get_video_meta(&layout, "v1").await.unwrap();
        assert_eq!(meta.record.video_id, "v1");
        assert_eq!(meta.chunks, None);
    }
}
