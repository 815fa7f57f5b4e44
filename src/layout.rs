//! On-disk artifact tree.
//!
//! Every artifact an ingest produces lives under the data directory, keyed
//! by video id:
//!
//! ```text
//! <data_dir>/
//! ├── meta/<id>/meta.json              VideoRecord, written first
//! ├── videos/<id>/video.mp4            acquired source
//! ├── audio/<id>/audio.mp3
//! ├── frames/<id>/frame_000001.jpg ...
//! ├── transcripts/<id>/transcript.json
//! ├── chunks/<id>/chunks.json          ordered chunk list
//! └── index/<id>/                      local vector index + keyword.db
//! ```

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::keyword_index::KEYWORD_DB_FILE;

#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
    index_root: PathBuf,
}

impl DataLayout {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.storage.data_dir.clone(),
            index_root: config.local_index_dir(),
        }
    }

    /// Layout rooted at `root` with the index under `root/index`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            index_root: root.join("index"),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_root(&self) -> &Path {
        &self.index_root
    }

    pub fn meta_file(&self, video_id: &str) -> PathBuf {
        self.root.join("meta").join(video_id).join("meta.json")
    }

    pub fn video_file(&self, video_id: &str) -> PathBuf {
        self.root.join("videos").join(video_id).join("video.mp4")
    }

    pub fn audio_file(&self, video_id: &str) -> PathBuf {
        self.root.join("audio").join(video_id).join("audio.mp3")
    }

    pub fn frames_dir(&self, video_id: &str) -> PathBuf {
        self.root.join("frames").join(video_id)
    }

    pub fn transcript_file(&self, video_id: &str) -> PathBuf {
        self.root
            .join("transcripts")
            .join(video_id)
            .join("transcript.json")
    }

    pub fn chunks_file(&self, video_id: &str) -> PathBuf {
        self.root.join("chunks").join(video_id).join("chunks.json")
    }

    pub fn index_dir(&self, video_id: &str) -> PathBuf {
        self.index_root.join(video_id)
    }

    pub fn keyword_db(&self, video_id: &str) -> PathBuf {
        self.index_dir(video_id).join(KEYWORD_DB_FILE)
    }
}

/// Whether `video_id` can be used as a single path component.
pub fn is_safe_video_id(video_id: &str) -> bool {
    !video_id.is_empty()
        && video_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Write `value` as pretty JSON, creating parent directories.
pub(crate) async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, json).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifacts_are_keyed_by_video_id() {
        let layout = DataLayout::with_root("/data");
        assert_eq!(
            layout.video_file("abc"),
            PathBuf::from("/data/videos/abc/video.mp4")
        );
        assert_eq!(
            layout.keyword_db("abc"),
            PathBuf::from("/data/index/abc/keyword.db")
        );
        assert_eq!(
            layout.meta_file("abc"),
            PathBuf::from("/data/meta/abc/meta.json")
        );
    }

    #[test]
    fn rejects_path_like_ids() {
        assert!(is_safe_video_id("3f2a9c01bd"));
        assert!(!is_safe_video_id("../etc"));
        assert!(!is_safe_video_id("a/b"));
        assert!(!is_safe_video_id(""));
    }
}
