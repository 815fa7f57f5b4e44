//! Media acquisition and decoding.
//!
//! Both concerns are capability traits so the orchestrator can be driven
//! with fakes in tests. The default implementations shell out to `yt-dlp`
//! and `ffmpeg`, which must be on `PATH` (or configured under `[media]`).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use walkdir::WalkDir;

use crate::chunk::parse_frame_number;
use crate::config::MediaConfig;

/// Fetches a remote video to a local file.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Download `url` to `dest`. On success `dest` exists and is non-empty.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Decodes a video file into an audio track and sampled frames.
#[async_trait]
pub trait MediaDecoder: Send + Sync {
    async fn extract_audio(&self, video: &Path, dest: &Path) -> Result<()>;

    /// Sample frames at `fps` into `frames_dir` as `frame_%06d.jpg`.
    ///
    /// Returns the frame paths ordered by their 1-based ordinal.
    async fn extract_frames(
        &self,
        video: &Path,
        frames_dir: &Path,
        fps: f64,
        max_frames: Option<usize>,
    ) -> Result<Vec<PathBuf>>;
}

// ============ yt-dlp ============

/// [`MediaFetcher`] backed by the `yt-dlp` executable.
///
/// When YouTube signature extraction breaks (a common failure with an
/// outdated `yt-dlp`), the download is retried once with the android player
/// client before giving up.
pub struct YtDlpFetcher {
    program: String,
}

impl YtDlpFetcher {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            program: config.ytdlp.clone(),
        }
    }

    fn args(url: &str, dest: &Path, android_client: bool) -> Vec<String> {
        let mut args = Vec::new();
        if android_client {
            args.push("--extractor-args".to_string());
            args.push("youtube:player_client=android".to_string());
        }
        args.extend(
            [
                "-f",
                "bv*+ba/best",
                "--merge-output-format",
                "mp4",
                "--retries",
                "3",
                "--fragment-retries",
                "3",
                "--concurrent-fragments",
                "4",
                "-o",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(dest.display().to_string());
        args.push(url.to_string());
        args
    }

    async fn run(&self, args: &[String]) -> Result<std::result::Result<(), String>> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to execute '{}'. Is yt-dlp installed?", self.program))?;
        if output.status.success() {
            return Ok(Ok(()));
        }
        let mut msg = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if msg.is_empty() {
            msg = String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
        Ok(Err(msg))
    }
}

/// Whether a yt-dlp failure message looks like a signature extraction problem.
pub fn needs_player_fallback(message: &str) -> bool {
    message.contains("nsig extraction failed")
        || message.contains("Signature extraction")
        || message.contains("downloaded file is empty")
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if let Err(msg) = self.run(&Self::args(url, dest, false)).await? {
            if !needs_player_fallback(&msg) {
                bail!("yt-dlp failed: {}", msg);
            }
            tracing::warn!(url, "yt-dlp signature extraction failed, retrying with android client");
            if let Err(msg) = self.run(&Self::args(url, dest, true)).await? {
                bail!(
                    "yt-dlp failed (YouTube extraction). yt-dlp may need an update or the video is restricted: {}",
                    msg
                );
            }
        }

        ensure_non_empty(dest)
            .await
            .context("yt-dlp reported success but produced no video")
    }
}

/// Fail unless `path` is an existing, non-empty file.
pub async fn ensure_non_empty(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() && m.len() > 0 => Ok(()),
        Ok(_) => bail!("output file is empty: {}", path.display()),
        Err(_) => bail!("output file is missing: {}", path.display()),
    }
}

// ============ ffmpeg ============

/// [`MediaDecoder`] backed by the `ffmpeg` executable.
pub struct FfmpegDecoder {
    program: String,
}

impl FfmpegDecoder {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            program: config.ffmpeg.clone(),
        }
    }

    async fn run(&self, args: &[String], what: &str) -> Result<()> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to execute '{}'. Is ffmpeg installed?", self.program))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("ffmpeg {} failed: {}", what, tail(stderr.trim(), 2000));
        }
        Ok(())
    }
}

// ffmpeg prints its banner first; the useful part of the error is at the end.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[async_trait]
impl MediaDecoder for FfmpegDecoder {
    async fn extract_audio(&self, video: &Path, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            video.display().to_string(),
            "-q:a".to_string(),
            "0".to_string(),
            "-map".to_string(),
            "a".to_string(),
            dest.display().to_string(),
        ];
        self.run(&args, "audio extraction").await
    }

    async fn extract_frames(
        &self,
        video: &Path,
        frames_dir: &Path,
        fps: f64,
        max_frames: Option<usize>,
    ) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(frames_dir).await?;
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            video.display().to_string(),
            "-vf".to_string(),
            format!("fps={}", fps),
        ];
        if let Some(n) = max_frames {
            args.push("-frames:v".to_string());
            args.push(n.to_string());
        }
        args.push(frames_dir.join("frame_%06d.jpg").display().to_string());
        self.run(&args, "frame extraction").await?;

        let mut frames = list_frames(frames_dir)?;
        if let Some(n) = max_frames {
            frames.truncate(n);
        }
        Ok(frames)
    }
}

/// List `frame_NNNNNN.*` files in `dir`, ordered by frame number.
///
/// Files whose name carries no frame number are ignored.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames: Vec<(u64, PathBuf)> = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if let Some(n) = parse_frame_number(&name) {
            frames.push((n, entry.into_path()));
        }
    }
    frames.sort_by_key(|(n, _)| *n);
    Ok(frames.into_iter().map(|(_, p)| p).collect())
}
