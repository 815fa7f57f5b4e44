//! Speech-to-text collaborator.
//!
//! The default [`HttpTranscriber`] talks to any server implementing the
//! OpenAI-compatible `POST /v1/audio/transcriptions` endpoint
//! (faster-whisper-server, whisper.cpp server, LocalAI, ...) and asks for
//! `verbose_json` so segment timings come back.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

use crate::config::TranscriptionConfig;
use crate::http::build_client;
use crate::models::TranscriptSegment;

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an audio file into ordered, time-stamped segments.
    async fn transcribe(&self, audio: &Path) -> Result<Vec<TranscriptSegment>>;
}

pub struct HttpTranscriber {
    url: String,
    model: String,
    client: reqwest::Client,
}

impl HttpTranscriber {
    pub fn new(config: &TranscriptionConfig) -> Result<Self> {
        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client: build_client(config.timeout_secs)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    segments: Option<Vec<RawSegment>>,
}

#[derive(Debug, Deserialize)]
struct RawSegment {
    start: f64,
    end: f64,
    #[serde(default)]
    text: String,
}

/// Turn a `verbose_json` response into segments.
///
/// Servers that return only `text` yield one segment spanning `duration`,
/// or none when that text is blank. Segment text is trimmed; a timed segment
/// whose text trims to nothing is kept, so its span still becomes a chunk
/// with an empty transcript.
pub fn parse_transcription(body: serde_json::Value) -> Result<Vec<TranscriptSegment>> {
    let parsed: VerboseTranscription =
        serde_json::from_value(body).context("Invalid transcription response")?;

    let raw = match parsed.segments {
        Some(segments) => segments,
        None if parsed.text.trim().is_empty() => Vec::new(),
        None => vec![RawSegment {
            start: 0.0,
            end: parsed.duration.unwrap_or(0.0),
            text: parsed.text,
        }],
    };

    let mut segments: Vec<TranscriptSegment> = raw
        .into_iter()
        .map(|s| TranscriptSegment {
            start: s.start,
            end: s.end.max(s.start),
            text: s.text.trim().to_string(),
        })
        .collect();
    segments.sort_by(|a, b| {
        a.start
            .partial_cmp(&b.start)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(segments)
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: &Path) -> Result<Vec<TranscriptSegment>> {
        let bytes = tokio::fs::read(audio)
            .await
            .with_context(|| format!("Failed to read audio file: {}", audio.display()))?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.mp3".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/mpeg")?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .part("file", part);

        let url = format!("{}/v1/audio/transcriptions", self.url);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("Transcription connection error ({})", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Transcription API error {}: {}", status, body);
        }

        let segments = parse_transcription(response.json().await?)?;
        tracing::debug!(segments = segments.len(), model = %self.model, "transcribed audio");
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_verbose_segments() {
        let body = json!({
            "text": "hello world",
            "segments": [
                { "id": 1, "start": 2.0, "end": 4.5, "text": " world " },
                { "id": 0, "start": 0.0, "end": 2.0, "text": " hello" },
                { "id": 2, "start": 4.5, "end": 5.0, "text": "   " }
            ]
        });
        let segments = parse_transcription(body).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].text, "hello");
        assert_eq!(segments[1].start, 2.0);
        assert_eq!(segments[1].text, "world");
    }

    #[test]
    fn silent_segments_keep_their_span() {
        let body = json!({
            "text": "intro",
            "segments": [
                { "start": 0.0, "end": 3.0, "text": "intro" },
                { "start": 3.0, "end": 9.0, "text": "   " },
                { "start": 9.0, "end": 8.0, "text": "" }
            ]
        });
        let segments = parse_transcription(body).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!((segments[1].start, segments[1].end), (3.0, 9.0));
        assert_eq!(segments[1].text, "");
        // End never precedes start.
        assert_eq!(segments[2].end, 9.0);

        let chunks = crate::chunk::align_transcript_and_captions("v", &segments, &[]);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].transcript, "");
        assert_eq!(chunks[1].text, "");
    }

    #[test]
    fn blank_text_only_response_has_no_segments() {
        let body = json!({ "text": "  ", "duration": 12.0 });
        assert!(parse_transcription(body).unwrap().is_empty());
    }

    #[test]
    fn text_only_response_becomes_one_segment() {
        let body = json!({ "text": " just text ", "duration": 12.0 });
        let segments = parse_transcription(body).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].end, 12.0);
        assert_eq!(segments[0].text, "just text");
    }
}
