//! Ingest progress reporting.
//!
//! Reports which pipeline stage an ingest is in so users can see where a
//! long ingest spends its time. Progress is emitted on **stderr** so stdout
//! remains parseable for scripts.

use std::io::{IsTerminal, Write};
use std::sync::Arc;

use crate::models::Stage;

/// A single progress event for one ingest.
#[derive(Clone, Debug, PartialEq)]
pub enum IngestProgressEvent {
    /// A stage is about to run.
    Stage { video_id: String, stage: Stage },
    /// A stage was skipped by request parameters.
    Skipped {
        video_id: String,
        stage: Stage,
        reason: &'static str,
    },
    /// All stages completed.
    Finished { video_id: String, chunks: usize },
    /// Cancellation was observed before `stage`.
    Cancelled { video_id: String, stage: Stage },
}

/// Reports ingest progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the ingest pipeline.
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest 3f2a9c  transcribe".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", human_line(&event));
        let _ = err.flush();
    }
}

fn human_line(event: &IngestProgressEvent) -> String {
    match event {
        IngestProgressEvent::Stage { video_id, stage } => format!("ingest {}  {}", video_id, stage),
        IngestProgressEvent::Skipped {
            video_id,
            stage,
            reason,
        } => format!("ingest {}  {} skipped ({})", video_id, stage, reason),
        IngestProgressEvent::Finished { video_id, chunks } => {
            format!("ingest {}  done, {} chunks indexed", video_id, chunks)
        }
        IngestProgressEvent::Cancelled { video_id, stage } => {
            format!("ingest {}  cancelled before {}", video_id, stage)
        }
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event_json(&event)) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

fn event_json(event: &IngestProgressEvent) -> serde_json::Value {
    match event {
        IngestProgressEvent::Stage { video_id, stage } => serde_json::json!({
            "event": "stage",
            "video_id": video_id,
            "stage": stage,
        }),
        IngestProgressEvent::Skipped {
            video_id,
            stage,
            reason,
        } => serde_json::json!({
            "event": "skipped",
            "video_id": video_id,
            "stage": stage,
            "reason": reason,
        }),
        IngestProgressEvent::Finished { video_id, chunks } => serde_json::json!({
            "event": "finished",
            "video_id": video_id,
            "chunks": chunks,
        }),
        IngestProgressEvent::Cancelled { video_id, stage } => serde_json::json!({
            "event": "cancelled",
            "video_id": video_id,
            "stage": stage,
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Arc<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_lines_name_the_stage() {
        let line = human_line(&IngestProgressEvent::Skipped {
            video_id: "abc".into(),
            stage: Stage::Caption,
            reason: "captions off",
        });
        assert_eq!(line, "ingest abc  caption skipped (captions off)");
    }

    #[test]
    fn json_events_use_snake_case_stages() {
        let v = event_json(&IngestProgressEvent::Stage {
            video_id: "abc".into(),
            stage: Stage::ExtractFrames,
        });
        assert_eq!(v["event"], "stage");
        assert_eq!(v["stage"], "extract_frames");

        let v = event_json(&IngestProgressEvent::Finished {
            video_id: "abc".into(),
            chunks: 7,
        });
        assert_eq!(v["chunks"], 7);
    }
}
