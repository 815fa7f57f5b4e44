//! Transcript/caption alignment.
//!
//! Fuses two independently time-stamped sequences, transcript segments and
//! captioned frames, into retrieval [`Chunk`]s. Each transcript segment
//! becomes exactly one chunk; frames only contribute caption text.
//!
//! # Algorithm
//!
//! For each segment `[s, e]`:
//!
//! 1. Select every frame whose timestamp lies in `[s, e]` (inclusive).
//! 2. If none qualify, fall back to the single frame nearest the segment
//!    midpoint `(s + e) / 2`. Ties go to the frame that appears first.
//! 3. Join the non-empty selected captions with [`CAPTION_SEPARATOR`].
//! 4. The representative frame is the first selected frame.
//!
//! With no frames at all, every chunk gets an empty caption and no
//! representative frame.
//!
//! # Example
//!
//! ```rust
//! use video_harness::chunk::align_transcript_and_captions;
//! use video_harness::models::{FrameDescription, TranscriptSegment};
//!
//! let segments = vec![TranscriptSegment { start: 0.0, end: 2.0, text: " hi ".into() }];
//! let frames = vec![FrameDescription {
//!     frame_file: "frame_000001.jpg".into(),
//!     timestamp: 0.0,
//!     caption: "a cat".into(),
//! }];
//! let chunks = align_transcript_and_captions("vid", &segments, &frames);
//! assert_eq!(chunks[0].text, "hi a cat");
//! ```

use std::path::Path;

use crate::models::{Chunk, FrameDescription, TranscriptSegment};

/// Separator placed between captions of frames that share a segment.
/// Empty captions are skipped before joining.
pub const CAPTION_SEPARATOR: &str = " | ";

/// Align transcript segments with frame captions, preserving segment order.
pub fn align_transcript_and_captions(
    video_id: &str,
    segments: &[TranscriptSegment],
    frames: &[FrameDescription],
) -> Vec<Chunk> {
    segments
        .iter()
        .map(|seg| {
            let selected = select_frames(seg.start, seg.end, frames);
            let caption = selected
                .iter()
                .map(|f| f.caption.as_str())
                .filter(|c| !c.is_empty())
                .collect::<Vec<_>>()
                .join(CAPTION_SEPARATOR);
            let frame_file = selected.first().map(|f| f.frame_file.clone());
            Chunk::new(video_id, seg.start, seg.end, &seg.text, caption, frame_file)
        })
        .collect()
}

fn select_frames(start: f64, end: f64, frames: &[FrameDescription]) -> Vec<&FrameDescription> {
    let overlapping: Vec<&FrameDescription> = frames
        .iter()
        .filter(|f| f.timestamp >= start && f.timestamp <= end)
        .collect();
    if !overlapping.is_empty() {
        return overlapping;
    }

    let mid = (start + end) / 2.0;
    // Strict `<` keeps the earliest frame on ties.
    let mut nearest: Option<(&FrameDescription, f64)> = None;
    for f in frames {
        let dist = (f.timestamp - mid).abs();
        match nearest {
            Some((_, best)) if dist >= best => {}
            _ => nearest = Some((f, dist)),
        }
    }
    nearest.map(|(f, _)| vec![f]).unwrap_or_default()
}

/// Timestamp in seconds of a 1-based frame ordinal sampled at `fps`.
///
/// Ordinal 1 is `0.0`; the result is never negative.
pub fn frame_timestamp(ordinal: u64, fps: f64) -> f64 {
    if fps <= 0.0 {
        return 0.0;
    }
    (ordinal.saturating_sub(1) as f64 / fps).max(0.0)
}

/// Parse the ordinal out of a `frame_000123.jpg` style filename.
pub fn parse_frame_number(file_name: &str) -> Option<u64> {
    let stem = Path::new(file_name).file_stem()?.to_str()?;
    stem.rsplit('_').next()?.parse().ok()
}
