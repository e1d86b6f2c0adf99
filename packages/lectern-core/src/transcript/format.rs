//! Transcript presentation formatting.
//!
//! Turns a timestamped transcript into the line-oriented text fed to
//! the analysis prompt and stored on the content row. Every line starts
//! with `[MM:SS]` or `[H:MM:SS]`.
//!
//! YouTube caption tracks arrive as very dense entries (a few words
//! every 2-4 seconds); those are regrouped into windows of at least
//! [`MIN_GROUP_WINDOW_SECS`] continuous seconds so a line corresponds
//! to an addressable chunk of content. Transcripts from other sources
//! keep their natural segment boundaries.

use super::{Transcript, TranscriptSegment, TranscriptSource};
use crate::util::format_timestamp;

/// Minimum width of a regrouped dense-transcript window.
pub const MIN_GROUP_WINDOW_SECS: f64 = 30.0;

/// Formats a transcript for prompt inclusion and storage.
#[must_use]
pub fn format_transcript(transcript: &Transcript) -> String {
    match transcript.source {
        TranscriptSource::PlatformNative => {
            let grouped = group_dense_segments(&transcript.segments, MIN_GROUP_WINDOW_SECS);
            grouped
                .iter()
                .map(|(start, text)| format!("[{}] {}", format_timestamp(*start), text))
                .collect::<Vec<_>>()
                .join("\n")
        }
        TranscriptSource::OracleAsr | TranscriptSource::Aligned => transcript
            .segments
            .iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(format_natural_segment)
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn format_natural_segment(segment: &TranscriptSegment) -> String {
    let stamp = format_timestamp(segment.start_seconds);
    match &segment.speaker {
        Some(speaker) => format!("[{}] {}: {}", stamp, speaker, segment.text.trim()),
        None => format!("[{}] {}", stamp, segment.text.trim()),
    }
}

/// Groups dense segments into windows spanning at least `min_window`
/// seconds. A window closes once the next segment would start at or
/// past `window_start + min_window`; the final window may be shorter.
pub fn group_dense_segments(
    segments: &[TranscriptSegment],
    min_window: f64,
) -> Vec<(f64, String)> {
    let mut windows: Vec<(f64, String)> = Vec::new();
    let mut window_start: Option<f64> = None;
    let mut window_text: Vec<&str> = Vec::new();

    for segment in segments {
        let text = segment.text.trim();
        if text.is_empty() {
            continue;
        }
        match window_start {
            None => {
                window_start = Some(segment.start_seconds);
                window_text.push(text);
            }
            Some(start) => {
                if segment.start_seconds - start >= min_window {
                    windows.push((start, window_text.join(" ")));
                    window_start = Some(segment.start_seconds);
                    window_text = vec![text];
                } else {
                    window_text.push(text);
                }
            }
        }
    }

    if let Some(start) = window_start {
        if !window_text.is_empty() {
            windows.push((start, window_text.join(" ")));
        }
    }

    windows
}
