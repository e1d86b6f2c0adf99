//! Textual transcript alignment.
//!
//! Takes a publisher-provided textual transcript (speaker-labelled, no
//! timings) and the word-level timings produced by the speech-to-text
//! oracle for the same audio, and assigns each speaker segment the
//! start/end timestamps of its best-matching window in the oracle's
//! word stream.
//!
//! Matching uses Ratcliff/Obershelp similarity over normalized token
//! sequences; windows scoring below [`MATCH_THRESHOLD`] are treated as
//! misses and logged, never fatal.

use super::{TimedWord, TranscriptSegment};

/// Minimum similarity for a window to count as a match.
pub const MATCH_THRESHOLD: f64 = 0.75;

/// A speaker-labelled block parsed out of a textual transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerSegment {
    pub speaker: String,
    pub text: String,
}

/// Parses a textual transcript into speaker segments.
///
/// Recognized speaker-line shapes, from the formats publishers actually
/// emit:
/// - `OPERATOR` (all caps, short)
/// - `Jane Doe - CEO` (name-dash-title, short)
/// - `Analyst:` (trailing colon, short)
/// - lines containing common role words (operator, analyst, ceo, ...)
pub fn parse_speaker_segments(transcript_text: &str) -> Vec<SpeakerSegment> {
    let mut segments = Vec::new();
    let mut current_speaker: Option<String> = None;
    let mut current_text: Vec<&str> = Vec::new();

    for raw in transcript_text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if is_speaker_line(line) {
            if let Some(speaker) = current_speaker.take() {
                if !current_text.is_empty() {
                    segments.push(SpeakerSegment {
                        speaker,
                        text: current_text.join(" "),
                    });
                }
            }
            current_speaker = Some(clean_speaker_name(line));
            current_text.clear();
        } else {
            current_text.push(line);
        }
    }

    if let Some(speaker) = current_speaker {
        if !current_text.is_empty() {
            segments.push(SpeakerSegment {
                speaker,
                text: current_text.join(" "),
            });
        }
    }

    segments
}

fn is_speaker_line(line: &str) -> bool {
    let words = line.split_whitespace().count();

    // All caps, short (OPERATOR, EXECUTIVE)
    if words <= 3 && line.chars().any(|c| c.is_alphabetic()) && line == line.to_uppercase() {
        return true;
    }
    // "Name - Title"
    if line.contains(" - ") && words <= 8 {
        return true;
    }
    // "Speaker:"
    if line.ends_with(':') && words <= 5 {
        return true;
    }
    // Common role labels
    let lower = line.to_lowercase();
    const ROLES: [&str; 6] = ["operator", "analyst", "executive", "ceo", "cfo", "coo"];
    if words <= 6 && ROLES.iter().any(|r| lower.contains(r)) {
        return true;
    }

    false
}

fn clean_speaker_name(line: &str) -> String {
    let cleaned = line.trim_end_matches(':').trim();
    if cleaned == cleaned.to_uppercase() {
        // Title-case all-caps labels
        cleaned
            .split_whitespace()
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => {
                        first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                    }
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        cleaned.to_string()
    }
}

/// Normalizes text to lowercase alphanumeric tokens.
pub fn normalize_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Ratcliff/Obershelp similarity of two token sequences: twice the
/// total length of matching blocks over the combined length.
pub fn sequence_ratio(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let matches = matching_total(a, b);
    2.0 * matches as f64 / (a.len() + b.len()) as f64
}

/// Total matched length: longest common block, then recurse on the
/// pieces to either side.
fn matching_total(a: &[String], b: &[String]) -> usize {
    let (ai, bi, len) = longest_match(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_total(&a[..ai], &b[..bi]) + matching_total(&a[ai + len..], &b[bi + len..])
}

fn longest_match(a: &[String], b: &[String]) -> (usize, usize, usize) {
    // j2len[j] = length of common run ending at (i, j)
    let mut best = (0, 0, 0);
    let mut j2len = vec![0usize; b.len() + 1];

    for (i, token) in a.iter().enumerate() {
        let mut new_j2len = vec![0usize; b.len() + 1];
        for (j, other) in b.iter().enumerate() {
            if token == other {
                let run = j2len[j] + 1;
                new_j2len[j + 1] = run;
                if run > best.2 {
                    best = (i + 1 - run, j + 1 - run, run);
                }
            }
        }
        j2len = new_j2len;
    }
    best
}

/// Aligns parsed speaker segments against oracle word timings.
///
/// For each segment, slides a window of the segment's token length over
/// the oracle word stream and takes the best-scoring position. Segments
/// longer than the word stream are matched on their first 50 tokens.
/// Output preserves input order; misses are skipped.
pub fn align_segments(segments: &[SpeakerSegment], words: &[TimedWord]) -> Vec<TranscriptSegment> {
    if words.is_empty() {
        return Vec::new();
    }

    let normalized_words: Vec<String> = words
        .iter()
        .map(|w| normalize_tokens(&w.word).join(""))
        .collect();

    let mut aligned = Vec::new();

    for (idx, segment) in segments.iter().enumerate() {
        let mut target = normalize_tokens(&segment.text);
        if target.is_empty() {
            continue;
        }

        let mut window = target.len();
        if window > normalized_words.len() {
            window = 50.min(normalized_words.len());
            target.truncate(window);
        }

        let mut best_score = 0.0;
        let mut best_start = None;

        for start in 0..=(normalized_words.len() - window) {
            let score = sequence_ratio(&target, &normalized_words[start..start + window]);
            if score > best_score {
                best_score = score;
                best_start = Some(start);
            }
        }

        match best_start {
            Some(start) if best_score > MATCH_THRESHOLD => {
                let end = start + window - 1;
                aligned.push(TranscriptSegment {
                    start_seconds: words[start].start,
                    duration: Some((words[end].end - words[start].start).max(0.0)),
                    text: segment.text.clone(),
                    speaker: Some(segment.speaker.clone()),
                });
            }
            _ => {
                log::warn!(
                    "[Align] Segment {}/{} ({}) had no window above {:.0}% similarity",
                    idx + 1,
                    segments.len(),
                    segment.speaker,
                    MATCH_THRESHOLD * 100.0
                );
            }
        }
    }

    aligned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_from(text: &str, step: f64) -> Vec<TimedWord> {
        text.split_whitespace()
            .enumerate()
            .map(|(i, w)| TimedWord {
                word: w.to_string(),
                start: i as f64 * step,
                end: (i as f64 + 0.9) * step,
            })
            .collect()
    }

    #[test]
    fn parses_seeking_alpha_style_speakers() {
        let text = "Jane Doe - CEO\nThanks everyone for joining us today.\n\
                    OPERATOR\nOur first question comes from the line of analysts.\n\
                    John Smith - Analyst:\nCould you expand on margins?";
        let segments = parse_speaker_segments(text);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].speaker, "Jane Doe - CEO");
        assert_eq!(segments[1].speaker, "Operator");
        assert!(segments[2].text.contains("margins"));
    }

    #[test]
    fn body_lines_accumulate_under_current_speaker() {
        let text = "CEO:\nFirst sentence.\nSecond sentence.";
        let segments = parse_speaker_segments(text);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "First sentence. Second sentence.");
    }

    #[test]
    fn sequence_ratio_identical_is_one() {
        let a = normalize_tokens("the quick brown fox");
        assert!((sequence_ratio(&a, &a) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sequence_ratio_disjoint_is_zero() {
        let a = normalize_tokens("alpha beta gamma");
        let b = normalize_tokens("one two three");
        assert_eq!(sequence_ratio(&a, &b), 0.0);
    }

    #[test]
    fn sequence_ratio_partial_overlap() {
        let a = normalize_tokens("we expect revenue growth next quarter");
        let b = normalize_tokens("we expect strong revenue growth next year");
        let ratio = sequence_ratio(&a, &b);
        assert!(ratio > 0.6 && ratio < 1.0, "ratio was {}", ratio);
    }

    #[test]
    fn aligns_exact_segment_to_word_window() {
        let words = words_from(
            "good morning and welcome to the call revenue grew twenty percent this quarter thank you",
            1.0,
        );
        let segments = vec![
            SpeakerSegment {
                speaker: "Operator".to_string(),
                text: "Good morning and welcome to the call.".to_string(),
            },
            SpeakerSegment {
                speaker: "CEO".to_string(),
                text: "Revenue grew twenty percent this quarter.".to_string(),
            },
        ];

        let aligned = align_segments(&segments, &words);
        assert_eq!(aligned.len(), 2);
        assert_eq!(aligned[0].start_seconds, 0.0);
        assert_eq!(aligned[1].start_seconds, 7.0);
        assert_eq!(aligned[1].speaker.as_deref(), Some("CEO"));
    }

    #[test]
    fn unmatched_segment_is_skipped_not_fatal() {
        let words = words_from("completely different audio content here", 1.0);
        let segments = vec![SpeakerSegment {
            speaker: "CEO".to_string(),
            text: "quarterly shareholder dividends increased substantially".to_string(),
        }];

        let aligned = align_segments(&segments, &words);
        assert!(aligned.is_empty());
    }

    #[test]
    fn long_segment_falls_back_to_prefix_window() {
        let words = words_from("alpha beta gamma delta", 1.0);
        let long_text = std::iter::repeat("alpha beta gamma delta")
            .take(40)
            .collect::<Vec<_>>()
            .join(" ");
        let segments = vec![SpeakerSegment {
            speaker: "CEO".to_string(),
            text: long_text,
        }];

        // Should not panic, and the prefix matches the stream exactly.
        let aligned = align_segments(&segments, &words);
        assert_eq!(aligned.len(), 1);
        assert_eq!(aligned[0].start_seconds, 0.0);
    }
}
