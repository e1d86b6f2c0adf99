//! Transcript acquisition.
//!
//! Produces a timestamped transcript for a piece of media by one of
//! three strategies, in preference order:
//!
//! 1. **Platform-native** captions (manual first, then auto-generated)
//!    for video platforms that expose them.
//! 2. **Speech-to-text** on the downloaded audio when no textual
//!    transcript exists.
//! 3. **Alignment** of a publisher-provided textual transcript against
//!    oracle word timings, when such a transcript exists.
//!
//! All strategies failing is not an error: the content is processed
//! text-only downstream.

pub mod align;
pub mod format;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{LecternError, LecternResult};
use crate::oracle::SpeechOracle;

pub use align::{align_segments, parse_speaker_segments};
pub use format::format_transcript;

/// One word with oracle timings, in stream order.
#[derive(Debug, Clone)]
pub struct TimedWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// One transcript entry.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TranscriptSegment {
    pub start_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

/// How a transcript was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptSource {
    PlatformNative,
    OracleAsr,
    Aligned,
}

/// An ordered, timestamped transcript.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub source: TranscriptSource,
    pub segments: Vec<TranscriptSegment>,
}

impl Transcript {
    /// End of the last segment, when computable.
    pub fn duration_seconds(&self) -> Option<f64> {
        self.segments
            .iter()
            .map(|s| s.start_seconds + s.duration.unwrap_or(0.0))
            .fold(None, |acc: Option<f64>, end| {
                Some(acc.map_or(end, |a| a.max(end)))
            })
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Provider of platform-native caption tracks.
#[async_trait::async_trait]
pub trait CaptionProvider: Send + Sync {
    /// Fetches a manually-created caption track, if one exists.
    async fn manual_captions(&self, video_id: &str)
        -> LecternResult<Option<Vec<TranscriptSegment>>>;

    /// Fetches an auto-generated caption track, if one exists.
    async fn auto_captions(&self, video_id: &str)
        -> LecternResult<Option<Vec<TranscriptSegment>>>;
}

/// Everything the acquirer may draw on for one piece of content.
#[derive(Debug, Default)]
pub struct AcquireRequest {
    /// Platform video id, when the content is a platform embed.
    pub video_id: Option<String>,
    /// Platform tag (only `youtube` has native captions today).
    pub platform: String,
    /// Downloaded audio (or audio track), when available.
    pub local_audio: Option<PathBuf>,
    /// Publisher-provided textual transcript, when a scraper supplied one.
    pub companion_transcript: Option<String>,
}

/// Acquires transcripts by the three-strategy ladder.
pub struct TranscriptAcquirer {
    captions: Arc<dyn CaptionProvider>,
    oracle: Arc<dyn SpeechOracle>,
}

impl TranscriptAcquirer {
    pub fn new(captions: Arc<dyn CaptionProvider>, oracle: Arc<dyn SpeechOracle>) -> Self {
        Self { captions, oracle }
    }

    /// Runs the strategy ladder. `Ok(None)` means every strategy was
    /// exhausted and downstream should treat the content as text-only.
    pub async fn acquire(&self, request: &AcquireRequest) -> LecternResult<Option<Transcript>> {
        // Strategy 1: platform-native captions.
        if request.platform == "youtube" {
            if let Some(video_id) = &request.video_id {
                match self.native_captions(video_id).await {
                    Ok(Some(segments)) => {
                        return Ok(Some(Transcript {
                            source: TranscriptSource::PlatformNative,
                            segments,
                        }));
                    }
                    Ok(None) => {
                        log::info!("[Transcript] No native captions for {}", video_id);
                    }
                    Err(e) => {
                        log::warn!("[Transcript] Caption fetch failed for {}: {}", video_id, e);
                    }
                }
            }
        }

        // Strategy 3 outranks raw ASR once a publisher transcript
        // exists: the textual transcript is authoritative, the oracle
        // only contributes timings.
        if let (Some(text), Some(audio)) = (&request.companion_transcript, &request.local_audio) {
            let oracle_words = self.oracle.transcribe_words(audio).await?;
            let parsed = parse_speaker_segments(text);
            let total = parsed.len();
            let aligned = align_segments(&parsed, &oracle_words);
            log::info!(
                "[Transcript] Aligned {}/{} speaker segments",
                aligned.len(),
                total
            );
            if !aligned.is_empty() {
                return Ok(Some(Transcript {
                    source: TranscriptSource::Aligned,
                    segments: aligned,
                }));
            }
        }

        // Strategy 2: speech-to-text on the audio.
        if let Some(audio) = &request.local_audio {
            let segments = self.oracle.transcribe_segments(audio).await?;
            if !segments.is_empty() {
                return Ok(Some(Transcript {
                    source: TranscriptSource::OracleAsr,
                    segments,
                }));
            }
        }

        Ok(None)
    }

    async fn native_captions(
        &self,
        video_id: &str,
    ) -> LecternResult<Option<Vec<TranscriptSegment>>> {
        if let Some(segments) = self.captions.manual_captions(video_id).await? {
            if !segments.is_empty() {
                log::info!("[Transcript] Using manual captions for {}", video_id);
                return Ok(Some(segments));
            }
        }
        if let Some(segments) = self.captions.auto_captions(video_id).await? {
            if !segments.is_empty() {
                log::info!("[Transcript] Using auto-generated captions for {}", video_id);
                return Ok(Some(segments));
            }
        }
        Ok(None)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// YouTube timedtext provider
// ─────────────────────────────────────────────────────────────────────────────

/// Caption provider backed by YouTube's timedtext endpoint (json3).
pub struct YoutubeTimedText {
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TimedTextResponse {
    #[serde(default)]
    events: Vec<TimedTextEvent>,
}

#[derive(Deserialize)]
struct TimedTextEvent {
    #[serde(rename = "tStartMs", default)]
    t_start_ms: u64,
    #[serde(rename = "dDurationMs")]
    d_duration_ms: Option<u64>,
    #[serde(default)]
    segs: Vec<TimedTextSeg>,
}

#[derive(Deserialize)]
struct TimedTextSeg {
    #[serde(default)]
    utf8: String,
}

impl YoutubeTimedText {
    pub fn new(timeout: Duration) -> LecternResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LecternError::Internal(format!("http client: {}", e)))?;
        Ok(Self { client })
    }

    async fn fetch_track(
        &self,
        video_id: &str,
        kind: Option<&str>,
    ) -> LecternResult<Option<Vec<TranscriptSegment>>> {
        let mut url = format!(
            "https://www.youtube.com/api/timedtext?v={}&lang=en&fmt=json3",
            video_id
        );
        if let Some(kind) = kind {
            url.push_str(&format!("&kind={}", kind));
        }

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            // YouTube answers 200 with an empty body when no track exists.
            return Ok(None);
        }

        let parsed: TimedTextResponse = serde_json::from_str(&body)
            .map_err(|e| LecternError::Internal(format!("timedtext parse: {}", e)))?;

        let segments: Vec<TranscriptSegment> = parsed
            .events
            .into_iter()
            .filter_map(|event| {
                let text: String = event.segs.iter().map(|s| s.utf8.as_str()).collect();
                let text = text.replace('\n', " ").trim().to_string();
                if text.is_empty() {
                    return None;
                }
                Some(TranscriptSegment {
                    start_seconds: event.t_start_ms as f64 / 1000.0,
                    duration: event.d_duration_ms.map(|d| d as f64 / 1000.0),
                    text,
                    speaker: None,
                })
            })
            .collect();

        if segments.is_empty() {
            Ok(None)
        } else {
            Ok(Some(segments))
        }
    }
}

#[async_trait::async_trait]
impl CaptionProvider for YoutubeTimedText {
    async fn manual_captions(
        &self,
        video_id: &str,
    ) -> LecternResult<Option<Vec<TranscriptSegment>>> {
        self.fetch_track(video_id, None).await
    }

    async fn auto_captions(
        &self,
        video_id: &str,
    ) -> LecternResult<Option<Vec<TranscriptSegment>>> {
        self.fetch_track(video_id, Some("asr")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    struct ScriptedCaptions {
        manual: Option<Vec<TranscriptSegment>>,
        auto: Option<Vec<TranscriptSegment>>,
    }

    #[async_trait::async_trait]
    impl CaptionProvider for ScriptedCaptions {
        async fn manual_captions(
            &self,
            _video_id: &str,
        ) -> LecternResult<Option<Vec<TranscriptSegment>>> {
            Ok(self.manual.clone())
        }

        async fn auto_captions(
            &self,
            _video_id: &str,
        ) -> LecternResult<Option<Vec<TranscriptSegment>>> {
            Ok(self.auto.clone())
        }
    }

    struct ScriptedOracle {
        words: Vec<TimedWord>,
        segments: Vec<TranscriptSegment>,
    }

    #[async_trait::async_trait]
    impl SpeechOracle for ScriptedOracle {
        async fn transcribe_words(&self, _audio: &Path) -> LecternResult<Vec<TimedWord>> {
            Ok(self.words.clone())
        }

        async fn transcribe_segments(
            &self,
            _audio: &Path,
        ) -> LecternResult<Vec<TranscriptSegment>> {
            Ok(self.segments.clone())
        }
    }

    fn seg(start: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            start_seconds: start,
            duration: Some(3.0),
            text: text.to_string(),
            speaker: None,
        }
    }

    fn acquirer(captions: ScriptedCaptions, oracle: ScriptedOracle) -> TranscriptAcquirer {
        TranscriptAcquirer::new(Arc::new(captions), Arc::new(oracle))
    }

    #[tokio::test]
    async fn manual_captions_win() {
        let acquirer = acquirer(
            ScriptedCaptions {
                manual: Some(vec![seg(0.0, "manual")]),
                auto: Some(vec![seg(0.0, "auto")]),
            },
            ScriptedOracle {
                words: vec![],
                segments: vec![],
            },
        );
        let request = AcquireRequest {
            video_id: Some("abc".into()),
            platform: "youtube".into(),
            ..Default::default()
        };

        let transcript = acquirer.acquire(&request).await.unwrap().unwrap();
        assert_eq!(transcript.source, TranscriptSource::PlatformNative);
        assert_eq!(transcript.segments[0].text, "manual");
    }

    #[tokio::test]
    async fn auto_captions_fill_in_for_missing_manual() {
        let acquirer = acquirer(
            ScriptedCaptions {
                manual: None,
                auto: Some(vec![seg(0.0, "auto")]),
            },
            ScriptedOracle {
                words: vec![],
                segments: vec![],
            },
        );
        let request = AcquireRequest {
            video_id: Some("abc".into()),
            platform: "youtube".into(),
            ..Default::default()
        };

        let transcript = acquirer.acquire(&request).await.unwrap().unwrap();
        assert_eq!(transcript.segments[0].text, "auto");
    }

    #[tokio::test]
    async fn asr_used_when_no_captions_and_no_companion_text() {
        let acquirer = acquirer(
            ScriptedCaptions {
                manual: None,
                auto: None,
            },
            ScriptedOracle {
                words: vec![],
                segments: vec![seg(0.0, "spoken words")],
            },
        );
        let request = AcquireRequest {
            platform: "hosted".into(),
            local_audio: Some(PathBuf::from("/tmp/a.mp3")),
            ..Default::default()
        };

        let transcript = acquirer.acquire(&request).await.unwrap().unwrap();
        assert_eq!(transcript.source, TranscriptSource::OracleAsr);
    }

    #[tokio::test]
    async fn companion_transcript_triggers_alignment() {
        let words: Vec<TimedWord> = "welcome to the quarterly earnings call"
            .split_whitespace()
            .enumerate()
            .map(|(i, w)| TimedWord {
                word: w.to_string(),
                start: i as f64 * 2.0,
                end: i as f64 * 2.0 + 1.5,
            })
            .collect();
        let acquirer = acquirer(
            ScriptedCaptions {
                manual: None,
                auto: None,
            },
            ScriptedOracle {
                words,
                segments: vec![seg(0.0, "raw asr")],
            },
        );
        let request = AcquireRequest {
            platform: "seekingalpha".into(),
            local_audio: Some(PathBuf::from("/tmp/call.mp3")),
            companion_transcript: Some(
                "Operator:\nWelcome to the quarterly earnings call.".to_string(),
            ),
            ..Default::default()
        };

        let transcript = acquirer.acquire(&request).await.unwrap().unwrap();
        assert_eq!(transcript.source, TranscriptSource::Aligned);
        assert_eq!(transcript.segments[0].speaker.as_deref(), Some("Operator"));
    }

    #[tokio::test]
    async fn all_strategies_exhausted_returns_none() {
        let acquirer = acquirer(
            ScriptedCaptions {
                manual: None,
                auto: None,
            },
            ScriptedOracle {
                words: vec![],
                segments: vec![],
            },
        );
        let request = AcquireRequest {
            platform: "generic".into(),
            ..Default::default()
        };

        assert!(acquirer.acquire(&request).await.unwrap().is_none());
    }

    #[test]
    fn duration_is_max_segment_end() {
        let transcript = Transcript {
            source: TranscriptSource::OracleAsr,
            segments: vec![seg(0.0, "a"), seg(100.0, "b")],
        };
        assert_eq!(transcript.duration_seconds(), Some(103.0));
    }
}
