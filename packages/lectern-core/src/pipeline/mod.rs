//! The ingestion pipeline orchestrator.
//!
//! A staged, resumable state machine that takes a URL from submitted to
//! analyzed-and-persisted: classify, fetch, resolve media, download,
//! acquire transcript, sample frames (opt-in), generate insights,
//! persist. After each transition a progress event is pushed onto the
//! bus; the HTTP writer multiplexes events onto the wire.
//!
//! Duplicate handling short-circuits the machine: a URL the user
//! already has emits `duplicate_detected` and stops; a URL that exists
//! globally but not in the user's library silently attaches the
//! association. Client disconnect cancels the run cleanly: in-flight
//! calls abort, no further events are emitted, and no partial row
//! survives.

pub mod reprocess;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::classify::{classify_url, classify_with_body, Classification, ContentKind};
use crate::error::{LecternError, LecternResult};
use crate::events::ProgressSender;
use crate::extract::media::{MediaAsset, MediaKind, MediaResolver};
use crate::extract::{extract_content, ExtractedContent};
use crate::fetch::{FetchResult, PageFetcher};
use crate::frames::FrameSampler;
use crate::insight::{Insights, InsightGenerator, PromptContext};
use crate::oracle::Embedder;
use crate::retry::with_retry;
use crate::store::objects::ObjectStorage;
use crate::store::{
    ArticleStore, ChannelStore, ContentSourceKind, MediaPointer, NewArticle, QueueStore, UserRef,
};
use crate::transcript::{format_transcript, AcquireRequest, Transcript, TranscriptAcquirer};
use crate::util::{canonical_url, truncate_with_ellipsis};

pub use reprocess::{ReprocessInfo, ReprocessRequest, ReprocessStep, StepResult};

/// One ingestion request.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub url: String,
    pub user: Option<UserRef>,
    pub force_reprocess: bool,
    pub demo_video: bool,
}

/// The orchestrator and its collaborator seams.
pub struct Pipeline {
    pub articles: Arc<dyn ArticleStore>,
    pub queue: Arc<dyn QueueStore>,
    pub channels: Arc<dyn ChannelStore>,
    pub storage: Arc<dyn ObjectStorage>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub media: Arc<dyn MediaResolver>,
    pub transcripts: Arc<TranscriptAcquirer>,
    pub insights: Arc<InsightGenerator>,
    pub embedder: Arc<dyn Embedder>,
    pub frames: Arc<FrameSampler>,
    pub media_retention_days: i64,
}

/// Runs a future unless the request context is cancelled first.
async fn cancellable<T, F>(cancel: &CancellationToken, future: F) -> LecternResult<T>
where
    F: Future<Output = LecternResult<T>>,
{
    tokio::select! {
        result = future => result,
        _ = cancel.cancelled() => Err(LecternError::Cancelled),
    }
}

/// Fills in a missing duration by probing the downloaded file.
async fn with_probed_duration(mut asset: MediaAsset) -> MediaAsset {
    if asset.duration_seconds.is_none() {
        if let Some(path) = &asset.download_path {
            asset.duration_seconds = crate::frames::probe_duration(path).await.ok().flatten();
        }
    }
    asset
}

/// How the media route resolved during classification.
enum MediaRoute {
    TextOnly,
    Direct { url: String, kind: MediaKind },
    Platform,
    EmbeddedAudio { url: String },
}

impl Pipeline {
    /// Runs a full ingestion, emitting progress events and the terminal
    /// frame, then closes the bus. Cancellation ends the stream with no
    /// further events.
    pub async fn run(
        &self,
        request: PipelineRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) {
        match self.run_inner(&request, &progress, &cancel).await {
            Ok(()) => {}
            Err(LecternError::Cancelled) => {
                log::info!("[Pipeline] Cancelled while processing {}", request.url);
            }
            Err(e) => {
                log::error!("[Pipeline] Failed for {}: {}", request.url, e);
                progress
                    .emit("error", json!({ "message": e.user_message() }))
                    .await;
            }
        }
        progress.close();
    }

    async fn run_inner(
        &self,
        request: &PipelineRequest,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> LecternResult<()> {
        progress
            .emit("ping", json!({ "message": "SSE connection established" }))
            .await;
        progress.emit("started", json!({ "url": request.url })).await;

        let canonical = canonical_url(&request.url);

        // submitted: duplicate short-circuit before any work.
        if !request.force_reprocess {
            if let Some(done) = self.check_duplicate(&canonical, request, progress).await? {
                if done {
                    return Ok(());
                }
            }
        }

        // Richer-source swap: discovery may have recorded a preferred
        // URL (usually the YouTube upload of a podcast episode).
        let processing_url = self.richer_source_for(&canonical).await;
        let mut classification = classify_url(&processing_url);

        // fetching
        progress
            .emit("fetch_start", json!({ "url": processing_url }))
            .await;
        let fetched = self.fetch_stage(&processing_url, &classification, cancel).await?;
        progress
            .emit(
                "fetch_complete",
                json!({ "status": fetched.status, "used_browser": fetched.used_browser }),
            )
            .await;

        // classifying_media: re-run with the body available.
        if !fetched.html.is_empty() {
            classification = classify_with_body(&fetched.final_url, &fetched.html);
        }

        // extracting_content (runs for every HTML-backed page; media
        // pages still carry show notes and descriptions worth analyzing).
        let content = if fetched.html.is_empty() {
            ExtractedContent {
                title: processing_url.clone(),
                text: String::new(),
                structured_text: String::new(),
                word_count: 0,
            }
        } else {
            progress.emit("content_extract_start", json!({})).await;
            let content = extract_content(&fetched.html, &fetched.final_url);
            progress
                .emit(
                    "content_extracted",
                    json!({ "title": content.title, "word_count": content.word_count }),
                )
                .await;
            content
        };

        // resolving_platform_media / downloading_media
        let temp_dir = tempfile::tempdir()?;
        let asset = self
            .media_stage(&classification, &fetched, request, temp_dir.path(), progress, cancel)
            .await?;

        // acquiring_transcript
        let transcript = self
            .transcript_stage(&classification, &content, asset.as_ref(), progress, cancel)
            .await?;

        // sampling_frames (opt-in, video only)
        let frames = self
            .frames_stage(request, asset.as_ref(), progress, cancel)
            .await?;

        // generating_insights
        let duration_seconds = transcript
            .as_ref()
            .and_then(Transcript::duration_seconds)
            .or(asset.as_ref().and_then(|a| a.duration_seconds));

        progress.emit("ai_start", json!({})).await;
        let context = self.prompt_context(&classification, &content, transcript.as_ref(), &asset);
        let metadata = json!({
            "title": content.title,
            "url": fetched.final_url,
            "platform": classification.platform,
            "has_video": matches!(context, PromptContext::Video { .. }),
            "has_audio": matches!(context, PromptContext::Audio { .. }),
        });
        let insights = cancellable(
            cancel,
            self.insights
                .generate(&fetched.final_url, &metadata, &context, duration_seconds),
        )
        .await?;
        progress.emit("ai_complete", json!({})).await;

        // persisting
        if cancel.is_cancelled() {
            return Err(LecternError::Cancelled);
        }
        progress.emit("save_start", json!({})).await;
        let outcome = self
            .persist_stage(
                request,
                &canonical,
                &classification,
                &content,
                transcript.as_ref(),
                asset.as_ref(),
                &frames,
                &insights,
                duration_seconds,
            )
            .await?;
        progress
            .emit("save_complete", json!({ "article_id": outcome.article_id }))
            .await;

        // completed
        let mut payload = json!({
            "article_id": outcome.article_id,
            "url": format!("/article/{}", outcome.article_id),
        });
        if !outcome.newly_created && !request.force_reprocess {
            payload["already_processed"] = Value::Bool(true);
        }
        progress.emit("completed", payload).await;

        log::info!(
            "[Pipeline] Processed {} as article {}",
            canonical,
            outcome.article_id
        );
        Ok(())
    }

    /// Duplicate handling per the library model. Returns `Some(true)`
    /// when the run short-circuited.
    async fn check_duplicate(
        &self,
        canonical: &str,
        request: &PipelineRequest,
        progress: &ProgressSender,
    ) -> LecternResult<Option<bool>> {
        let Some(existing) = self.articles.find_by_url(canonical).await? else {
            return Ok(None);
        };

        match &request.user {
            Some(user) => {
                if self
                    .articles
                    .user_has_article(existing.id, &user.user_id)
                    .await?
                {
                    // Already in the library: surface and stop.
                    progress
                        .emit(
                            "duplicate_detected",
                            json!({
                                "article_id": existing.id,
                                "title": existing.title,
                                "created_at": existing.created_at.to_rfc3339(),
                                "updated_at": existing.updated_at.to_rfc3339(),
                                "url": format!("/article/{}", existing.id),
                            }),
                        )
                        .await;
                    progress
                        .emit("completed", json!({ "already_processed": true }))
                        .await;
                } else {
                    // Exists globally, not in this library: attach quietly.
                    let organization_id = match &user.organization_id {
                        Some(org) => Some(org.clone()),
                        None => self.articles.organization_of(&user.user_id).await?,
                    };
                    self.articles
                        .associate_user(
                            existing.id,
                            &UserRef {
                                user_id: user.user_id.clone(),
                                organization_id,
                            },
                        )
                        .await?;
                    log::info!(
                        "[Pipeline] Added existing article {} to library of {}",
                        existing.id,
                        user.user_id
                    );
                    progress
                        .emit(
                            "completed",
                            json!({
                                "article_id": existing.id,
                                "url": format!("/article/{}", existing.id),
                                "already_processed": true,
                                "message": "Article already exists - added to your library",
                            }),
                        )
                        .await;
                }
            }
            None => {
                progress
                    .emit(
                        "completed",
                        json!({
                            "article_id": existing.id,
                            "url": format!("/article/{}", existing.id),
                            "already_processed": true,
                        }),
                    )
                    .await;
            }
        }
        Ok(Some(true))
    }

    /// Looks for a richer alternative URL recorded by discovery.
    async fn richer_source_for(&self, canonical: &str) -> String {
        if let Ok(Some(item)) = self.queue.find_by_url(canonical).await {
            if let Some(video_url) = item.video_url {
                log::info!(
                    "[Pipeline] Using discovered video source for {}: {}",
                    canonical,
                    video_url
                );
                return video_url;
            }
        }
        if let Ok(Some(preferred)) = self.channels.preferred_for(canonical).await {
            log::info!(
                "[Pipeline] Using known-channel source for {}: {}",
                canonical,
                preferred
            );
            return preferred;
        }
        canonical.to_string()
    }

    async fn fetch_stage(
        &self,
        url: &str,
        classification: &Classification,
        cancel: &CancellationToken,
    ) -> LecternResult<FetchResult> {
        if classification.kind.is_direct() {
            // The URL is already the asset; there is no page to render.
            return Ok(FetchResult {
                final_url: url.to_string(),
                status: 200,
                ..Default::default()
            });
        }
        cancellable(cancel, self.fetcher.fetch(url)).await
    }

    /// Resolves and downloads media where present. A downloader miss
    /// degrades to text-only with a warning event, never a failure.
    async fn media_stage(
        &self,
        classification: &Classification,
        fetched: &FetchResult,
        request: &PipelineRequest,
        temp_dir: &std::path::Path,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> LecternResult<Option<MediaAsset>> {
        let route = self.media_route(classification, &fetched.html);

        match route {
            MediaRoute::TextOnly => Ok(None),
            MediaRoute::Direct { url, kind } => {
                progress
                    .emit("download_start", json!({ "url": url, "kind": kind }))
                    .await;
                match self
                    .media
                    .download_direct(&url, kind, temp_dir, cancel)
                    .await
                {
                    Ok(asset) => {
                        let asset = with_probed_duration(asset).await;
                        progress
                            .emit("download_complete", json!({ "size_bytes": asset.size_bytes }))
                            .await;
                        Ok(Some(asset))
                    }
                    Err(LecternError::Cancelled) => Err(LecternError::Cancelled),
                    Err(e) => {
                        log::warn!("[Pipeline] Direct download failed: {}", e);
                        progress
                            .emit(
                                "warning",
                                json!({ "message": "Media download failed; processing as text" }),
                            )
                            .await;
                        Ok(None)
                    }
                }
            }
            MediaRoute::Platform => {
                progress
                    .emit(
                        "media_resolve_start",
                        json!({ "platform": classification.platform }),
                    )
                    .await;
                // Video kept only when frames were requested; audio is
                // enough for transcription and far smaller.
                let want_video = request.demo_video;
                match self
                    .media
                    .download_platform(classification, want_video, temp_dir, cancel)
                    .await
                {
                    Ok(asset) => {
                        let asset = with_probed_duration(asset).await;
                        progress
                            .emit(
                                "media_resolve_complete",
                                json!({ "kind": asset.kind, "size_bytes": asset.size_bytes }),
                            )
                            .await;
                        Ok(Some(asset))
                    }
                    Err(LecternError::Cancelled) => Err(LecternError::Cancelled),
                    Err(e) => {
                        // Fall back to text-only processing.
                        log::warn!(
                            "[Pipeline] Platform media unavailable for {}: {}",
                            classification.platform,
                            e
                        );
                        progress
                            .emit(
                                "warning",
                                json!({
                                    "message": "Embedded media could not be retrieved; processing as text"
                                }),
                            )
                            .await;
                        Ok(None)
                    }
                }
            }
            MediaRoute::EmbeddedAudio { url } => {
                progress
                    .emit("download_start", json!({ "url": url, "kind": "audio" }))
                    .await;
                match self
                    .media
                    .download_direct(&url, MediaKind::Audio, temp_dir, cancel)
                    .await
                {
                    Ok(asset) => {
                        let asset = with_probed_duration(asset).await;
                        progress
                            .emit("download_complete", json!({ "size_bytes": asset.size_bytes }))
                            .await;
                        Ok(Some(asset))
                    }
                    Err(LecternError::Cancelled) => Err(LecternError::Cancelled),
                    Err(e) => {
                        log::warn!("[Pipeline] Embedded audio download failed: {}", e);
                        Ok(None)
                    }
                }
            }
        }
    }

    fn media_route(&self, classification: &Classification, html: &str) -> MediaRoute {
        if let Some(url) = &classification.direct_media_url {
            if classification.kind.is_direct() {
                let kind = MediaKind::from_content_kind(classification.kind)
                    .unwrap_or(MediaKind::Document);
                if kind == MediaKind::Document {
                    // Documents are analyzed as text; no media pipeline.
                    return MediaRoute::TextOnly;
                }
                return MediaRoute::Direct {
                    url: url.clone(),
                    kind,
                };
            }
        }

        if classification.kind == ContentKind::HostedPodcast {
            // Hosted players embed via iframe; the real asset, when
            // exposed at all, is an <audio> element on the page.
            return match self.media.find_embedded_audio(html) {
                Some(url) => MediaRoute::EmbeddedAudio { url },
                None => MediaRoute::TextOnly,
            };
        }

        if classification.kind.is_platform_embed() {
            return MediaRoute::Platform;
        }

        if let Some(url) = self.media.find_embedded_audio(html) {
            return MediaRoute::EmbeddedAudio { url };
        }

        MediaRoute::TextOnly
    }

    async fn transcript_stage(
        &self,
        classification: &Classification,
        content: &ExtractedContent,
        asset: Option<&MediaAsset>,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> LecternResult<Option<Transcript>> {
        let local_audio: Option<PathBuf> = asset.and_then(|a| a.download_path.clone());
        let has_media = classification.kind.is_media() || asset.is_some();
        if !has_media && classification.kind != ContentKind::PaywalledPublisher {
            return Ok(None);
        }

        progress.emit("transcript_start", json!({})).await;

        // Paywalled publisher pages carry the transcript as page text
        // (earnings calls); it only needs timing alignment. The
        // line-structured variant keeps speaker labels parseable.
        let companion = if classification.kind == ContentKind::PaywalledPublisher
            && !content.structured_text.is_empty()
        {
            Some(content.structured_text.clone())
        } else {
            None
        };

        let acquire = AcquireRequest {
            video_id: classification.media_id.clone(),
            platform: classification.platform.clone(),
            local_audio,
            companion_transcript: companion,
        };

        match cancellable(cancel, self.transcripts.acquire(&acquire)).await {
            Ok(Some(transcript)) => {
                progress
                    .emit(
                        "transcript_complete",
                        json!({
                            "available": true,
                            "source": transcript.source,
                            "segments": transcript.segments.len(),
                        }),
                    )
                    .await;
                Ok(Some(transcript))
            }
            Ok(None) => {
                progress
                    .emit("transcript_complete", json!({ "available": false }))
                    .await;
                Ok(None)
            }
            Err(LecternError::Cancelled) => Err(LecternError::Cancelled),
            Err(e) => {
                // Transcript failure is never fatal; downstream runs
                // text-only.
                log::warn!("[Pipeline] Transcript acquisition failed: {}", e);
                progress
                    .emit("transcript_complete", json!({ "available": false }))
                    .await;
                Ok(None)
            }
        }
    }

    async fn frames_stage(
        &self,
        request: &PipelineRequest,
        asset: Option<&MediaAsset>,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> LecternResult<Vec<crate::frames::FilteredFrame>> {
        if !request.demo_video {
            return Ok(Vec::new());
        }
        let Some(video_path) = asset
            .filter(|a| a.kind == MediaKind::Video)
            .and_then(|a| a.download_path.as_deref())
        else {
            return Ok(Vec::new());
        };

        progress.emit("frames_start", json!({})).await;
        match self.frames.extract(video_path, cancel).await {
            Ok(frames) => {
                progress
                    .emit("frames_complete", json!({ "frame_count": frames.len() }))
                    .await;
                Ok(frames)
            }
            Err(LecternError::Cancelled) => Err(LecternError::Cancelled),
            Err(e) => {
                log::warn!("[Pipeline] Frame sampling failed: {}", e);
                progress
                    .emit("frames_complete", json!({ "frame_count": 0 }))
                    .await;
                Ok(Vec::new())
            }
        }
    }

    fn prompt_context(
        &self,
        classification: &Classification,
        content: &ExtractedContent,
        transcript: Option<&Transcript>,
        asset: &Option<MediaAsset>,
    ) -> PromptContext {
        let formatted = transcript.map(format_transcript);

        if classification.kind == ContentKind::PaywalledPublisher
            && classification.platform == "seekingalpha"
        {
            return PromptContext::Earnings {
                transcript: formatted,
                article_text: content.text.clone(),
            };
        }

        // The content's nature picks the context; a video analyzed from
        // its audio track still gets the video instructions.
        let media_kind = MediaKind::from_content_kind(classification.kind)
            .or_else(|| asset.as_ref().map(|a| a.kind));

        match media_kind {
            Some(MediaKind::Video) => PromptContext::Video {
                transcript: formatted,
                video_urls: classification
                    .media_id
                    .as_ref()
                    .map(|id| vec![format!("https://www.youtube.com/watch?v={}", id)])
                    .unwrap_or_default(),
                article_text: content.text.clone(),
            },
            Some(MediaKind::Audio) => PromptContext::Audio {
                transcript: formatted,
                audio_platform: classification.platform.clone(),
                article_text: content.text.clone(),
            },
            _ => PromptContext::Text {
                article_text: content.text.clone(),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_stage(
        &self,
        request: &PipelineRequest,
        canonical: &str,
        classification: &Classification,
        content: &ExtractedContent,
        transcript: Option<&Transcript>,
        asset: Option<&MediaAsset>,
        frames: &[crate::frames::FilteredFrame],
        insights: &Insights,
        duration_seconds: Option<f64>,
    ) -> LecternResult<crate::store::SaveOutcome> {
        // The content's nature decides the source kind, not the track
        // that happened to be downloaded (a video processed audio-only
        // is still a video).
        let content_source = match MediaKind::from_content_kind(classification.kind) {
            Some(MediaKind::Video) => ContentSourceKind::Video,
            Some(MediaKind::Audio) => ContentSourceKind::Audio,
            _ => match asset.map(|a| a.kind) {
                Some(MediaKind::Video) => ContentSourceKind::Video,
                Some(MediaKind::Audio) => ContentSourceKind::Audio,
                _ => ContentSourceKind::Article,
            },
        };

        let video_id = match content_source {
            ContentSourceKind::Video => classification.media_id.clone(),
            _ => None,
        };
        let audio_url = match content_source {
            ContentSourceKind::Audio => asset
                .map(|a| a.url.clone())
                .or_else(|| classification.direct_media_url.clone()),
            _ => None,
        };
        // Keep content_source consistent with the media columns: an
        // audio row without a resolvable audio URL degrades to article.
        let content_source = match content_source {
            ContentSourceKind::Audio if audio_url.is_none() => ContentSourceKind::Article,
            other => other,
        };

        let transcript_text = transcript.map(format_transcript);
        let summary_text = strip_html(&insights.summary);

        // Earnings analyses carry named sections instead of a flat
        // insight list; the sections object is stored in the same
        // column.
        let key_insights_value = if insights.sections.is_empty() {
            serde_json::to_value(&insights.key_insights).unwrap_or_default()
        } else {
            Value::Object(insights.sections.clone())
        };

        let record = NewArticle {
            title: content.title.clone(),
            url: canonical.to_string(),
            content_source,
            platform: classification.platform.clone(),
            video_id,
            audio_url,
            word_count: insights.word_count.or(Some(content.word_count)),
            duration_seconds,
            summary_text,
            summary_html: insights.summary_html.clone(),
            transcript_text,
            key_insights: key_insights_value,
            quotes: serde_json::to_value(&insights.quotes).unwrap_or_default(),
            topics: serde_json::to_value(&insights.topics).unwrap_or_default(),
            video_frames: Value::Array(Vec::new()),
            media: MediaPointer::default(),
        };

        // Embedding first: it is an external call and must not sit
        // inside the persistence transaction.
        let embedding_input = embedding_text(&record.title, insights);
        let embedding = with_retry("embedding", || self.embedder.embed(&embedding_input)).await?;

        let user = match &request.user {
            Some(user) if user.organization_id.is_none() => Some(UserRef {
                user_id: user.user_id.clone(),
                organization_id: self.articles.organization_of(&user.user_id).await?,
            }),
            other => other.clone(),
        };

        let outcome = self
            .articles
            .save_processed(&record, user.as_ref(), Some(&embedding), request.force_reprocess)
            .await?;

        // Long-term media and frames are keyed by the row id, so they
        // upload after the upsert.
        if let Some(asset) = asset.filter(|a| a.download_path.is_some()) {
            match self
                .media
                .persist_to_bucket(self.storage.as_ref(), asset, outcome.article_id, false)
                .await
            {
                Ok(pointer) => {
                    self.articles
                        .set_media_pointer(outcome.article_id, false, &pointer)
                        .await?;
                }
                Err(e) => {
                    log::warn!(
                        "[Pipeline] Long-term media upload failed for article {}: {}",
                        outcome.article_id,
                        e
                    );
                }
            }
        }

        if !frames.is_empty() {
            let uploaded = self
                .frames
                .upload(self.storage.as_ref(), outcome.article_id, frames)
                .await?;
            self.articles
                .update_frames(
                    outcome.article_id,
                    false,
                    &serde_json::to_value(&uploaded).unwrap_or_default(),
                )
                .await?;
        }

        Ok(outcome)
    }
}

/// Builds the embedding input: title, summary, insights, topics, and
/// quotes, bounded to the embedding character budget.
pub fn embedding_text(title: &str, insights: &Insights) -> String {
    let mut parts = vec![title.to_string(), strip_html(&insights.summary)];
    parts.extend(insights.key_insights.iter().map(|i| i.insight.clone()));
    parts.push(insights.topics.join(", "));
    parts.extend(insights.quotes.iter().map(|q| q.quote.clone()));
    truncate_with_ellipsis(&parts.join("\n"), crate::config::MAX_EMBEDDING_CHARS)
}

/// Drops HTML tags, keeping text content.
pub fn strip_html(html: &str) -> String {
    if !html.contains('<') {
        return html.trim().to_string();
    }
    let fragment = scraper::Html::parse_fragment(html);
    fragment
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ProgressBus, ProgressFrame};
    use crate::oracle::{ChatModel, SpeechOracle};
    use crate::store::memory::InMemoryStore;
    use crate::store::objects::InMemoryObjectStorage;
    use crate::transcript::{CaptionProvider, TimedWord, TranscriptSegment, YoutubeTimedText};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::path::Path;

    #[test]
    fn strip_html_flattens_paragraphs() {
        assert_eq!(
            strip_html("<p>First para.</p><p>Second one.</p>"),
            "First para. Second one."
        );
        assert_eq!(strip_html("plain text"), "plain text");
    }

    #[test]
    fn embedding_text_bounded() {
        let insights = Insights {
            summary: "s".repeat(20_000),
            ..Default::default()
        };
        let text = embedding_text("Title", &insights);
        assert!(text.len() <= crate::config::MAX_EMBEDDING_CHARS + 3);
    }

    // ─────────────────────────────────────────────────────────────────
    // Scripted collaborators
    // ─────────────────────────────────────────────────────────────────

    struct ScriptedFetcher {
        pages: Mutex<HashMap<String, String>>,
        hang: bool,
    }

    impl ScriptedFetcher {
        fn with_page(url: &str, html: &str) -> Self {
            let mut pages = HashMap::new();
            pages.insert(url.to_string(), html.to_string());
            Self {
                pages: Mutex::new(pages),
                hang: false,
            }
        }

        fn hanging() -> Self {
            Self {
                pages: Mutex::new(HashMap::new()),
                hang: true,
            }
        }
    }

    #[async_trait::async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> LecternResult<FetchResult> {
            if self.hang {
                // Simulates a stalled upstream; only cancellation ends it.
                futures::future::pending::<()>().await;
            }
            let html = self
                .pages
                .lock()
                .get(url)
                .cloned()
                .ok_or_else(|| LecternError::Network(format!("no page for {}", url)))?;
            Ok(FetchResult {
                final_url: url.to_string(),
                html,
                status: 200,
                ..Default::default()
            })
        }
    }

    #[derive(Default)]
    struct ScriptedMedia {
        platform_asset: Option<MediaAsset>,
        direct_asset: Option<MediaAsset>,
    }

    #[async_trait::async_trait]
    impl MediaResolver for ScriptedMedia {
        fn find_embedded_audio(&self, html: &str) -> Option<String> {
            html.contains("<audio src=")
                .then(|| "https://cdn.example.com/call.mp3".to_string())
        }

        async fn download_direct(
            &self,
            url: &str,
            kind: MediaKind,
            _dest_dir: &Path,
            _cancel: &CancellationToken,
        ) -> LecternResult<MediaAsset> {
            self.direct_asset
                .clone()
                .ok_or_else(|| LecternError::Network(format!("no asset for {}", url)))
                .map(|mut a| {
                    a.kind = kind;
                    a
                })
        }

        async fn download_platform(
            &self,
            classification: &Classification,
            _want_video: bool,
            _dest_dir: &Path,
            _cancel: &CancellationToken,
        ) -> LecternResult<MediaAsset> {
            self.platform_asset.clone().ok_or_else(|| {
                LecternError::ClassificationMiss(classification.platform.clone())
            })
        }

        async fn persist_to_bucket(
            &self,
            _storage: &dyn ObjectStorage,
            asset: &MediaAsset,
            article_id: i64,
            _private: bool,
        ) -> LecternResult<MediaPointer> {
            Ok(MediaPointer {
                bucket: Some(crate::config::EXPIRING_MEDIA_BUCKET.to_string()),
                path: Some(format!("public/{}/media.mp3", article_id)),
                uploaded_at: Some(chrono::Utc::now()),
                content_type: Some(asset.content_type.clone()),
                size_bytes: asset.size_bytes,
                duration_seconds: asset.duration_seconds,
                is_permanent: false,
            })
        }
    }

    struct ScriptedCaptions {
        manual: Option<Vec<TranscriptSegment>>,
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
            Ok(None)
        }
    }

    struct ScriptedSpeech {
        words: Vec<TimedWord>,
    }

    #[async_trait::async_trait]
    impl SpeechOracle for ScriptedSpeech {
        async fn transcribe_words(&self, _audio: &Path) -> LecternResult<Vec<TimedWord>> {
            Ok(self.words.clone())
        }

        async fn transcribe_segments(
            &self,
            _audio: &Path,
        ) -> LecternResult<Vec<TranscriptSegment>> {
            Ok(Vec::new())
        }
    }

    struct ScriptedModel {
        response: String,
    }

    #[async_trait::async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, _system: Option<&str>, _prompt: &str) -> LecternResult<String> {
            Ok(self.response.clone())
        }
    }

    struct FixedEmbedder;

    #[async_trait::async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> LecternResult<Vec<f32>> {
            Ok(vec![0.5; crate::config::EMBEDDING_DIMENSIONS as usize])
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Harness
    // ─────────────────────────────────────────────────────────────────

    const ANALYSIS_RESPONSE: &str = r#"{
        "summary": "<p>A thorough look at the subject.</p><p>With conclusions.</p>",
        "key_insights": [
            {"insight": "Valid timestamped point", "timestamp_seconds": 45, "time_formatted": "0:45"},
            {"insight": "Out of range point", "timestamp_seconds": 99999, "time_formatted": "bad"}
        ],
        "quotes": [{"quote": "Memorable words", "speaker": "Host", "timestamp_seconds": 50, "time_formatted": "0:50"}],
        "duration_minutes": 10,
        "word_count": 1200,
        "topics": ["Technology", "Strategy"]
    }"#;

    struct Harness {
        store: Arc<InMemoryStore>,
        pipeline: Pipeline,
    }

    fn harness(fetcher: ScriptedFetcher, media: ScriptedMedia, captions: ScriptedCaptions, speech: ScriptedSpeech, response: &str) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = Pipeline {
            articles: store.clone(),
            queue: store.clone(),
            channels: store.clone(),
            storage: Arc::new(InMemoryObjectStorage::new()),
            fetcher: Arc::new(fetcher),
            media: Arc::new(media),
            transcripts: Arc::new(TranscriptAcquirer::new(
                Arc::new(captions),
                Arc::new(speech),
            )),
            insights: Arc::new(InsightGenerator::new(Arc::new(ScriptedModel {
                response: response.to_string(),
            }))),
            embedder: Arc::new(FixedEmbedder),
            frames: Arc::new(crate::frames::FrameSampler::new(Arc::new(
                crate::frames::DisabledPersonDetector,
            ))),
            media_retention_days: 30,
        };
        Harness { store, pipeline }
    }

    fn text_harness(url: &str, html: &str) -> Harness {
        harness(
            ScriptedFetcher::with_page(url, html),
            ScriptedMedia::default(),
            ScriptedCaptions { manual: None },
            ScriptedSpeech { words: vec![] },
            ANALYSIS_RESPONSE,
        )
    }

    async fn run_and_collect(
        pipeline: &Pipeline,
        request: PipelineRequest,
    ) -> Vec<ProgressFrame> {
        let (tx, mut rx) = ProgressBus::channel();
        pipeline
            .run(request, tx, CancellationToken::new())
            .await;
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    fn names(frames: &[ProgressFrame]) -> Vec<&str> {
        frames.iter().map(|f| f.event.as_str()).collect()
    }

    fn request(url: &str, user: &str) -> PipelineRequest {
        PipelineRequest {
            url: url.to_string(),
            user: Some(UserRef {
                user_id: user.to_string(),
                organization_id: None,
            }),
            force_reprocess: false,
            demo_video: false,
        }
    }

    fn article_html() -> String {
        format!(
            "<html><head><title>Deep Post</title></head><body><article>{}</article></body></html>",
            "insightful words ".repeat(100)
        )
    }

    /// Checks the event-ordering property: `started` precedes every
    /// `*_start`, each `*_start` precedes its `*_complete`, terminal
    /// event last.
    fn assert_ordering(frames: &[ProgressFrame]) {
        let names = names(frames);
        let started = names.iter().position(|n| *n == "started").expect("started");
        for (idx, name) in names.iter().enumerate() {
            if let Some(step) = name.strip_suffix("_start") {
                assert!(idx > started, "{} before started", name);
                let complete = format!("{}_complete", step);
                let complete_idx = names.iter().position(|n| *n == complete);
                assert!(
                    complete_idx.map_or(false, |c| c > idx),
                    "{} has no later {}",
                    name,
                    complete
                );
            }
        }
        let last = names.last().expect("nonempty stream");
        assert!(
            *last == "completed" || *last == "error",
            "terminal event was {}",
            last
        );
    }

    // ─────────────────────────────────────────────────────────────────
    // Scenarios
    // ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn s1_text_article_full_stream_and_row() {
        let harness = text_harness("https://example.com/post", &article_html());

        let frames = run_and_collect(
            &harness.pipeline,
            request("https://example.com/post?utm=x", "user-1"),
        )
        .await;

        assert_eq!(
            names(&frames),
            vec![
                "ping",
                "started",
                "fetch_start",
                "fetch_complete",
                "content_extract_start",
                "content_extracted",
                "ai_start",
                "ai_complete",
                "save_start",
                "save_complete",
                "completed",
            ]
        );
        assert_ordering(&frames);

        // save_complete carries the id; completed carries the path.
        let save = frames.iter().find(|f| f.event == "save_complete").unwrap();
        let id = save.data["article_id"].as_i64().unwrap();
        let completed = frames.last().unwrap();
        assert_eq!(
            completed.data["url"].as_str().unwrap(),
            format!("/article/{}", id)
        );

        // Row assertions: canonical URL, analysis present, embedding
        // dimension.
        let article = harness.store.load(id, false).await.unwrap().unwrap();
        assert_eq!(article.url, "https://example.com/post");
        assert_eq!(article.content_source, ContentSourceKind::Article);
        assert_eq!(article.title, "Deep Post");
        assert!(!article.summary_text.is_empty());
        assert!(!article.topics.as_array().unwrap().is_empty());
        assert_eq!(
            harness.store.embedding_of(id).unwrap().len(),
            crate::config::EMBEDDING_DIMENSIONS as usize
        );
        assert_eq!(harness.store.association_count(), 1);
    }

    #[tokio::test]
    async fn property_canonicalization_same_row_for_stripped_url() {
        let harness = text_harness("https://example.com/post", &article_html());

        let first = run_and_collect(
            &harness.pipeline,
            request("https://example.com/post?utm=x", "user-1"),
        )
        .await;
        let first_id = first
            .iter()
            .find(|f| f.event == "save_complete")
            .unwrap()
            .data["article_id"]
            .as_i64()
            .unwrap();

        let second = run_and_collect(
            &harness.pipeline,
            request("https://example.com/post", "user-1"),
        )
        .await;

        // Same canonical form: one row, second run short-circuits to
        // the same id.
        let dup = second
            .iter()
            .find(|f| f.event == "duplicate_detected")
            .unwrap();
        assert_eq!(dup.data["article_id"].as_i64().unwrap(), first_id);
        assert_eq!(harness.store.article_count(), 1);
    }

    #[tokio::test]
    async fn s4_duplicate_same_user_short_circuits() {
        let harness = text_harness("https://example.com/post", &article_html());

        run_and_collect(&harness.pipeline, request("https://example.com/post", "user-1")).await;
        let frames =
            run_and_collect(&harness.pipeline, request("https://example.com/post", "user-1"))
                .await;

        assert_eq!(
            names(&frames),
            vec!["ping", "started", "duplicate_detected", "completed"]
        );
        assert_eq!(frames.last().unwrap().data["already_processed"], true);
        assert_eq!(harness.store.article_count(), 1);
        assert_eq!(harness.store.association_count(), 1);
    }

    #[tokio::test]
    async fn s5_global_duplicate_new_user_attaches_quietly() {
        let harness = text_harness("https://example.com/post", &article_html());

        run_and_collect(&harness.pipeline, request("https://example.com/post", "alice")).await;
        let frames =
            run_and_collect(&harness.pipeline, request("https://example.com/post", "bob")).await;

        // No duplicate_detected: the association is attached silently.
        assert_eq!(names(&frames), vec!["ping", "started", "completed"]);
        let completed = frames.last().unwrap();
        assert_eq!(completed.data["already_processed"], true);
        assert!(completed.data["article_id"].as_i64().is_some());

        assert_eq!(harness.store.article_count(), 1);
        assert_eq!(harness.store.association_count(), 2);
    }

    #[tokio::test]
    async fn s2_video_with_native_transcript() {
        let video_url = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
        let captions = ScriptedCaptions {
            manual: Some(
                (0..20)
                    .map(|i| TranscriptSegment {
                        start_seconds: i as f64 * 10.0,
                        duration: Some(9.0),
                        text: format!("caption chunk {}", i),
                        speaker: None,
                    })
                    .collect(),
            ),
        };
        let media = ScriptedMedia {
            platform_asset: Some(MediaAsset {
                kind: MediaKind::Audio,
                url: video_url.to_string(),
                download_path: None,
                content_type: "audio/mp4".to_string(),
                size_bytes: Some(1024),
                duration_seconds: Some(200.0),
            }),
            direct_asset: None,
        };
        let harness = harness(
            ScriptedFetcher::with_page(video_url, "<html><body>watch page</body></html>"),
            media,
            captions,
            ScriptedSpeech { words: vec![] },
            ANALYSIS_RESPONSE,
        );

        let frames = run_and_collect(&harness.pipeline, request(video_url, "user-1")).await;
        assert_ordering(&frames);

        let transcript = frames
            .iter()
            .find(|f| f.event == "transcript_complete")
            .unwrap();
        assert_eq!(transcript.data["source"], "platform_native");
        assert_eq!(transcript.data["available"], true);

        let id = frames
            .iter()
            .find(|f| f.event == "save_complete")
            .unwrap()
            .data["article_id"]
            .as_i64()
            .unwrap();
        let article = harness.store.load(id, false).await.unwrap().unwrap();
        assert_eq!(article.content_source, ContentSourceKind::Video);
        assert_eq!(article.video_id.as_deref(), Some("dQw4w9WgXcQ"));
        // Transcript stored with timestamp prefixes.
        let stored = article.transcript_text.unwrap();
        assert!(stored.lines().all(|l| l.starts_with('[')));

        // Timestamp containment: the out-of-range insight was nulled,
        // the in-range one kept.
        let insights = article.key_insights.as_array().unwrap();
        assert_eq!(insights[0]["timestamp_seconds"], 45.0);
        assert!(insights[1]["timestamp_seconds"].is_null());
    }

    #[tokio::test]
    async fn s3_earnings_call_aligned_transcript_and_sections() {
        let call_url = "https://seekingalpha.com/article/q3-call";
        let transcript_words = "good morning and welcome to the third quarter earnings call";
        let html = format!(
            "<html><body><audio src=\"https://cdn.example.com/call.mp3\"></audio>\
             <article>Operator:\n{}\n</article></body></html>",
            "Good morning and welcome to the third quarter earnings call."
        );
        let words: Vec<TimedWord> = transcript_words
            .split_whitespace()
            .enumerate()
            .map(|(i, w)| TimedWord {
                word: w.to_string(),
                start: i as f64 * 2.0,
                end: i as f64 * 2.0 + 1.5,
            })
            .collect();

        let earnings_response = r#"{
            "summary": "Solid quarter.",
            "key_metrics": {"revenue": "$2.1B"},
            "guidance": {"full_year": "raised"},
            "notable_quotes": [{"quote": "Margins expanded", "speaker": "CFO"}],
            "topics": ["Earnings"]
        }"#;

        let media = ScriptedMedia {
            platform_asset: None,
            direct_asset: Some(MediaAsset {
                kind: MediaKind::Audio,
                url: "https://cdn.example.com/call.mp3".to_string(),
                download_path: Some(std::env::temp_dir().join("call.mp3")),
                content_type: "audio/mpeg".to_string(),
                size_bytes: Some(2048),
                duration_seconds: Some(3600.0),
            }),
        };
        let harness = harness(
            ScriptedFetcher::with_page(call_url, &html),
            media,
            ScriptedCaptions { manual: None },
            ScriptedSpeech { words },
            earnings_response,
        );

        let frames = run_and_collect(&harness.pipeline, request(call_url, "user-1")).await;
        assert_ordering(&frames);

        let transcript = frames
            .iter()
            .find(|f| f.event == "transcript_complete")
            .unwrap();
        assert_eq!(transcript.data["source"], "aligned");

        let id = frames
            .iter()
            .find(|f| f.event == "save_complete")
            .unwrap()
            .data["article_id"]
            .as_i64()
            .unwrap();
        let article = harness.store.load(id, false).await.unwrap().unwrap();

        // Every earnings section present as object or list, never
        // missing.
        let sections = article.key_insights.as_object().unwrap();
        for key in crate::insight::parse::EARNINGS_SECTIONS {
            let value = sections.get(key).unwrap_or_else(|| panic!("missing {}", key));
            assert!(value.is_object() || value.is_array());
        }
        assert_eq!(sections["key_metrics"]["revenue"], "$2.1B");
    }

    #[tokio::test]
    async fn s6_reprocess_embedding_only() {
        let harness = text_harness("https://example.com/post", &article_html());
        let frames =
            run_and_collect(&harness.pipeline, request("https://example.com/post", "user-1"))
                .await;
        let id = frames
            .iter()
            .find(|f| f.event == "save_complete")
            .unwrap()
            .data["article_id"]
            .as_i64()
            .unwrap();
        let summary_before = harness
            .store
            .load(id, false)
            .await
            .unwrap()
            .unwrap()
            .summary_text;

        let (tx, mut rx) = ProgressBus::channel();
        harness
            .pipeline
            .reprocess(
                ReprocessRequest {
                    article_id: id,
                    is_private: false,
                    steps: vec![ReprocessStep::Embedding],
                    user: UserRef {
                        user_id: "user-1".into(),
                        organization_id: None,
                    },
                },
                tx,
                CancellationToken::new(),
            )
            .await;

        let mut reprocess_frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            reprocess_frames.push(frame);
        }
        let event_names = names(&reprocess_frames);

        assert!(event_names.contains(&"embedding_start"));
        assert!(event_names.contains(&"embedding_complete"));
        assert!(!event_names.iter().any(|n| n.starts_with("ai_summary")));
        assert!(!event_names.iter().any(|n| n.starts_with("transcript")));

        let article = harness.store.load(id, false).await.unwrap().unwrap();
        assert_eq!(article.summary_text, summary_before);
        assert!(harness.store.embedding_of(id).is_some());
    }

    #[tokio::test]
    async fn property_reprocess_gating_without_media() {
        let harness = text_harness("https://example.com/post", &article_html());
        let frames =
            run_and_collect(&harness.pipeline, request("https://example.com/post", "user-1"))
                .await;
        let id = frames
            .iter()
            .find(|f| f.event == "save_complete")
            .unwrap()
            .data["article_id"]
            .as_i64()
            .unwrap();

        let (tx, mut rx) = ProgressBus::channel();
        harness
            .pipeline
            .reprocess(
                ReprocessRequest {
                    article_id: id,
                    is_private: false,
                    steps: vec![ReprocessStep::VideoFrames, ReprocessStep::Transcript],
                    user: UserRef {
                        user_id: "user-1".into(),
                        organization_id: None,
                    },
                },
                tx,
                CancellationToken::new(),
            )
            .await;

        let mut skipped = 0;
        let mut completed_results = None;
        while let Some(frame) = rx.recv().await {
            if frame.event.ends_with("_skipped") {
                skipped += 1;
                assert_eq!(frame.data["reason"], "no stored media");
            }
            if frame.event == "completed" {
                completed_results = Some(frame.data["results"].clone());
            }
        }
        assert_eq!(skipped, 2);
        let results = completed_results.unwrap();
        assert_eq!(results["video_frames"]["success"], false);

        // Nothing mutated for the gated steps.
        let article = harness.store.load(id, false).await.unwrap().unwrap();
        assert!(article.transcript_text.is_none());
        assert!(article.video_frames.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn property_cancellation_leaves_no_rows_and_no_error_event() {
        let harness = harness(
            ScriptedFetcher::hanging(),
            ScriptedMedia::default(),
            ScriptedCaptions { manual: None },
            ScriptedSpeech { words: vec![] },
            ANALYSIS_RESPONSE,
        );
        let store = harness.store.clone();

        let (tx, mut rx) = ProgressBus::channel();
        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let pipeline = harness.pipeline;
        let run = tokio::spawn(async move {
            pipeline
                .run(request("https://example.com/slow", "user-1"), tx, run_cancel)
                .await;
        });

        // Let the run reach the hanging fetch, then disconnect.
        tokio::task::yield_now().await;
        cancel.cancel();
        run.await.unwrap();

        let mut event_names = Vec::new();
        while let Some(frame) = rx.recv().await {
            event_names.push(frame.event);
        }
        assert!(!event_names.contains(&"error".to_string()));
        assert!(!event_names.contains(&"completed".to_string()));
        assert_eq!(store.article_count(), 0);
        assert_eq!(store.association_count(), 0);
    }

    #[tokio::test]
    async fn reprocess_info_reports_gates() {
        let harness = text_harness("https://example.com/post", &article_html());
        let frames =
            run_and_collect(&harness.pipeline, request("https://example.com/post", "user-1"))
                .await;
        let id = frames
            .iter()
            .find(|f| f.event == "save_complete")
            .unwrap()
            .data["article_id"]
            .as_i64()
            .unwrap();

        let info = harness.pipeline.reprocess_info(id, false).await.unwrap();
        assert!(info.available_operations.contains(&"ai_summary"));
        assert!(info.available_operations.contains(&"embedding"));
        assert!(info.unavailable_operations.contains_key("video_frames"));
        assert!(info.unavailable_operations.contains_key("themed_insights"));
        assert!(!info.has_stored_media);
    }

    #[test]
    fn youtube_timedtext_constructs() {
        // Wiring smoke test for the production caption provider.
        assert!(YoutubeTimedText::new(std::time::Duration::from_secs(10)).is_ok());
    }
}
