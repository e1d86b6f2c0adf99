//! Partial re-execution of pipeline steps on a persisted content item.
//!
//! A reprocess request names an article and a subset of steps. Steps
//! gated on state that is no longer present (stored media, privacy
//! scope) are reported `_skipped` with a reason and mutate nothing.
//! Each step emits `<step>_start` and `_complete`/`_error`/`_skipped`;
//! the terminal `completed` event carries per-step outcomes.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::{LecternError, LecternResult};
use crate::events::ProgressSender;
use crate::insight::PromptContext;
use crate::retry::with_retry;
use crate::store::{Article, ContentSourceKind, UserRef};
use crate::transcript::{format_transcript, AcquireRequest};

use super::{embedding_text, strip_html, Pipeline};

/// A reprocessable step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReprocessStep {
    AiSummary,
    ThemedInsights,
    Embedding,
    VideoFrames,
    Transcript,
}

impl ReprocessStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AiSummary => "ai_summary",
            Self::ThemedInsights => "themed_insights",
            Self::Embedding => "embedding",
            Self::VideoFrames => "video_frames",
            Self::Transcript => "transcript",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ai_summary" => Some(Self::AiSummary),
            "themed_insights" => Some(Self::ThemedInsights),
            "embedding" => Some(Self::Embedding),
            "video_frames" => Some(Self::VideoFrames),
            "transcript" => Some(Self::Transcript),
            _ => None,
        }
    }
}

/// One reprocess invocation.
#[derive(Debug, Clone)]
pub struct ReprocessRequest {
    pub article_id: i64,
    pub is_private: bool,
    pub steps: Vec<ReprocessStep>,
    pub user: UserRef,
}

/// Outcome of a single step, as carried on the terminal event.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StepResult {
    pub success: bool,
    pub message: String,
}

/// Availability report for the reprocess UI.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReprocessInfo {
    pub article_id: i64,
    pub title: String,
    pub url: String,
    pub is_private: bool,
    pub has_transcript: bool,
    pub has_video_frames: bool,
    pub has_embedding: bool,
    pub content_source: String,
    pub available_operations: Vec<&'static str>,
    pub unavailable_operations: BTreeMap<&'static str, String>,
    pub has_stored_media: bool,
    pub media_storage_bucket: Option<String>,
    /// Access URL: public for permanent media, short-lived signed URL
    /// for the expiring bucket.
    pub media_url: Option<String>,
    pub media_size_mb: Option<f64>,
    pub media_days_remaining: Option<i64>,
    pub media_is_permanent: bool,
}

const NO_STORED_MEDIA: &str = "no stored media";
const PRIVATE_ONLY: &str = "Only available for private articles";

fn media_gate(article: &Article) -> Result<(), String> {
    if article.media.is_present() {
        Ok(())
    } else {
        Err(NO_STORED_MEDIA.to_string())
    }
}

impl Pipeline {
    /// Reports which reprocess operations the row currently supports.
    pub async fn reprocess_info(
        &self,
        article_id: i64,
        is_private: bool,
    ) -> LecternResult<ReprocessInfo> {
        let article = self
            .articles
            .load(article_id, is_private)
            .await?
            .ok_or(LecternError::ArticleNotFound(article_id))?;

        let mut available = vec![ReprocessStep::AiSummary.as_str(), ReprocessStep::Embedding.as_str()];
        let mut unavailable = BTreeMap::new();

        if is_private {
            available.push(ReprocessStep::ThemedInsights.as_str());
        } else {
            unavailable.insert(ReprocessStep::ThemedInsights.as_str(), PRIVATE_ONLY.to_string());
        }

        for step in [ReprocessStep::VideoFrames, ReprocessStep::Transcript] {
            match media_gate(&article) {
                Ok(()) => available.push(step.as_str()),
                Err(reason) => {
                    unavailable.insert(step.as_str(), reason);
                }
            }
        }

        let media_days_remaining = article.media.uploaded_at.map(|uploaded| {
            let age_days = (Utc::now() - uploaded).num_days();
            (self.media_retention_days - age_days).max(0)
        });

        let media_url = match (&article.media.bucket, &article.media.path) {
            (Some(bucket), Some(path)) if article.media.is_permanent => {
                Some(self.storage.public_url(bucket, path))
            }
            (Some(bucket), Some(path)) => self
                .storage
                .signed_url(bucket, path, crate::store::objects::SIGNED_URL_TTL)
                .await
                .ok(),
            _ => None,
        };

        Ok(ReprocessInfo {
            article_id: article.id,
            title: article.title.clone(),
            url: article.url.clone(),
            is_private,
            has_transcript: article.transcript_text.as_deref().map_or(false, |t| !t.is_empty()),
            has_video_frames: article
                .video_frames
                .as_array()
                .map_or(false, |f| !f.is_empty()),
            has_embedding: article.has_embedding,
            content_source: article.content_source.as_str().to_string(),
            available_operations: available,
            unavailable_operations: unavailable,
            has_stored_media: article.media.is_present(),
            media_storage_bucket: article.media.bucket.clone(),
            media_url,
            media_size_mb: article
                .media
                .size_bytes
                .map(|b| (b as f64 / 1024.0 / 1024.0 * 10.0).round() / 10.0),
            media_days_remaining: if article.media.is_permanent {
                None
            } else {
                media_days_remaining
            },
            media_is_permanent: article.media.is_permanent,
        })
    }

    /// Runs the requested steps, streaming per-step events, then emits
    /// the terminal `completed` with per-step outcomes and closes the
    /// bus.
    pub async fn reprocess(
        &self,
        request: ReprocessRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) {
        match self.reprocess_inner(&request, &progress, &cancel).await {
            Ok(()) => {}
            Err(LecternError::Cancelled) => {
                log::info!(
                    "[Reprocess] Cancelled for article {}",
                    request.article_id
                );
            }
            Err(e) => {
                log::error!("[Reprocess] Failed for article {}: {}", request.article_id, e);
                progress
                    .emit("error", json!({ "error": e.user_message() }))
                    .await;
            }
        }
        progress.close();
    }

    async fn reprocess_inner(
        &self,
        request: &ReprocessRequest,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> LecternResult<()> {
        progress
            .emit("ping", json!({ "message": "SSE connection established" }))
            .await;
        progress
            .emit(
                "started",
                json!({
                    "article_id": request.article_id,
                    "is_private": request.is_private,
                    "steps": request.steps,
                }),
            )
            .await;

        let article = self
            .articles
            .load(request.article_id, request.is_private)
            .await?
            .ok_or(LecternError::ArticleNotFound(request.article_id))?;

        progress
            .emit(
                "article_loaded",
                json!({
                    "title": article.title,
                    "content_source": article.content_source.as_str(),
                }),
            )
            .await;

        let mut results: BTreeMap<String, StepResult> = BTreeMap::new();

        for &step in &request.steps {
            if cancel.is_cancelled() {
                return Err(LecternError::Cancelled);
            }
            let name = step.as_str();

            // Gating first: a gated step is skipped without a _start.
            if let Some(reason) = self.gate_reason(step, request, &article) {
                progress
                    .emit(&format!("{}_skipped", name), json!({ "reason": reason }))
                    .await;
                results.insert(
                    name.to_string(),
                    StepResult {
                        success: false,
                        message: reason,
                    },
                );
                continue;
            }

            progress.emit(&format!("{}_start", name), json!({})).await;
            let outcome = self.run_step(step, request, &article, cancel).await;
            match outcome {
                Ok(message) => {
                    progress
                        .emit(&format!("{}_complete", name), json!({ "message": message }))
                        .await;
                    results.insert(name.to_string(), StepResult { success: true, message });
                }
                Err(LecternError::Cancelled) => return Err(LecternError::Cancelled),
                Err(e) => {
                    log::warn!("[Reprocess] Step {} failed: {}", name, e);
                    progress
                        .emit(
                            &format!("{}_error", name),
                            json!({ "error": e.user_message() }),
                        )
                        .await;
                    results.insert(
                        name.to_string(),
                        StepResult {
                            success: false,
                            message: e.user_message(),
                        },
                    );
                }
            }
        }

        let all_success = !results.is_empty() && results.values().all(|r| r.success);
        let any_success = results.values().any(|r| r.success);
        let article_url = if request.is_private {
            format!("/private-article/{}", request.article_id)
        } else {
            format!("/article/{}", request.article_id)
        };

        progress
            .emit(
                "completed",
                json!({
                    "article_id": request.article_id,
                    "url": article_url,
                    "all_success": all_success,
                    "any_success": any_success,
                    "results": results,
                }),
            )
            .await;
        Ok(())
    }

    fn gate_reason(
        &self,
        step: ReprocessStep,
        request: &ReprocessRequest,
        article: &Article,
    ) -> Option<String> {
        match step {
            ReprocessStep::AiSummary | ReprocessStep::Embedding => None,
            ReprocessStep::ThemedInsights => {
                if request.is_private {
                    None
                } else {
                    Some(PRIVATE_ONLY.to_string())
                }
            }
            ReprocessStep::VideoFrames | ReprocessStep::Transcript => media_gate(article).err(),
        }
    }

    async fn run_step(
        &self,
        step: ReprocessStep,
        request: &ReprocessRequest,
        article: &Article,
        cancel: &CancellationToken,
    ) -> LecternResult<String> {
        match step {
            ReprocessStep::AiSummary => self.rerun_summary(request, article, false).await,
            ReprocessStep::ThemedInsights => self.rerun_summary(request, article, true).await,
            ReprocessStep::Embedding => self.rerun_embedding(request, article).await,
            ReprocessStep::VideoFrames => self.rerun_frames(request, article, cancel).await,
            ReprocessStep::Transcript => self.rerun_transcript(request, article, cancel).await,
        }
    }

    async fn rerun_summary(
        &self,
        request: &ReprocessRequest,
        article: &Article,
        themed: bool,
    ) -> LecternResult<String> {
        let transcript = article.transcript_text.clone().filter(|t| !t.is_empty());
        // The stored summary is the best text basis once the original
        // page is no longer on hand.
        let basis = if article.summary_text.is_empty() {
            article.title.clone()
        } else {
            article.summary_text.clone()
        };

        let context = match article.content_source {
            ContentSourceKind::Video => PromptContext::Video {
                transcript,
                video_urls: article
                    .video_id
                    .as_ref()
                    .map(|id| vec![format!("https://www.youtube.com/watch?v={}", id)])
                    .unwrap_or_default(),
                article_text: basis,
            },
            ContentSourceKind::Audio | ContentSourceKind::Mixed => PromptContext::Audio {
                transcript,
                audio_platform: article.platform.clone(),
                article_text: basis,
            },
            ContentSourceKind::Article => PromptContext::Text { article_text: basis },
        };

        let metadata = json!({
            "title": article.title,
            "url": article.url,
            "platform": article.platform,
            "themed": themed,
        });
        let insights = self
            .insights
            .generate(&article.url, &metadata, &context, article.duration_seconds)
            .await?;

        self.articles
            .update_insights(
                article.id,
                request.is_private,
                &strip_html(&insights.summary),
                insights.summary_html.as_deref(),
                &serde_json::to_value(&insights.key_insights).unwrap_or_default(),
                &serde_json::to_value(&insights.quotes).unwrap_or_default(),
                &serde_json::to_value(&insights.topics).unwrap_or_default(),
            )
            .await?;

        Ok(if themed {
            "Themed insights regenerated".to_string()
        } else {
            "Summary regenerated".to_string()
        })
    }

    async fn rerun_embedding(
        &self,
        request: &ReprocessRequest,
        article: &Article,
    ) -> LecternResult<String> {
        let mut insights = crate::insight::Insights {
            summary: article.summary_text.clone(),
            ..Default::default()
        };
        if let Some(topics) = article.topics.as_array() {
            insights.topics = topics
                .iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect();
        }
        if let Ok(items) = serde_json::from_value(article.key_insights.clone()) {
            insights.key_insights = items;
        }
        if let Ok(quotes) = serde_json::from_value(article.quotes.clone()) {
            insights.quotes = quotes;
        }

        let input = embedding_text(&article.title, &insights);
        let embedding = with_retry("embedding", || self.embedder.embed(&input)).await?;
        self.articles
            .update_embedding(article.id, request.is_private, &embedding)
            .await?;
        Ok("Embedding regenerated".to_string())
    }

    async fn rerun_frames(
        &self,
        request: &ReprocessRequest,
        article: &Article,
        cancel: &CancellationToken,
    ) -> LecternResult<String> {
        let media_file = self.fetch_stored_media(article).await?;
        let frames = self.frames.extract(media_file.path(), cancel).await?;
        let uploaded = self
            .frames
            .upload(self.storage.as_ref(), article.id, &frames)
            .await?;
        let count = uploaded.len();
        self.articles
            .update_frames(
                article.id,
                request.is_private,
                &serde_json::to_value(&uploaded).unwrap_or_default(),
            )
            .await?;
        Ok(format!("Extracted {} frames", count))
    }

    async fn rerun_transcript(
        &self,
        request: &ReprocessRequest,
        article: &Article,
        cancel: &CancellationToken,
    ) -> LecternResult<String> {
        let media_file = self.fetch_stored_media(article).await?;

        let acquire = AcquireRequest {
            video_id: article.video_id.clone(),
            platform: article.platform.clone(),
            local_audio: Some(media_file.path().to_path_buf()),
            companion_transcript: None,
        };
        let transcript = self
            .transcripts
            .acquire(&acquire)
            .await?
            .ok_or_else(|| LecternError::TranscriptUnavailable(article.url.clone()))?;

        if cancel.is_cancelled() {
            return Err(LecternError::Cancelled);
        }
        let formatted = format_transcript(&transcript);
        self.articles
            .update_transcript(article.id, request.is_private, &formatted)
            .await?;
        Ok(format!(
            "Transcript regenerated ({} segments)",
            transcript.segments.len()
        ))
    }

    /// Downloads the stored media object into a temp file that lives
    /// for the duration of the step.
    async fn fetch_stored_media(&self, article: &Article) -> LecternResult<tempfile::NamedTempFile> {
        let (bucket, path) = match (&article.media.bucket, &article.media.path) {
            (Some(bucket), Some(path)) => (bucket.clone(), path.clone()),
            _ => return Err(LecternError::InvalidRequest(NO_STORED_MEDIA.to_string())),
        };

        let content = self.storage.download(&bucket, &path).await?;
        let extension = path.rsplit('.').next().unwrap_or("bin").to_string();
        let file = tempfile::Builder::new()
            .suffix(&format!(".{}", extension))
            .tempfile()?;
        tokio::fs::write(file.path(), &content).await?;
        Ok(file)
    }
}
