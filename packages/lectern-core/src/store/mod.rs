//! Storage abstractions and domain rows.
//!
//! Services depend on the traits in this module rather than concrete
//! backends. The production implementations live in [`postgres`]
//! (relational rows) and [`objects`] (bucket storage); tests use
//! in-memory doubles.

pub mod memory;
pub mod objects;
pub mod postgres;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::LecternResult;

// ─────────────────────────────────────────────────────────────────────────────
// Rows
// ─────────────────────────────────────────────────────────────────────────────

/// What kind of content a row holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSourceKind {
    Article,
    Video,
    Audio,
    Mixed,
}

impl ContentSourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Mixed => "mixed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "video" => Self::Video,
            "audio" => Self::Audio,
            "mixed" => Self::Mixed,
            _ => Self::Article,
        }
    }
}

/// Media pointer columns on a content row. All-or-nothing in practice:
/// either media was persisted to a bucket or every field is null.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MediaPointer {
    pub bucket: Option<String>,
    pub path: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub is_permanent: bool,
}

impl MediaPointer {
    pub fn is_present(&self) -> bool {
        self.path.is_some()
    }
}

/// A persisted content item.
#[derive(Debug, Clone)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub content_source: ContentSourceKind,
    pub platform: String,
    pub video_id: Option<String>,
    pub audio_url: Option<String>,
    pub word_count: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub summary_text: String,
    pub summary_html: Option<String>,
    pub transcript_text: Option<String>,
    pub key_insights: Value,
    pub quotes: Value,
    pub topics: Value,
    pub video_frames: Value,
    pub has_embedding: bool,
    pub media: MediaPointer,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating or overwriting a content row.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub title: String,
    pub url: String,
    pub content_source: ContentSourceKind,
    pub platform: String,
    pub video_id: Option<String>,
    pub audio_url: Option<String>,
    pub word_count: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub summary_text: String,
    pub summary_html: Option<String>,
    pub transcript_text: Option<String>,
    pub key_insights: Value,
    pub quotes: Value,
    pub topics: Value,
    pub video_frames: Value,
    pub media: MediaPointer,
}

/// Identity of the submitting user, for the association row.
#[derive(Debug, Clone)]
pub struct UserRef {
    pub user_id: String,
    pub organization_id: Option<String>,
}

/// Result of a full persist.
#[derive(Debug, Clone, Copy)]
pub struct SaveOutcome {
    pub article_id: i64,
    /// False when a concurrent writer (or an earlier run) already owned
    /// the URL and this call only attached the association.
    pub newly_created: bool,
}

/// Compact listing row for the reprocess UI.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ArticleSummaryRow {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub content_source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row whose expiring media is past retention.
#[derive(Debug, Clone)]
pub struct ExpiredMedia {
    pub article_id: i64,
    pub is_private: bool,
    pub storage_path: String,
    pub size_bytes: Option<i64>,
}

/// Queue row status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Discovered,
    Processing,
    Completed,
    Failed,
    Skipped,
    Queued,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Queued => "queued",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "skipped" => Self::Skipped,
            "queued" => Self::Queued,
            _ => Self::Discovered,
        }
    }
}

/// Discovered content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueContentType {
    Article,
    PodcastEpisode,
}

impl QueueContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::PodcastEpisode => "podcast_episode",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "podcast_episode" {
            Self::PodcastEpisode
        } else {
            Self::Article
        }
    }
}

/// A row in the shared content queue.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueItem {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub content_type: QueueContentType,
    pub channel_title: Option<String>,
    pub channel_url: Option<String>,
    /// Richer alternative source (usually a YouTube video for a podcast).
    pub video_url: Option<String>,
    pub platform: String,
    pub source_feed: Option<String>,
    pub found_at: DateTime<Utc>,
    pub published_date: Option<DateTime<Utc>>,
    pub status: QueueStatus,
    pub podcast_uuid: Option<String>,
    pub episode_uuid: Option<String>,
    pub duration_seconds: Option<i64>,
    pub played_up_to: Option<i64>,
    pub progress_percent: Option<f64>,
    pub playing_status: Option<String>,
}

/// Insert payload for the content queue.
#[derive(Debug, Clone, Default)]
pub struct NewQueueItem {
    pub url: String,
    pub title: String,
    pub content_type: Option<QueueContentType>,
    pub channel_title: Option<String>,
    pub channel_url: Option<String>,
    pub video_url: Option<String>,
    pub platform: String,
    pub source_feed: Option<String>,
    pub published_date: Option<DateTime<Utc>>,
    pub podcast_uuid: Option<String>,
    pub episode_uuid: Option<String>,
    pub duration_seconds: Option<i64>,
    pub played_up_to: Option<i64>,
    pub progress_percent: Option<f64>,
    pub playing_status: Option<String>,
}

/// Kind of a per-user content source subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Newsletter,
    Podcast,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Newsletter => "newsletter",
            Self::Podcast => "podcast",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "podcast" {
            Self::Podcast
        } else {
            Self::Newsletter
        }
    }
}

/// A per-user content source subscription.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ContentSource {
    pub id: i64,
    pub user_id: String,
    pub title: String,
    pub url: String,
    pub source_type: SourceKind,
    pub is_active: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// Fields a PATCH on a content source may change.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct SourcePatch {
    pub title: Option<String>,
    pub url: Option<String>,
    pub is_active: Option<bool>,
}

/// Browser session snapshot: serialized cookie jar + origin
/// localStorage, written out-of-band by the session uploader.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub platform: String,
    pub storage_state: Value,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait seams
// ─────────────────────────────────────────────────────────────────────────────

/// Content rows, associations, and reprocess bookkeeping.
#[async_trait::async_trait]
pub trait ArticleStore: Send + Sync {
    /// Finds a content row by canonical URL.
    async fn find_by_url(&self, canonical_url: &str) -> LecternResult<Option<Article>>;

    /// Loads a row by id from the public or private table.
    async fn load(&self, article_id: i64, private: bool) -> LecternResult<Option<Article>>;

    /// Whether the association row `(article_id, user_id)` exists.
    async fn user_has_article(&self, article_id: i64, user_id: &str) -> LecternResult<bool>;

    /// Upserts the association row. Idempotent.
    async fn associate_user(&self, article_id: i64, user: &UserRef) -> LecternResult<()>;

    /// Looks up the organization of a user.
    async fn organization_of(&self, user_id: &str) -> LecternResult<Option<String>>;

    /// Persists a processed record: content-row upsert by canonical URL
    /// (no overwrite unless `reprocess`), media pointers, association,
    /// and embedding, atomically visible to a subsequent library read.
    async fn save_processed(
        &self,
        record: &NewArticle,
        user: Option<&UserRef>,
        embedding: Option<&[f32]>,
        reprocess: bool,
    ) -> LecternResult<SaveOutcome>;

    /// Overwrites the analysis columns (reprocess: ai_summary).
    async fn update_insights(
        &self,
        article_id: i64,
        private: bool,
        summary_text: &str,
        summary_html: Option<&str>,
        key_insights: &Value,
        quotes: &Value,
        topics: &Value,
    ) -> LecternResult<()>;

    /// Overwrites the embedding column (reprocess: embedding).
    async fn update_embedding(
        &self,
        article_id: i64,
        private: bool,
        embedding: &[f32],
    ) -> LecternResult<()>;

    /// Overwrites the transcript column (reprocess: transcript).
    async fn update_transcript(
        &self,
        article_id: i64,
        private: bool,
        transcript_text: &str,
    ) -> LecternResult<()>;

    /// Overwrites the frame list (reprocess: video_frames).
    async fn update_frames(
        &self,
        article_id: i64,
        private: bool,
        frames: &Value,
    ) -> LecternResult<()>;

    /// Writes the media pointer columns after a long-term upload.
    async fn set_media_pointer(
        &self,
        article_id: i64,
        private: bool,
        pointer: &MediaPointer,
    ) -> LecternResult<()>;

    /// Paginated listing for the reprocess UI. Private listings are
    /// narrowed to the caller's organization.
    async fn list_for_reprocess(
        &self,
        private: bool,
        organization_id: Option<&str>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> LecternResult<(Vec<ArticleSummaryRow>, i64)>;

    /// Rows in `bucket` whose media was uploaded before `cutoff`.
    async fn expired_media(
        &self,
        bucket: &str,
        cutoff: DateTime<Utc>,
    ) -> LecternResult<Vec<ExpiredMedia>>;

    /// Nulls every media pointer column on a row.
    async fn clear_media_pointer(&self, article_id: i64, private: bool) -> LecternResult<()>;
}

/// The shared discovery queue.
#[async_trait::async_trait]
pub trait QueueStore: Send + Sync {
    /// Inserts a discovered row; returns false when the URL already
    /// exists (dedup).
    async fn insert_discovered(&self, item: &NewQueueItem) -> LecternResult<bool>;

    /// Finds a queue row by canonical URL.
    async fn find_by_url(&self, canonical_url: &str) -> LecternResult<Option<QueueItem>>;

    /// Lists rows, optionally filtered, newest first.
    async fn list(
        &self,
        content_type: Option<QueueContentType>,
        status: Option<QueueStatus>,
        limit: i64,
    ) -> LecternResult<Vec<QueueItem>>;

    /// Moves a row to a new status.
    async fn update_status(&self, id: i64, status: QueueStatus) -> LecternResult<()>;
}

/// Per-user content source subscriptions.
#[async_trait::async_trait]
pub trait SourceStore: Send + Sync {
    async fn create(
        &self,
        user_id: &str,
        title: &str,
        url: &str,
        kind: SourceKind,
    ) -> LecternResult<ContentSource>;

    async fn list_for_user(&self, user_id: &str) -> LecternResult<Vec<ContentSource>>;

    /// Every active source of a kind, across users (discovery sweeps).
    async fn list_active(&self, kind: SourceKind) -> LecternResult<Vec<ContentSource>>;

    async fn update(
        &self,
        id: i64,
        user_id: &str,
        patch: &SourcePatch,
    ) -> LecternResult<Option<ContentSource>>;

    async fn delete(&self, id: i64, user_id: &str) -> LecternResult<bool>;

    async fn touch_last_checked(&self, id: i64) -> LecternResult<()>;
}

/// Shared mapping from canonical source URLs to preferred richer
/// content URLs.
#[async_trait::async_trait]
pub trait ChannelStore: Send + Sync {
    async fn preferred_for(&self, source_url: &str) -> LecternResult<Option<String>>;
}

/// Browser session snapshots.
#[async_trait::async_trait]
pub trait SessionSnapshotStore: Send + Sync {
    /// The newest active snapshot for the `all` platform key.
    async fn newest_active(&self) -> LecternResult<Option<SessionSnapshot>>;
}
