//! In-memory storage doubles.
//!
//! Backend-free implementations of the storage seams, used by the test
//! suites and by local dry runs where no database is reachable. The
//! semantics mirror the Postgres implementation: URL uniqueness,
//! idempotent association upserts, no overwrite unless reprocess.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use super::{
    Article, ArticleStore, ArticleSummaryRow, ChannelStore, ContentSource, ExpiredMedia,
    NewArticle, NewQueueItem, QueueContentType, QueueItem, QueueStatus, QueueStore, SaveOutcome,
    SessionSnapshot, SessionSnapshotStore, SourceKind, SourcePatch, SourceStore, UserRef,
};
use crate::error::{LecternError, LecternResult};

/// Everything in one lock-protected struct; contention is irrelevant at
/// test scale.
#[derive(Default)]
pub struct InMemoryStore {
    next_id: AtomicI64,
    pub articles: Mutex<Vec<StoredArticle>>,
    pub associations: Mutex<Vec<(i64, String, Option<String>)>>,
    pub organizations: Mutex<HashMap<String, String>>,
    pub queue: Mutex<Vec<QueueItem>>,
    pub sources: Mutex<Vec<ContentSource>>,
    pub channels: Mutex<HashMap<String, String>>,
    pub session: Mutex<Option<SessionSnapshot>>,
}

/// An article row plus the columns the trait API exposes indirectly.
#[derive(Clone)]
pub struct StoredArticle {
    pub article: Article,
    pub embedding: Option<Vec<f32>>,
    pub private: bool,
    pub organization_id: Option<String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Direct access for assertions.
    pub fn article_count(&self) -> usize {
        self.articles.lock().iter().filter(|a| !a.private).count()
    }

    pub fn association_count(&self) -> usize {
        self.associations.lock().len()
    }

    pub fn embedding_of(&self, article_id: i64) -> Option<Vec<f32>> {
        self.articles
            .lock()
            .iter()
            .find(|a| a.article.id == article_id)
            .and_then(|a| a.embedding.clone())
    }

    /// Seeds a stored article row (test setup).
    pub fn seed_article(&self, mut article: Article, private: bool) -> i64 {
        let id = if article.id == 0 {
            self.allocate_id()
        } else {
            article.id
        };
        article.id = id;
        self.articles.lock().push(StoredArticle {
            article,
            embedding: None,
            private,
            organization_id: None,
        });
        id
    }
}

fn article_from_record(id: i64, record: &NewArticle) -> Article {
    Article {
        id,
        title: record.title.clone(),
        url: record.url.clone(),
        content_source: record.content_source,
        platform: record.platform.clone(),
        video_id: record.video_id.clone(),
        audio_url: record.audio_url.clone(),
        word_count: record.word_count,
        duration_seconds: record.duration_seconds,
        summary_text: record.summary_text.clone(),
        summary_html: record.summary_html.clone(),
        transcript_text: record.transcript_text.clone(),
        key_insights: record.key_insights.clone(),
        quotes: record.quotes.clone(),
        topics: record.topics.clone(),
        video_frames: record.video_frames.clone(),
        has_embedding: false,
        media: record.media.clone(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[async_trait::async_trait]
impl ArticleStore for InMemoryStore {
    async fn find_by_url(&self, canonical_url: &str) -> LecternResult<Option<Article>> {
        Ok(self
            .articles
            .lock()
            .iter()
            .find(|a| !a.private && a.article.url == canonical_url)
            .map(|a| a.article.clone()))
    }

    async fn load(&self, article_id: i64, private: bool) -> LecternResult<Option<Article>> {
        Ok(self
            .articles
            .lock()
            .iter()
            .find(|a| a.private == private && a.article.id == article_id)
            .map(|a| a.article.clone()))
    }

    async fn user_has_article(&self, article_id: i64, user_id: &str) -> LecternResult<bool> {
        Ok(self
            .associations
            .lock()
            .iter()
            .any(|(a, u, _)| *a == article_id && u == user_id))
    }

    async fn associate_user(&self, article_id: i64, user: &UserRef) -> LecternResult<()> {
        let mut associations = self.associations.lock();
        if !associations
            .iter()
            .any(|(a, u, _)| *a == article_id && u == &user.user_id)
        {
            associations.push((
                article_id,
                user.user_id.clone(),
                user.organization_id.clone(),
            ));
        }
        Ok(())
    }

    async fn organization_of(&self, user_id: &str) -> LecternResult<Option<String>> {
        Ok(self.organizations.lock().get(user_id).cloned())
    }

    async fn save_processed(
        &self,
        record: &NewArticle,
        user: Option<&UserRef>,
        embedding: Option<&[f32]>,
        reprocess: bool,
    ) -> LecternResult<SaveOutcome> {
        let (article_id, newly_created) = {
            let mut articles = self.articles.lock();
            match articles
                .iter_mut()
                .find(|a| !a.private && a.article.url == record.url)
            {
                Some(existing) => {
                    if reprocess {
                        let id = existing.article.id;
                        existing.article = article_from_record(id, record);
                    }
                    if let Some(embedding) = embedding {
                        existing.embedding = Some(embedding.to_vec());
                        existing.article.has_embedding = true;
                    }
                    (existing.article.id, false)
                }
                None => {
                    let id = self.allocate_id();
                    let mut article = article_from_record(id, record);
                    article.has_embedding = embedding.is_some();
                    articles.push(StoredArticle {
                        article,
                        embedding: embedding.map(|e| e.to_vec()),
                        private: false,
                        organization_id: None,
                    });
                    (id, true)
                }
            }
        };

        if let Some(user) = user {
            self.associate_user(article_id, user).await?;
        }

        Ok(SaveOutcome {
            article_id,
            newly_created,
        })
    }

    async fn update_insights(
        &self,
        article_id: i64,
        private: bool,
        summary_text: &str,
        summary_html: Option<&str>,
        key_insights: &Value,
        quotes: &Value,
        topics: &Value,
    ) -> LecternResult<()> {
        let mut articles = self.articles.lock();
        let stored = articles
            .iter_mut()
            .find(|a| a.private == private && a.article.id == article_id)
            .ok_or(LecternError::ArticleNotFound(article_id))?;
        stored.article.summary_text = summary_text.to_string();
        stored.article.summary_html = summary_html.map(str::to_string);
        stored.article.key_insights = key_insights.clone();
        stored.article.quotes = quotes.clone();
        stored.article.topics = topics.clone();
        stored.article.updated_at = Utc::now();
        Ok(())
    }

    async fn update_embedding(
        &self,
        article_id: i64,
        private: bool,
        embedding: &[f32],
    ) -> LecternResult<()> {
        let mut articles = self.articles.lock();
        let stored = articles
            .iter_mut()
            .find(|a| a.private == private && a.article.id == article_id)
            .ok_or(LecternError::ArticleNotFound(article_id))?;
        stored.embedding = Some(embedding.to_vec());
        stored.article.has_embedding = true;
        stored.article.updated_at = Utc::now();
        Ok(())
    }

    async fn update_transcript(
        &self,
        article_id: i64,
        private: bool,
        transcript_text: &str,
    ) -> LecternResult<()> {
        let mut articles = self.articles.lock();
        let stored = articles
            .iter_mut()
            .find(|a| a.private == private && a.article.id == article_id)
            .ok_or(LecternError::ArticleNotFound(article_id))?;
        stored.article.transcript_text = Some(transcript_text.to_string());
        stored.article.updated_at = Utc::now();
        Ok(())
    }

    async fn update_frames(
        &self,
        article_id: i64,
        private: bool,
        frames: &Value,
    ) -> LecternResult<()> {
        let mut articles = self.articles.lock();
        let stored = articles
            .iter_mut()
            .find(|a| a.private == private && a.article.id == article_id)
            .ok_or(LecternError::ArticleNotFound(article_id))?;
        stored.article.video_frames = frames.clone();
        stored.article.updated_at = Utc::now();
        Ok(())
    }

    async fn set_media_pointer(
        &self,
        article_id: i64,
        private: bool,
        pointer: &crate::store::MediaPointer,
    ) -> LecternResult<()> {
        let mut articles = self.articles.lock();
        let stored = articles
            .iter_mut()
            .find(|a| a.private == private && a.article.id == article_id)
            .ok_or(LecternError::ArticleNotFound(article_id))?;
        stored.article.media = pointer.clone();
        Ok(())
    }

    async fn list_for_reprocess(
        &self,
        private: bool,
        organization_id: Option<&str>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> LecternResult<(Vec<ArticleSummaryRow>, i64)> {
        if private && organization_id.is_none() {
            return Ok((Vec::new(), 0));
        }
        let articles = self.articles.lock();
        let mut matches: Vec<&StoredArticle> = articles
            .iter()
            .filter(|a| a.private == private)
            .filter(|a| {
                !private || a.organization_id.as_deref() == organization_id
            })
            .filter(|a| {
                search.map_or(true, |s| {
                    a.article.title.to_lowercase().contains(&s.to_lowercase())
                })
            })
            .collect();
        matches.sort_by(|a, b| b.article.updated_at.cmp(&a.article.updated_at));

        let total = matches.len() as i64;
        let rows = matches
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|a| ArticleSummaryRow {
                id: a.article.id,
                title: a.article.title.clone(),
                url: a.article.url.clone(),
                content_source: a.article.content_source.as_str().to_string(),
                created_at: a.article.created_at,
                updated_at: a.article.updated_at,
            })
            .collect();
        Ok((rows, total))
    }

    async fn expired_media(
        &self,
        bucket: &str,
        cutoff: DateTime<Utc>,
    ) -> LecternResult<Vec<ExpiredMedia>> {
        Ok(self
            .articles
            .lock()
            .iter()
            .filter(|a| {
                a.article.media.bucket.as_deref() == Some(bucket)
                    && a.article.media.path.is_some()
                    && a.article.media.uploaded_at.map_or(false, |t| t < cutoff)
            })
            .map(|a| ExpiredMedia {
                article_id: a.article.id,
                is_private: a.private,
                storage_path: a.article.media.path.clone().unwrap_or_default(),
                size_bytes: a.article.media.size_bytes,
            })
            .collect())
    }

    async fn clear_media_pointer(&self, article_id: i64, private: bool) -> LecternResult<()> {
        let mut articles = self.articles.lock();
        if let Some(stored) = articles
            .iter_mut()
            .find(|a| a.private == private && a.article.id == article_id)
        {
            stored.article.media = Default::default();
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl QueueStore for InMemoryStore {
    async fn insert_discovered(&self, item: &NewQueueItem) -> LecternResult<bool> {
        let mut queue = self.queue.lock();
        if queue.iter().any(|q| q.url == item.url) {
            return Ok(false);
        }
        let id = self.allocate_id();
        queue.push(QueueItem {
            id,
            url: item.url.clone(),
            title: item.title.clone(),
            content_type: item.content_type.unwrap_or(QueueContentType::Article),
            channel_title: item.channel_title.clone(),
            channel_url: item.channel_url.clone(),
            video_url: item.video_url.clone(),
            platform: item.platform.clone(),
            source_feed: item.source_feed.clone(),
            found_at: Utc::now(),
            published_date: item.published_date,
            status: QueueStatus::Discovered,
            podcast_uuid: item.podcast_uuid.clone(),
            episode_uuid: item.episode_uuid.clone(),
            duration_seconds: item.duration_seconds,
            played_up_to: item.played_up_to,
            progress_percent: item.progress_percent,
            playing_status: item.playing_status.clone(),
        });
        Ok(true)
    }

    async fn find_by_url(&self, canonical_url: &str) -> LecternResult<Option<QueueItem>> {
        Ok(self
            .queue
            .lock()
            .iter()
            .find(|q| q.url == canonical_url)
            .cloned())
    }

    async fn list(
        &self,
        content_type: Option<QueueContentType>,
        status: Option<QueueStatus>,
        limit: i64,
    ) -> LecternResult<Vec<QueueItem>> {
        let mut items: Vec<QueueItem> = self
            .queue
            .lock()
            .iter()
            .filter(|q| content_type.map_or(true, |ct| q.content_type == ct))
            .filter(|q| status.map_or(true, |st| q.status == st))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.found_at.cmp(&a.found_at));
        items.truncate(limit as usize);
        Ok(items)
    }

    async fn update_status(&self, id: i64, status: QueueStatus) -> LecternResult<()> {
        if let Some(item) = self.queue.lock().iter_mut().find(|q| q.id == id) {
            item.status = status;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SourceStore for InMemoryStore {
    async fn create(
        &self,
        user_id: &str,
        title: &str,
        url: &str,
        kind: SourceKind,
    ) -> LecternResult<ContentSource> {
        let source = ContentSource {
            id: self.allocate_id(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            url: url.to_string(),
            source_type: kind,
            is_active: true,
            last_checked_at: None,
        };
        self.sources.lock().push(source.clone());
        Ok(source)
    }

    async fn list_for_user(&self, user_id: &str) -> LecternResult<Vec<ContentSource>> {
        Ok(self
            .sources
            .lock()
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_active(&self, kind: SourceKind) -> LecternResult<Vec<ContentSource>> {
        Ok(self
            .sources
            .lock()
            .iter()
            .filter(|s| s.is_active && s.source_type == kind)
            .cloned()
            .collect())
    }

    async fn update(
        &self,
        id: i64,
        user_id: &str,
        patch: &SourcePatch,
    ) -> LecternResult<Option<ContentSource>> {
        let mut sources = self.sources.lock();
        let Some(source) = sources
            .iter_mut()
            .find(|s| s.id == id && s.user_id == user_id)
        else {
            return Ok(None);
        };
        if let Some(title) = &patch.title {
            source.title = title.clone();
        }
        if let Some(url) = &patch.url {
            source.url = url.clone();
        }
        if let Some(active) = patch.is_active {
            source.is_active = active;
        }
        Ok(Some(source.clone()))
    }

    async fn delete(&self, id: i64, user_id: &str) -> LecternResult<bool> {
        let mut sources = self.sources.lock();
        let before = sources.len();
        sources.retain(|s| !(s.id == id && s.user_id == user_id));
        Ok(sources.len() != before)
    }

    async fn touch_last_checked(&self, id: i64) -> LecternResult<()> {
        if let Some(source) = self.sources.lock().iter_mut().find(|s| s.id == id) {
            source.last_checked_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChannelStore for InMemoryStore {
    async fn preferred_for(&self, source_url: &str) -> LecternResult<Option<String>> {
        Ok(self.channels.lock().get(source_url).cloned())
    }
}

#[async_trait::async_trait]
impl SessionSnapshotStore for InMemoryStore {
    async fn newest_active(&self) -> LecternResult<Option<SessionSnapshot>> {
        Ok(self.session.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MediaPointer;

    fn record(url: &str) -> NewArticle {
        NewArticle {
            title: "Title".into(),
            url: url.into(),
            content_source: crate::store::ContentSourceKind::Article,
            platform: "generic".into(),
            video_id: None,
            audio_url: None,
            word_count: Some(100),
            duration_seconds: None,
            summary_text: "summary".into(),
            summary_html: None,
            transcript_text: None,
            key_insights: serde_json::json!([]),
            quotes: serde_json::json!([]),
            topics: serde_json::json!(["t"]),
            video_frames: serde_json::json!([]),
            media: MediaPointer::default(),
        }
    }

    #[tokio::test]
    async fn save_is_idempotent_per_url() {
        let store = InMemoryStore::new();
        let user = UserRef {
            user_id: "u1".into(),
            organization_id: None,
        };

        let first = store
            .save_processed(&record("https://example.com/a"), Some(&user), Some(&[0.0; 4]), false)
            .await
            .unwrap();
        assert!(first.newly_created);

        let second = store
            .save_processed(&record("https://example.com/a"), Some(&user), None, false)
            .await
            .unwrap();
        assert!(!second.newly_created);
        assert_eq!(first.article_id, second.article_id);

        assert_eq!(store.article_count(), 1);
        assert_eq!(store.association_count(), 1);
    }

    #[tokio::test]
    async fn second_user_gets_new_association_only() {
        let store = InMemoryStore::new();
        let alice = UserRef {
            user_id: "alice".into(),
            organization_id: None,
        };
        let bob = UserRef {
            user_id: "bob".into(),
            organization_id: None,
        };

        store
            .save_processed(&record("https://example.com/a"), Some(&alice), None, false)
            .await
            .unwrap();
        let outcome = store
            .save_processed(&record("https://example.com/a"), Some(&bob), None, false)
            .await
            .unwrap();

        assert!(!outcome.newly_created);
        assert_eq!(store.article_count(), 1);
        assert_eq!(store.association_count(), 2);
    }

    #[tokio::test]
    async fn no_overwrite_without_reprocess() {
        let store = InMemoryStore::new();
        store
            .save_processed(&record("https://example.com/a"), None, None, false)
            .await
            .unwrap();

        let mut changed = record("https://example.com/a");
        changed.summary_text = "replaced".into();
        let outcome = store
            .save_processed(&changed, None, None, false)
            .await
            .unwrap();

        let article = store.load(outcome.article_id, false).await.unwrap().unwrap();
        assert_eq!(article.summary_text, "summary");
    }

    #[tokio::test]
    async fn reprocess_overwrites_content() {
        let store = InMemoryStore::new();
        store
            .save_processed(&record("https://example.com/a"), None, None, false)
            .await
            .unwrap();

        let mut changed = record("https://example.com/a");
        changed.summary_text = "replaced".into();
        let outcome = store.save_processed(&changed, None, None, true).await.unwrap();

        let article = store.load(outcome.article_id, false).await.unwrap().unwrap();
        assert_eq!(article.summary_text, "replaced");
    }

    #[tokio::test]
    async fn queue_dedupes_by_url() {
        let store = InMemoryStore::new();
        let item = NewQueueItem {
            url: "https://example.com/ep1".into(),
            title: "Ep 1".into(),
            platform: "rss".into(),
            ..Default::default()
        };
        assert!(store.insert_discovered(&item).await.unwrap());
        assert!(!store.insert_discovered(&item).await.unwrap());
        assert_eq!(store.queue.lock().len(), 1);
    }
}
