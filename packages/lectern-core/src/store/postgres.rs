//! Postgres implementations of the storage traits.
//!
//! One [`PostgresStore`] wraps a connection pool and implements every
//! relational seam. Queries are runtime-bound; URL uniqueness conflicts
//! are absorbed with `ON CONFLICT` rather than surfacing as errors, so
//! concurrent ingestions of the same URL race safely.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::{
    Article, ArticleStore, ArticleSummaryRow, ChannelStore, ContentSource, ContentSourceKind,
    ExpiredMedia, MediaPointer, NewArticle, NewQueueItem, QueueContentType, QueueItem, QueueStatus,
    QueueStore, SaveOutcome, SessionSnapshot, SessionSnapshotStore, SourceKind, SourcePatch,
    SourceStore, UserRef,
};
use crate::error::{LecternError, LecternResult};

/// Relational store backed by Postgres.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects a pool against the configured database.
    pub async fn connect(database_url: &str) -> LecternResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn table(private: bool) -> &'static str {
    if private {
        "private_articles"
    } else {
        "articles"
    }
}

fn map_article(row: &sqlx::postgres::PgRow) -> LecternResult<Article> {
    Ok(Article {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        content_source: ContentSourceKind::parse(&row.try_get::<String, _>("content_source")?),
        platform: row.try_get("platform")?,
        video_id: row.try_get("video_id")?,
        audio_url: row.try_get("audio_url")?,
        word_count: row.try_get("word_count")?,
        duration_seconds: row.try_get("duration_seconds")?,
        summary_text: row
            .try_get::<Option<String>, _>("summary_text")?
            .unwrap_or_default(),
        summary_html: row.try_get("summary_html")?,
        transcript_text: row.try_get("transcript_text")?,
        key_insights: row
            .try_get::<Option<Value>, _>("key_insights")?
            .unwrap_or(Value::Array(Vec::new())),
        quotes: row
            .try_get::<Option<Value>, _>("quotes")?
            .unwrap_or(Value::Array(Vec::new())),
        topics: row
            .try_get::<Option<Value>, _>("topics")?
            .unwrap_or(Value::Array(Vec::new())),
        video_frames: row
            .try_get::<Option<Value>, _>("video_frames")?
            .unwrap_or(Value::Array(Vec::new())),
        has_embedding: row.try_get("has_embedding")?,
        media: MediaPointer {
            bucket: row.try_get("media_storage_bucket")?,
            path: row.try_get("media_storage_path")?,
            uploaded_at: row.try_get("media_uploaded_at")?,
            content_type: row.try_get("media_content_type")?,
            size_bytes: row.try_get("media_size_bytes")?,
            duration_seconds: row.try_get("media_duration_seconds")?,
            is_permanent: row
                .try_get::<Option<bool>, _>("media_is_permanent")?
                .unwrap_or(false),
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const ARTICLE_COLUMNS: &str = "id, title, url, content_source, platform, video_id, audio_url, \
     word_count, duration_seconds, summary_text, summary_html, transcript_text, \
     key_insights, quotes, topics, video_frames, (embedding IS NOT NULL) AS has_embedding, \
     media_storage_bucket, media_storage_path, media_uploaded_at, media_content_type, \
     media_size_bytes, media_duration_seconds, media_is_permanent, created_at, updated_at";

async fn upsert_association(
    tx: &mut Transaction<'_, Postgres>,
    article_id: i64,
    user: &UserRef,
) -> LecternResult<()> {
    sqlx::query(
        "INSERT INTO article_users (article_id, user_id, organization_id) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (article_id, user_id) DO NOTHING",
    )
    .bind(article_id)
    .bind(&user.user_id)
    .bind(&user.organization_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait::async_trait]
impl ArticleStore for PostgresStore {
    async fn find_by_url(&self, canonical_url: &str) -> LecternResult<Option<Article>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM articles WHERE url = $1",
            ARTICLE_COLUMNS
        ))
        .bind(canonical_url)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_article).transpose()
    }

    async fn load(&self, article_id: i64, private: bool) -> LecternResult<Option<Article>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM {} WHERE id = $1",
            ARTICLE_COLUMNS,
            table(private)
        ))
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_article).transpose()
    }

    async fn user_has_article(&self, article_id: i64, user_id: &str) -> LecternResult<bool> {
        let row = sqlx::query(
            "SELECT 1 AS present FROM article_users WHERE article_id = $1 AND user_id = $2",
        )
        .bind(article_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn associate_user(&self, article_id: i64, user: &UserRef) -> LecternResult<()> {
        let mut tx = self.pool.begin().await?;
        upsert_association(&mut tx, article_id, user).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn organization_of(&self, user_id: &str) -> LecternResult<Option<String>> {
        let row = sqlx::query("SELECT organization_id FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(row.try_get("organization_id")?),
            None => Ok(None),
        }
    }

    async fn save_processed(
        &self,
        record: &NewArticle,
        user: Option<&UserRef>,
        embedding: Option<&[f32]>,
        reprocess: bool,
    ) -> LecternResult<SaveOutcome> {
        let mut tx = self.pool.begin().await?;

        // Upsert by canonical URL. DO NOTHING keeps the race with a
        // concurrent writer conflict-free; the loser selects the
        // winner's row below.
        let inserted: Option<i64> = sqlx::query(
            "INSERT INTO articles \
             (title, url, content_source, platform, video_id, audio_url, word_count, \
              duration_seconds, summary_text, summary_html, transcript_text, key_insights, \
              quotes, topics, video_frames, media_storage_bucket, media_storage_path, \
              media_uploaded_at, media_content_type, media_size_bytes, media_duration_seconds, \
              media_is_permanent, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                     $17, $18, $19, $20, $21, $22, now(), now()) \
             ON CONFLICT (url) DO NOTHING \
             RETURNING id",
        )
        .bind(&record.title)
        .bind(&record.url)
        .bind(record.content_source.as_str())
        .bind(&record.platform)
        .bind(&record.video_id)
        .bind(&record.audio_url)
        .bind(record.word_count)
        .bind(record.duration_seconds)
        .bind(&record.summary_text)
        .bind(&record.summary_html)
        .bind(&record.transcript_text)
        .bind(&record.key_insights)
        .bind(&record.quotes)
        .bind(&record.topics)
        .bind(&record.video_frames)
        .bind(&record.media.bucket)
        .bind(&record.media.path)
        .bind(record.media.uploaded_at)
        .bind(&record.media.content_type)
        .bind(record.media.size_bytes)
        .bind(record.media.duration_seconds)
        .bind(record.media.is_permanent)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| row.try_get("id"))
        .transpose()?;

        let (article_id, newly_created) = match inserted {
            Some(id) => (id, true),
            None => {
                let row = sqlx::query("SELECT id FROM articles WHERE url = $1")
                    .bind(&record.url)
                    .fetch_one(&mut *tx)
                    .await?;
                let id: i64 = row.try_get("id")?;

                if reprocess {
                    sqlx::query(
                        "UPDATE articles SET \
                         title = $2, content_source = $3, platform = $4, video_id = $5, \
                         audio_url = $6, word_count = $7, duration_seconds = $8, \
                         summary_text = $9, summary_html = $10, transcript_text = $11, \
                         key_insights = $12, quotes = $13, topics = $14, video_frames = $15, \
                         media_storage_bucket = $16, media_storage_path = $17, \
                         media_uploaded_at = $18, media_content_type = $19, \
                         media_size_bytes = $20, media_duration_seconds = $21, \
                         media_is_permanent = $22, updated_at = now() \
                         WHERE id = $1",
                    )
                    .bind(id)
                    .bind(&record.title)
                    .bind(record.content_source.as_str())
                    .bind(&record.platform)
                    .bind(&record.video_id)
                    .bind(&record.audio_url)
                    .bind(record.word_count)
                    .bind(record.duration_seconds)
                    .bind(&record.summary_text)
                    .bind(&record.summary_html)
                    .bind(&record.transcript_text)
                    .bind(&record.key_insights)
                    .bind(&record.quotes)
                    .bind(&record.topics)
                    .bind(&record.video_frames)
                    .bind(&record.media.bucket)
                    .bind(&record.media.path)
                    .bind(record.media.uploaded_at)
                    .bind(&record.media.content_type)
                    .bind(record.media.size_bytes)
                    .bind(record.media.duration_seconds)
                    .bind(record.media.is_permanent)
                    .execute(&mut *tx)
                    .await?;
                }
                (id, false)
            }
        };

        if let Some(user) = user {
            upsert_association(&mut tx, article_id, user).await?;
        }

        // Embedding written last so a partial failure aborts the whole
        // transaction rather than leaving a half-written record.
        if let Some(embedding) = embedding {
            sqlx::query("UPDATE articles SET embedding = $2 WHERE id = $1")
                .bind(article_id)
                .bind(embedding.to_vec())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
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
        let result = sqlx::query(&format!(
            "UPDATE {} SET summary_text = $2, summary_html = $3, key_insights = $4, \
             quotes = $5, topics = $6, updated_at = now() WHERE id = $1",
            table(private)
        ))
        .bind(article_id)
        .bind(summary_text)
        .bind(summary_html)
        .bind(key_insights)
        .bind(quotes)
        .bind(topics)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LecternError::ArticleNotFound(article_id));
        }
        Ok(())
    }

    async fn update_embedding(
        &self,
        article_id: i64,
        private: bool,
        embedding: &[f32],
    ) -> LecternResult<()> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET embedding = $2, updated_at = now() WHERE id = $1",
            table(private)
        ))
        .bind(article_id)
        .bind(embedding.to_vec())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LecternError::ArticleNotFound(article_id));
        }
        Ok(())
    }

    async fn update_transcript(
        &self,
        article_id: i64,
        private: bool,
        transcript_text: &str,
    ) -> LecternResult<()> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET transcript_text = $2, updated_at = now() WHERE id = $1",
            table(private)
        ))
        .bind(article_id)
        .bind(transcript_text)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LecternError::ArticleNotFound(article_id));
        }
        Ok(())
    }

    async fn update_frames(
        &self,
        article_id: i64,
        private: bool,
        frames: &Value,
    ) -> LecternResult<()> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET video_frames = $2, updated_at = now() WHERE id = $1",
            table(private)
        ))
        .bind(article_id)
        .bind(frames)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LecternError::ArticleNotFound(article_id));
        }
        Ok(())
    }

    async fn set_media_pointer(
        &self,
        article_id: i64,
        private: bool,
        pointer: &MediaPointer,
    ) -> LecternResult<()> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET media_storage_bucket = $2, media_storage_path = $3, \
             media_uploaded_at = $4, media_content_type = $5, media_size_bytes = $6, \
             media_duration_seconds = $7, media_is_permanent = $8 WHERE id = $1",
            table(private)
        ))
        .bind(article_id)
        .bind(&pointer.bucket)
        .bind(&pointer.path)
        .bind(pointer.uploaded_at)
        .bind(&pointer.content_type)
        .bind(pointer.size_bytes)
        .bind(pointer.duration_seconds)
        .bind(pointer.is_permanent)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LecternError::ArticleNotFound(article_id));
        }
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
        let table = table(private);
        let mut conditions = Vec::new();
        if private {
            // Private articles are narrowed to the caller's organization;
            // without one, the listing is empty.
            if organization_id.is_none() {
                return Ok((Vec::new(), 0));
            }
            conditions.push("organization_id = $3");
        }
        if search.is_some() {
            conditions.push(if private {
                "title ILIKE $4"
            } else {
                "title ILIKE $3"
            });
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let list_sql = format!(
            "SELECT id, title, url, content_source, created_at, updated_at FROM {} {} \
             ORDER BY updated_at DESC LIMIT $1 OFFSET $2",
            table, where_clause
        );
        let count_sql = format!(
            "SELECT COUNT(*) AS total FROM {} {}",
            table,
            where_clause.replace("$3", "$1").replace("$4", "$2")
        );

        let pattern = search.map(|s| format!("%{}%", s));

        let mut list_query = sqlx::query(&list_sql).bind(limit).bind(offset);
        let mut count_query = sqlx::query(&count_sql);
        if private {
            list_query = list_query.bind(organization_id);
            count_query = count_query.bind(organization_id);
        }
        if let Some(ref pattern) = pattern {
            list_query = list_query.bind(pattern);
            count_query = count_query.bind(pattern);
        }

        let rows = list_query.fetch_all(&self.pool).await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(ArticleSummaryRow {
                id: row.try_get("id")?,
                title: row
                    .try_get::<Option<String>, _>("title")?
                    .unwrap_or_else(|| "Untitled".to_string()),
                url: row.try_get::<Option<String>, _>("url")?.unwrap_or_default(),
                content_source: row
                    .try_get::<Option<String>, _>("content_source")?
                    .unwrap_or_else(|| "unknown".to_string()),
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            });
        }

        let total: i64 = count_query.fetch_one(&self.pool).await?.try_get("total")?;
        Ok((items, total))
    }

    async fn expired_media(
        &self,
        bucket: &str,
        cutoff: DateTime<Utc>,
    ) -> LecternResult<Vec<ExpiredMedia>> {
        let mut expired = Vec::new();
        for private in [false, true] {
            let rows = sqlx::query(&format!(
                "SELECT id, media_storage_path, media_size_bytes FROM {} \
                 WHERE media_storage_bucket = $1 \
                   AND media_uploaded_at < $2 \
                   AND media_storage_path IS NOT NULL",
                table(private)
            ))
            .bind(bucket)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

            for row in &rows {
                expired.push(ExpiredMedia {
                    article_id: row.try_get("id")?,
                    is_private: private,
                    storage_path: row.try_get("media_storage_path")?,
                    size_bytes: row.try_get("media_size_bytes")?,
                });
            }
        }
        Ok(expired)
    }

    async fn clear_media_pointer(&self, article_id: i64, private: bool) -> LecternResult<()> {
        sqlx::query(&format!(
            "UPDATE {} SET media_storage_bucket = NULL, media_storage_path = NULL, \
             media_uploaded_at = NULL, media_content_type = NULL, media_size_bytes = NULL, \
             media_duration_seconds = NULL WHERE id = $1",
            table(private)
        ))
        .bind(article_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl QueueStore for PostgresStore {
    async fn insert_discovered(&self, item: &NewQueueItem) -> LecternResult<bool> {
        let inserted = sqlx::query(
            "INSERT INTO content_queue \
             (url, title, content_type, channel_title, channel_url, video_url, platform, \
              source_feed, found_at, published_date, status, podcast_uuid, episode_uuid, \
              duration_seconds, played_up_to, progress_percent, playing_status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now(), $9, 'discovered', $10, $11, \
                     $12, $13, $14, $15) \
             ON CONFLICT (url) DO NOTHING \
             RETURNING id",
        )
        .bind(&item.url)
        .bind(&item.title)
        .bind(
            item.content_type
                .unwrap_or(QueueContentType::Article)
                .as_str(),
        )
        .bind(&item.channel_title)
        .bind(&item.channel_url)
        .bind(&item.video_url)
        .bind(&item.platform)
        .bind(&item.source_feed)
        .bind(item.published_date)
        .bind(&item.podcast_uuid)
        .bind(&item.episode_uuid)
        .bind(item.duration_seconds)
        .bind(item.played_up_to)
        .bind(item.progress_percent)
        .bind(&item.playing_status)
        .fetch_optional(&self.pool)
        .await?;
        Ok(inserted.is_some())
    }

    async fn find_by_url(&self, canonical_url: &str) -> LecternResult<Option<QueueItem>> {
        let row = sqlx::query("SELECT * FROM content_queue WHERE url = $1")
            .bind(canonical_url)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_queue_item).transpose()
    }

    async fn list(
        &self,
        content_type: Option<QueueContentType>,
        status: Option<QueueStatus>,
        limit: i64,
    ) -> LecternResult<Vec<QueueItem>> {
        let mut sql = String::from("SELECT * FROM content_queue WHERE 1=1");
        if content_type.is_some() {
            sql.push_str(" AND content_type = $2");
        }
        if status.is_some() {
            sql.push_str(if content_type.is_some() {
                " AND status = $3"
            } else {
                " AND status = $2"
            });
        }
        sql.push_str(" ORDER BY found_at DESC LIMIT $1");

        let mut query = sqlx::query(&sql).bind(limit);
        if let Some(ct) = content_type {
            query = query.bind(ct.as_str());
        }
        if let Some(st) = status {
            query = query.bind(st.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(map_queue_item).collect()
    }

    async fn update_status(&self, id: i64, status: QueueStatus) -> LecternResult<()> {
        sqlx::query("UPDATE content_queue SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn map_queue_item(row: &sqlx::postgres::PgRow) -> LecternResult<QueueItem> {
    Ok(QueueItem {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        content_type: QueueContentType::parse(&row.try_get::<String, _>("content_type")?),
        channel_title: row.try_get("channel_title")?,
        channel_url: row.try_get("channel_url")?,
        video_url: row.try_get("video_url")?,
        platform: row.try_get("platform")?,
        source_feed: row.try_get("source_feed")?,
        found_at: row.try_get("found_at")?,
        published_date: row.try_get("published_date")?,
        status: QueueStatus::parse(&row.try_get::<String, _>("status")?),
        podcast_uuid: row.try_get("podcast_uuid")?,
        episode_uuid: row.try_get("episode_uuid")?,
        duration_seconds: row.try_get("duration_seconds")?,
        played_up_to: row.try_get("played_up_to")?,
        progress_percent: row.try_get("progress_percent")?,
        playing_status: row.try_get("playing_status")?,
    })
}

#[async_trait::async_trait]
impl SourceStore for PostgresStore {
    async fn create(
        &self,
        user_id: &str,
        title: &str,
        url: &str,
        kind: SourceKind,
    ) -> LecternResult<ContentSource> {
        let row = sqlx::query(
            "INSERT INTO content_sources (user_id, title, url, source_type, is_active) \
             VALUES ($1, $2, $3, $4, true) \
             RETURNING id, user_id, title, url, source_type, is_active, last_checked_at",
        )
        .bind(user_id)
        .bind(title)
        .bind(url)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;
        map_source(&row)
    }

    async fn list_for_user(&self, user_id: &str) -> LecternResult<Vec<ContentSource>> {
        let rows = sqlx::query(
            "SELECT id, user_id, title, url, source_type, is_active, last_checked_at \
             FROM content_sources WHERE user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_source).collect()
    }

    async fn list_active(&self, kind: SourceKind) -> LecternResult<Vec<ContentSource>> {
        let rows = sqlx::query(
            "SELECT id, user_id, title, url, source_type, is_active, last_checked_at \
             FROM content_sources WHERE source_type = $1 AND is_active ORDER BY id",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_source).collect()
    }

    async fn update(
        &self,
        id: i64,
        user_id: &str,
        patch: &SourcePatch,
    ) -> LecternResult<Option<ContentSource>> {
        let row = sqlx::query(
            "UPDATE content_sources SET \
             title = COALESCE($3, title), \
             url = COALESCE($4, url), \
             is_active = COALESCE($5, is_active) \
             WHERE id = $1 AND user_id = $2 \
             RETURNING id, user_id, title, url, source_type, is_active, last_checked_at",
        )
        .bind(id)
        .bind(user_id)
        .bind(&patch.title)
        .bind(&patch.url)
        .bind(patch.is_active)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_source).transpose()
    }

    async fn delete(&self, id: i64, user_id: &str) -> LecternResult<bool> {
        let result = sqlx::query("DELETE FROM content_sources WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_last_checked(&self, id: i64) -> LecternResult<()> {
        sqlx::query("UPDATE content_sources SET last_checked_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn map_source(row: &sqlx::postgres::PgRow) -> LecternResult<ContentSource> {
    Ok(ContentSource {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        source_type: SourceKind::parse(&row.try_get::<String, _>("source_type")?),
        is_active: row.try_get("is_active")?,
        last_checked_at: row.try_get("last_checked_at")?,
    })
}

#[async_trait::async_trait]
impl ChannelStore for PostgresStore {
    async fn preferred_for(&self, source_url: &str) -> LecternResult<Option<String>> {
        let row = sqlx::query("SELECT preferred_url FROM known_channels WHERE source_url = $1")
            .bind(source_url)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(row.try_get("preferred_url")?),
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl SessionSnapshotStore for PostgresStore {
    async fn newest_active(&self) -> LecternResult<Option<SessionSnapshot>> {
        let row = sqlx::query(
            "SELECT platform, storage_state_json, updated_at, expires_at \
             FROM browser_sessions \
             WHERE platform = 'all' AND is_active \
             ORDER BY updated_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(SessionSnapshot {
                platform: row.try_get("platform")?,
                storage_state: row.try_get("storage_state_json")?,
                updated_at: row.try_get("updated_at")?,
                expires_at: row.try_get("expires_at")?,
            })),
            None => Ok(None),
        }
    }
}
