//! The listening-history puller.
//!
//! Sweeps every active podcast source: authenticate with the external
//! listening-history service, download recent history, keep episodes
//! the user actually started (`played_up_to > 0`), and enqueue them
//! with progress metadata. For each episode a web-search heuristic
//! opportunistically finds a richer source (usually the YouTube upload
//! of the same conversation) and records it in `video_url`.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::error::{LecternError, LecternResult};
use crate::store::{NewQueueItem, QueueContentType, QueueStore, SourceKind, SourceStore};
use crate::util::canonical_url;

use super::feeds::SweepReport;

/// One episode as reported by the listening-history service.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEpisode {
    pub uuid: String,
    #[serde(default)]
    pub podcast_uuid: Option<String>,
    pub title: String,
    #[serde(default)]
    pub podcast_title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub played_up_to: i64,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub playing_status: Option<i64>,
}

#[derive(Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    episodes: Vec<HistoryEpisode>,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

/// Keeps only episodes with progress, mapping them to queue rows.
///
/// Pure so the filtering is testable without the service. The episode
/// page URL (or a synthesized share URL) is the dedup key.
pub fn queue_items_from_history(episodes: &[HistoryEpisode]) -> Vec<NewQueueItem> {
    episodes
        .iter()
        .filter(|ep| ep.played_up_to > 0)
        .map(|ep| {
            let url = ep
                .url
                .clone()
                .unwrap_or_else(|| format!("https://pca.st/episode/{}", ep.uuid));
            let progress_percent = ep.duration.filter(|&d| d > 0).map(|d| {
                (ep.played_up_to as f64 / d as f64 * 100.0).min(100.0)
            });

            NewQueueItem {
                url: canonical_url(&url),
                title: ep.title.clone(),
                content_type: Some(QueueContentType::PodcastEpisode),
                channel_title: ep.podcast_title.clone(),
                platform: "pocketcasts".to_string(),
                podcast_uuid: ep.podcast_uuid.clone(),
                episode_uuid: Some(ep.uuid.clone()),
                duration_seconds: ep.duration,
                played_up_to: Some(ep.played_up_to),
                progress_percent,
                playing_status: ep.playing_status.map(|s| s.to_string()),
                ..Default::default()
            }
        })
        .collect()
}

fn youtube_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"https://(?:www\.)?youtube\.com/watch\?v=[A-Za-z0-9_-]{6,}"#)
            .expect("valid regex")
    })
}

fn podcast_host_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"https://[^"'\s<>]*(?:podcasts\.apple\.com|spotify\.com/episode|pca\.st|overcast\.fm|castbox\.fm|\.libsyn\.com|\.simplecast\.com|\.transistor\.fm)[^"'\s<>]*"#,
        )
        .expect("valid regex")
    })
}

/// Extracts the first YouTube watch link from a search-results page.
pub fn first_youtube_link(html: &str) -> Option<String> {
    youtube_link_re()
        .find(html)
        .map(|m| m.as_str().to_string())
}

/// Extracts the first podcast-host episode link from a search-results
/// page.
pub fn first_podcast_host_link(html: &str) -> Option<String> {
    podcast_host_link_re()
        .find(html)
        .map(|m| m.as_str().to_string())
}

/// Picks the richer source out of a search-results page: a YouTube
/// upload first, a hosted episode page otherwise.
pub fn first_richer_link(html: &str) -> Option<String> {
    first_youtube_link(html).or_else(|| first_podcast_host_link(html))
}

/// Sweeps podcast listening history into the content queue.
pub struct ListeningHistoryPuller {
    http: reqwest::Client,
    sources: Arc<dyn SourceStore>,
    queue: Arc<dyn QueueStore>,
    base_url: String,
    email: String,
    password: String,
    search_url: String,
}

impl ListeningHistoryPuller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sources: Arc<dyn SourceStore>,
        queue: Arc<dyn QueueStore>,
        base_url: &str,
        email: &str,
        password: &str,
        search_url: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> LecternResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| LecternError::Internal(format!("http client: {}", e)))?;
        Ok(Self {
            http,
            sources,
            queue,
            base_url: base_url.trim_end_matches('/').to_string(),
            email: email.to_string(),
            password: password.to_string(),
            search_url: search_url.to_string(),
        })
    }

    /// Runs one sweep over the shared listening history.
    ///
    /// The history is account-wide, so one download serves every active
    /// podcast source; the sources only gate whether the sweep runs.
    pub async fn run_sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let sources = match self.sources.list_active(SourceKind::Podcast).await {
            Ok(sources) => sources,
            Err(e) => {
                log::error!("[ListeningHistory] Could not list sources: {}", e);
                return report;
            }
        };
        if sources.is_empty() {
            return report;
        }
        report.sources_checked = sources.len();

        let episodes = match self.fetch_history().await {
            Ok(episodes) => episodes,
            Err(e) => {
                log::warn!("[ListeningHistory] History download failed: {}", e);
                report.sources_failed = sources.len();
                return report;
            }
        };
        log::info!(
            "[ListeningHistory] {} episodes with progress",
            episodes.iter().filter(|e| e.played_up_to > 0).count()
        );

        for mut item in queue_items_from_history(&episodes) {
            // Only pay for the search on rows we are about to insert.
            match self.queue.find_by_url(&item.url).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    log::warn!("[ListeningHistory] Queue lookup failed: {}", e);
                    continue;
                }
            }

            item.video_url = self
                .search_richer_source(item.channel_title.as_deref(), &item.title)
                .await;

            match self.queue.insert_discovered(&item).await {
                Ok(true) => report.items_inserted += 1,
                Ok(false) => {}
                Err(e) => log::warn!("[ListeningHistory] Insert failed for {}: {}", item.url, e),
            }
        }

        for source in &sources {
            if let Err(e) = self.sources.touch_last_checked(source.id).await {
                log::warn!("[ListeningHistory] Could not touch {}: {}", source.id, e);
            }
        }

        log::info!(
            "[ListeningHistory] Sweep complete: {} inserted",
            report.items_inserted
        );
        report
    }

    async fn fetch_history(&self) -> LecternResult<Vec<HistoryEpisode>> {
        let login: LoginResponse = self
            .http
            .post(format!("{}/user/login", self.base_url))
            .json(&serde_json::json!({
                "email": self.email,
                "password": self.password,
                "scope": "webplayer",
            }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| LecternError::AuthRequired(format!("listening history login: {}", e)))?
            .json()
            .await
            .map_err(|e| LecternError::Network(format!("login response: {}", e)))?;

        let history: HistoryResponse = self
            .http
            .post(format!("{}/user/history", self.base_url))
            .bearer_auth(&login.token)
            .json(&serde_json::json!({}))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| LecternError::Network(format!("history download: {}", e)))?
            .json()
            .await
            .map_err(|e| LecternError::Network(format!("history response: {}", e)))?;

        Ok(history.episodes)
    }

    /// Best-effort web search for a richer episode source: the YouTube
    /// upload of the conversation, or a hosted episode page when no
    /// video exists. Failures degrade to no richer source; never to a
    /// sweep error.
    async fn search_richer_source(
        &self,
        podcast_title: Option<&str>,
        episode_title: &str,
    ) -> Option<String> {
        let query = match podcast_title {
            Some(podcast) => format!("{} {}", podcast, episode_title),
            None => episode_title.to_string(),
        };

        let response = self
            .http
            .get(&self.search_url)
            .query(&[("q", query.as_str())])
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let html = response.text().await.ok()?;
        let link = first_richer_link(&html);
        if let Some(ref link) = link {
            log::info!(
                "[ListeningHistory] Richer source for '{}': {}",
                episode_title,
                link
            );
        }
        link
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(uuid: &str, played: i64, duration: Option<i64>) -> HistoryEpisode {
        HistoryEpisode {
            uuid: uuid.to_string(),
            podcast_uuid: Some("pod-1".to_string()),
            title: format!("Episode {}", uuid),
            podcast_title: Some("Great Pod".to_string()),
            url: Some(format!("https://pca.st/episode/{}?t=30", uuid)),
            played_up_to: played,
            duration,
            playing_status: Some(2),
        }
    }

    #[test]
    fn unplayed_episodes_filtered_out() {
        let items = queue_items_from_history(&[
            episode("a", 0, Some(3600)),
            episode("b", 120, Some(3600)),
        ]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].episode_uuid.as_deref(), Some("b"));
    }

    #[test]
    fn progress_metadata_carried_through() {
        let items = queue_items_from_history(&[episode("a", 900, Some(3600))]);
        let item = &items[0];
        assert_eq!(item.played_up_to, Some(900));
        assert_eq!(item.duration_seconds, Some(3600));
        assert_eq!(item.progress_percent, Some(25.0));
        assert_eq!(item.content_type, Some(QueueContentType::PodcastEpisode));
        // URL canonicalized for dedup.
        assert_eq!(item.url, "https://pca.st/episode/a");
    }

    #[test]
    fn missing_duration_gives_no_percent() {
        let items = queue_items_from_history(&[episode("a", 900, None)]);
        assert_eq!(items[0].progress_percent, None);
    }

    #[test]
    fn missing_url_synthesizes_share_link() {
        let mut ep = episode("abc", 10, Some(60));
        ep.url = None;
        let items = queue_items_from_history(&[ep]);
        assert_eq!(items[0].url, "https://pca.st/episode/abc");
    }

    #[test]
    fn youtube_link_extracted_from_search_page() {
        let html = r#"<a href="https://duckduckgo.com/x">other</a>
            <a href="https://www.youtube.com/watch?v=dQw4w9WgXcQ">The Episode</a>"#;
        assert_eq!(
            first_youtube_link(html).as_deref(),
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
        );
        assert!(first_youtube_link("<p>no links</p>").is_none());
    }

    #[test]
    fn podcast_host_link_extracted_when_no_video_exists() {
        let html = r#"<a href="https://example.com/about">other</a>
            <a href="https://podcasts.apple.com/us/podcast/great-pod/id123?i=456">Listen</a>"#;
        assert_eq!(
            first_richer_link(html).as_deref(),
            Some("https://podcasts.apple.com/us/podcast/great-pod/id123?i=456")
        );
    }

    #[test]
    fn youtube_link_preferred_over_podcast_host() {
        let html = r#"<a href="https://open.spotify.com/episode/abc123">Spotify</a>
            <a href="https://www.youtube.com/watch?v=dQw4w9WgXcQ">YouTube</a>"#;
        assert_eq!(
            first_richer_link(html).as_deref(),
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
        );
    }

    #[test]
    fn podcast_host_patterns_cover_known_hosts() {
        for url in [
            "https://open.spotify.com/episode/abc123",
            "https://pca.st/episode/xyz",
            "https://overcast.fm/+Abc123",
            "https://castbox.fm/episode/id1234",
            "https://greatpod.libsyn.com/episode-42",
            "https://feeds.simplecast.com/abc/episode",
            "https://share.transistor.fm/s/abc123",
        ] {
            let html = format!(r#"<a href="{}">link</a>"#, url);
            assert_eq!(first_podcast_host_link(&html).as_deref(), Some(url), "{}", url);
        }
        assert!(first_podcast_host_link("<p>no links</p>").is_none());
    }
}
