//! Core runtime configuration.
//!
//! Loaded once at bootstrap from environment variables; shared read-only
//! across services. The server binary layers its YAML file and CLI
//! overrides on top before calling [`Config::from_env`]-derived values.

use std::collections::HashSet;
use std::time::Duration;

/// Bucket receiving media downloaded by the pipeline. Objects here are
/// subject to retention cleanup.
pub const EXPIRING_MEDIA_BUCKET: &str = "article-media";

/// Bucket receiving direct user uploads. Never cleaned up.
pub const PERMANENT_MEDIA_BUCKET: &str = "uploaded-media";

/// Bucket receiving sampled video frames.
pub const FRAMES_BUCKET: &str = "video-frames";

/// Transcript text included in an analysis prompt is cut at this many
/// characters, with a trailing `...`.
pub const MAX_TRANSCRIPT_CHARS: usize = 150_000;

/// Character budget for the text fed to the embedding model.
pub const MAX_EMBEDDING_CHARS: usize = 8_000;

/// Dimensionality of stored embedding vectors.
pub const EMBEDDING_DIMENSIONS: u32 = 384;

/// How many feed entries a discovery sweep examines per source.
pub const RSS_FEED_ENTRY_LIMIT: usize = 10;

/// Runtime configuration shared across services.
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the LLM oracle.
    pub llm_api_key: String,
    /// API key for the speech-to-text oracle.
    pub stt_api_key: String,
    /// Postgres connection string.
    pub database_url: String,
    /// Base URL of the object store (Supabase-style storage API).
    pub storage_url: String,
    /// Service-role key for the object store and auth service.
    pub service_role_key: String,
    /// Base URL of the token-verification service.
    pub auth_url: String,
    /// Base URL of the headless-browser rendering service.
    pub browser_service_url: String,
    /// Base URL of the podcast listening-history service.
    pub listening_history_url: String,
    /// Credentials for the listening-history service.
    pub listening_history_email: String,
    pub listening_history_password: String,
    /// HTML search endpoint used by the richer-source heuristic.
    pub search_url: String,
    /// Allowed CORS origins (empty = allow any).
    pub cors_origins: Vec<String>,
    /// Days downloaded media stays in the expiring bucket.
    pub media_retention_days: i64,
    /// Hosts that always go straight to the browser fetcher.
    pub browser_fetch_domains: HashSet<String>,
    /// User agent for plain HTTP fetches.
    pub user_agent: String,
    /// Days a feed entry stays eligible for discovery.
    pub rss_post_recency_days: i64,
    /// Environment label reported by /health.
    pub environment: String,

    /// Plain HTTP fetch timeout.
    pub http_timeout: Duration,
    /// Headless browser fetch timeout.
    pub browser_timeout: Duration,
    /// LLM request timeout.
    pub llm_timeout: Duration,
    /// Discovery sweep interval.
    pub discovery_interval: Duration,
    /// Cleanup sweep interval.
    pub cleanup_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            stt_api_key: String::new(),
            database_url: String::new(),
            storage_url: String::new(),
            service_role_key: String::new(),
            auth_url: String::new(),
            browser_service_url: String::new(),
            listening_history_url: "https://api.pocketcasts.com".to_string(),
            listening_history_email: String::new(),
            listening_history_password: String::new(),
            search_url: "https://html.duckduckgo.com/html/".to_string(),
            cors_origins: Vec::new(),
            media_retention_days: 30,
            browser_fetch_domains: HashSet::new(),
            user_agent: default_user_agent().to_string(),
            rss_post_recency_days: 3,
            environment: "development".to_string(),
            http_timeout: Duration::from_secs(30),
            browser_timeout: Duration::from_secs(30),
            llm_timeout: Duration::from_secs(300),
            discovery_interval: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

fn default_user_agent() -> &'static str {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36"
}

impl Config {
    /// Builds a config from the process environment.
    ///
    /// Only the values present in the environment override defaults, so
    /// the server binary can pre-populate the environment from its YAML
    /// config before calling this.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("LLM_API_KEY") {
            config.llm_api_key = v;
        }
        if let Ok(v) = std::env::var("STT_API_KEY") {
            config.stt_api_key = v;
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            config.database_url = v;
        }
        if let Ok(v) = std::env::var("STORAGE_URL") {
            config.storage_url = v;
        }
        if let Ok(v) = std::env::var("SERVICE_ROLE_KEY") {
            config.service_role_key = v;
        }
        if let Ok(v) = std::env::var("AUTH_URL") {
            config.auth_url = v;
        }
        if let Ok(v) = std::env::var("BROWSER_SERVICE_URL") {
            config.browser_service_url = v;
        }
        if let Ok(v) = std::env::var("LISTENING_HISTORY_URL") {
            config.listening_history_url = v;
        }
        if let Ok(v) = std::env::var("LISTENING_HISTORY_EMAIL") {
            config.listening_history_email = v;
        }
        if let Ok(v) = std::env::var("LISTENING_HISTORY_PASSWORD") {
            config.listening_history_password = v;
        }
        if let Ok(v) = std::env::var("SEARCH_URL") {
            config.search_url = v;
        }
        if let Ok(v) = std::env::var("CORS_ORIGINS") {
            config.cors_origins = split_csv(&v);
        }
        if let Ok(v) = std::env::var("MEDIA_RETENTION_DAYS") {
            if let Ok(days) = v.parse() {
                config.media_retention_days = days;
            }
        }
        if let Ok(v) = std::env::var("BROWSER_FETCH_DOMAINS") {
            config.browser_fetch_domains = split_csv(&v).into_iter().collect();
        }
        if let Ok(v) = std::env::var("USER_AGENT") {
            config.user_agent = v;
        }
        if let Ok(v) = std::env::var("RSS_POST_RECENCY_DAYS") {
            if let Ok(days) = v.parse() {
                config.rss_post_recency_days = days;
            }
        }
        if let Ok(v) = std::env::var("LECTERN_ENVIRONMENT") {
            config.environment = v;
        }

        config
    }

    /// Whether a host is on the always-browser list.
    pub fn forces_browser(&self, host: &str) -> bool {
        self.browser_fetch_domains.contains(host)
            || self
                .browser_fetch_domains
                .iter()
                .any(|d| host.ends_with(&format!(".{}", d)))
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.media_retention_days, 30);
        assert_eq!(config.rss_post_recency_days, 3);
        assert_eq!(config.llm_timeout, Duration::from_secs(300));
        assert_eq!(config.http_timeout, Duration::from_secs(30));
    }

    #[test]
    fn forces_browser_matches_exact_and_subdomain() {
        let mut config = Config::default();
        config.browser_fetch_domains.insert("stratechery.com".to_string());

        assert!(config.forces_browser("stratechery.com"));
        assert!(config.forces_browser("passport.stratechery.com"));
        assert!(!config.forces_browser("example.com"));
    }

    #[test]
    fn split_csv_trims_and_drops_empties() {
        assert_eq!(
            split_csv("a.com, b.com ,,c.com"),
            vec!["a.com", "b.com", "c.com"]
        );
    }
}
