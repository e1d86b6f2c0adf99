//! RSS/Atom feed auto-discovery.
//!
//! Given an arbitrary page URL, finds the feed behind it: the URL
//! itself when it already serves feed content, a `<link
//! rel="alternate">` reference in the HTML head, or one of the common
//! feed paths.

use std::time::Duration;

use chrono::{DateTime, Utc};
use scraper::{Html, Selector};

use crate::error::{LecternError, LecternResult};

/// Path fragments that mark a URL as already being a feed.
const FEED_INDICATORS: [&str; 9] = [
    "/rss", "/feed", "/atom", ".rss", ".xml", "rss.xml", "feed.xml", "atom.xml", "feeds.",
];

/// Common feed locations probed as a last resort.
const COMMON_FEED_PATHS: [&str; 7] = [
    "/feed",
    "/rss",
    "/feed.xml",
    "/rss.xml",
    "/atom.xml",
    "/index.xml",
    "/feeds/posts/default",
];

/// A preview entry from a discovered feed.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PreviewPost {
    pub title: String,
    pub url: String,
    pub published_date: Option<DateTime<Utc>>,
}

/// Result of feed discovery for a URL.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DiscoveredFeed {
    pub url: String,
    pub title: String,
    pub has_rss: bool,
    pub preview_posts: Vec<PreviewPost>,
}

/// Whether a URL looks like a feed from its shape alone.
pub fn looks_like_feed_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    FEED_INDICATORS.iter().any(|marker| lower.contains(marker))
}

/// Whether a response content type declares feed content.
pub fn is_feed_content_type(content_type: &str) -> bool {
    let lower = content_type.to_lowercase();
    ["xml", "rss", "atom"].iter().any(|t| lower.contains(t))
}

/// Extracts `<link rel="alternate">` feed references from HTML.
pub fn feed_links_in_html(html: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"link[rel="alternate"]"#).expect("valid selector");

    document
        .select(&selector)
        .filter(|link| {
            link.value()
                .attr("type")
                .map_or(false, |t| {
                    matches!(
                        t,
                        "application/rss+xml" | "application/atom+xml" | "application/xml"
                    )
                })
        })
        .filter_map(|link| link.value().attr("href"))
        .filter_map(|href| resolve_href(base_url, href))
        .collect()
}

fn resolve_href(base: &str, href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    url::Url::parse(base)
        .ok()?
        .join(href)
        .ok()
        .map(|u| u.to_string())
}

/// Builds preview posts from parsed feed content.
pub fn preview_from_feed(feed: &feed_rs::model::Feed, limit: usize) -> Vec<PreviewPost> {
    feed.entries
        .iter()
        .take(limit)
        .filter_map(|entry| {
            let url = entry.links.first().map(|l| l.href.clone())?;
            Some(PreviewPost {
                title: entry
                    .title
                    .as_ref()
                    .map(|t| t.content.clone())
                    .unwrap_or_else(|| "Untitled".to_string()),
                url,
                published_date: entry.published.or(entry.updated),
            })
        })
        .collect()
}

/// Network-backed feed discovery.
pub struct FeedDiscovery {
    http: reqwest::Client,
}

impl FeedDiscovery {
    pub fn new(user_agent: &str, timeout: Duration) -> LecternResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| LecternError::Internal(format!("http client: {}", e)))?;
        Ok(Self { http })
    }

    /// Runs the three-strategy discovery for a URL.
    pub async fn discover(&self, url: &str) -> LecternResult<DiscoveredFeed> {
        // Strategy 1: the URL itself serves feed content.
        let response = self.http.get(url).send().await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.bytes().await?;

        if looks_like_feed_url(url) || is_feed_content_type(&content_type) {
            if let Ok(feed) = feed_rs::parser::parse(body.as_ref()) {
                return Ok(self.feed_found(url.to_string(), feed));
            }
        }

        // Strategy 2: <link rel=alternate> in the page head.
        let html = String::from_utf8_lossy(&body).to_string();
        for candidate in feed_links_in_html(&html, url) {
            if let Some(feed) = self.try_fetch_feed(&candidate).await {
                log::info!("[RssDiscovery] Found feed via link tag: {}", candidate);
                return Ok(self.feed_found(candidate, feed));
            }
        }

        // Strategy 3: common paths on the site root.
        if let Ok(parsed) = url::Url::parse(url) {
            if let Some(host) = parsed.host_str() {
                let root = format!("{}://{}", parsed.scheme(), host);
                for path in COMMON_FEED_PATHS {
                    let candidate = format!("{}{}", root, path);
                    if let Some(feed) = self.try_fetch_feed(&candidate).await {
                        log::info!("[RssDiscovery] Found feed via common path: {}", candidate);
                        return Ok(self.feed_found(candidate, feed));
                    }
                }
            }
        }

        // Nothing found; report the original URL without feed data.
        Ok(DiscoveredFeed {
            url: url.to_string(),
            title: url.to_string(),
            has_rss: false,
            preview_posts: Vec::new(),
        })
    }

    /// Resolves a source URL to its feed URL, for the pull workers.
    /// Falls back to the original URL so a sweep can still try parsing.
    pub async fn resolve_feed_url(&self, url: &str) -> String {
        if looks_like_feed_url(url) {
            return url.to_string();
        }
        match self.discover(url).await {
            Ok(discovered) if discovered.has_rss => discovered.url,
            _ => url.to_string(),
        }
    }

    async fn try_fetch_feed(&self, url: &str) -> Option<feed_rs::model::Feed> {
        let response = self.http.get(url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body = response.bytes().await.ok()?;
        feed_rs::parser::parse(body.as_ref()).ok()
    }

    fn feed_found(&self, url: String, feed: feed_rs::model::Feed) -> DiscoveredFeed {
        DiscoveredFeed {
            title: feed
                .title
                .as_ref()
                .map(|t| t.content.clone())
                .unwrap_or_else(|| url.clone()),
            preview_posts: preview_from_feed(&feed, 5),
            has_rss: true,
            url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_urls_recognized_by_shape() {
        assert!(looks_like_feed_url("https://example.com/feed"));
        assert!(looks_like_feed_url("https://example.com/rss.xml"));
        assert!(looks_like_feed_url("https://feeds.simplecast.com/abc"));
        assert!(!looks_like_feed_url("https://example.com/blog/post"));
    }

    #[test]
    fn feed_content_types_recognized() {
        assert!(is_feed_content_type("application/rss+xml; charset=utf-8"));
        assert!(is_feed_content_type("text/xml"));
        assert!(!is_feed_content_type("text/html"));
    }

    #[test]
    fn link_tags_extracted_and_resolved() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" href="/feed"/>
            <link rel="alternate" type="text/html" href="/other"/>
            <link rel="alternate" type="application/atom+xml" href="https://example.com/atom.xml"/>
        </head></html>"#;
        let links = feed_links_in_html(html, "https://example.com/page");
        assert_eq!(
            links,
            vec!["https://example.com/feed", "https://example.com/atom.xml"]
        );
    }

    #[test]
    fn preview_built_from_parsed_feed() {
        let xml = r#"<?xml version="1.0"?>
            <rss version="2.0"><channel>
                <title>Example Blog</title>
                <item><title>Post One</title><link>https://example.com/one</link>
                      <pubDate>Mon, 01 Jul 2024 10:00:00 GMT</pubDate></item>
                <item><title>Post Two</title><link>https://example.com/two</link></item>
            </channel></rss>"#;
        let feed = feed_rs::parser::parse(xml.as_bytes()).unwrap();
        let posts = preview_from_feed(&feed, 5);
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].title, "Post One");
        assert_eq!(posts[0].url, "https://example.com/one");
        assert!(posts[0].published_date.is_some());
        assert!(posts[1].published_date.is_none());
    }
}
