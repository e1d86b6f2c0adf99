//! URL and content classification.
//!
//! Decides what a submitted URL points at: a direct media file, a known
//! video/audio platform embed, a paywalled publisher page, or a plain
//! HTML article. Classification never fails; the worst case is
//! `ArticleHtml` with a `generic` platform tag.

use std::sync::OnceLock;

use regex::Regex;
use scraper::{Html, Selector};

use crate::util::host_of;

/// What a URL resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    ArticleHtml,
    DirectVideo,
    DirectAudio,
    Document,
    YoutubeWatch,
    VimeoEmbed,
    LoomEmbed,
    WistiaEmbed,
    DailymotionEmbed,
    HostedPodcast,
    PaywalledPublisher,
}

impl ContentKind {
    /// Whether this kind carries playable media.
    pub fn is_media(self) -> bool {
        !matches!(self, Self::ArticleHtml | Self::PaywalledPublisher | Self::Document)
    }

    /// Whether the URL itself is already the media asset.
    pub fn is_direct(self) -> bool {
        matches!(self, Self::DirectVideo | Self::DirectAudio | Self::Document)
    }

    /// Whether this kind is a platform embed needing resolution.
    pub fn is_platform_embed(self) -> bool {
        matches!(
            self,
            Self::YoutubeWatch
                | Self::VimeoEmbed
                | Self::LoomEmbed
                | Self::WistiaEmbed
                | Self::DailymotionEmbed
                | Self::HostedPodcast
        )
    }
}

/// Result of classifying a URL (optionally with its response body).
#[derive(Debug, Clone, serde::Serialize)]
pub struct Classification {
    pub kind: ContentKind,
    /// Platform tag recorded on the content row (youtube, vimeo,
    /// substack, generic, ...).
    pub platform: String,
    /// Platform-specific media id, for embed kinds.
    pub media_id: Option<String>,
    /// The asset URL, for direct-media kinds.
    pub direct_media_url: Option<String>,
}

const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "mov", "webm", "mkv", "avi", "m4v"];
const AUDIO_EXTENSIONS: [&str; 7] = ["mp3", "wav", "m4a", "aac", "ogg", "flac", "opus"];
const DOCUMENT_EXTENSIONS: [&str; 1] = ["pdf"];

/// Publishers whose articles sit behind a paywall and have dedicated
/// scrapers upstream of the pipeline.
const PAYWALLED_HOSTS: [&str; 2] = ["stratechery.com", "seekingalpha.com"];

fn youtube_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:youtube\.com/(?:watch\?v=|shorts/|embed/)|youtube-nocookie\.com/embed/|youtu\.be/)([A-Za-z0-9_-]{6,})",
        )
        .expect("valid regex")
    })
}

fn vimeo_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:vimeo\.com/(?:video/)?|player\.vimeo\.com/video/)(\d+)")
            .expect("valid regex")
    })
}

fn loom_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"loom\.com/(?:share|embed)/([a-f0-9]{16,})").expect("valid regex")
    })
}

fn wistia_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:fast\.wistia\.(?:net|com)/embed/(?:iframe|medias)/|wistia\.com/medias/)([A-Za-z0-9]+)")
            .expect("valid regex")
    })
}

fn dailymotion_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"dailymotion\.com/(?:video|embed/video)/([A-Za-z0-9]+)").expect("valid regex")
    })
}

/// Hosted-podcast embed domains. Matched strictly against iframe `src`
/// attributes, never against free text.
const PODCAST_IFRAME_HOSTS: [(&str, &str); 5] = [
    ("open.spotify.com/embed", "spotify"),
    ("anchor.fm", "anchor"),
    ("soundcloud.com", "soundcloud"),
    ("podcasts.apple.com", "apple_podcasts"),
    ("player.simplecast.com", "simplecast"),
];

/// Classifies a URL from its shape alone.
#[must_use]
pub fn classify_url(url: &str) -> Classification {
    let host = host_of(url).unwrap_or_default();
    let path = path_lowercase(url);

    // 1. Direct media by extension.
    if let Some(ext) = path.rsplit('.').next().filter(|e| *e != path) {
        let kind = if VIDEO_EXTENSIONS.contains(&ext) {
            Some(ContentKind::DirectVideo)
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            Some(ContentKind::DirectAudio)
        } else if DOCUMENT_EXTENSIONS.contains(&ext) {
            Some(ContentKind::Document)
        } else {
            None
        };
        if let Some(kind) = kind {
            return Classification {
                kind,
                platform: "direct".to_string(),
                media_id: None,
                direct_media_url: Some(url.to_string()),
            };
        }
    }

    // 2. Known platform by host + canonical id pattern.
    if host.ends_with("youtube.com") || host == "youtu.be" || host.ends_with("youtube-nocookie.com")
    {
        if let Some(id) = youtube_re().captures(url).map(|c| c[1].to_string()) {
            return platform_embed(ContentKind::YoutubeWatch, "youtube", id);
        }
    }
    if host.ends_with("vimeo.com") {
        if let Some(id) = vimeo_re().captures(url).map(|c| c[1].to_string()) {
            return platform_embed(ContentKind::VimeoEmbed, "vimeo", id);
        }
    }
    if host.ends_with("loom.com") {
        if let Some(id) = loom_re().captures(url).map(|c| c[1].to_string()) {
            return platform_embed(ContentKind::LoomEmbed, "loom", id);
        }
    }
    if host.ends_with("wistia.com") || host.ends_with("wistia.net") {
        if let Some(id) = wistia_re().captures(url).map(|c| c[1].to_string()) {
            return platform_embed(ContentKind::WistiaEmbed, "wistia", id);
        }
    }
    if host.ends_with("dailymotion.com") {
        if let Some(id) = dailymotion_re().captures(url).map(|c| c[1].to_string()) {
            return platform_embed(ContentKind::DailymotionEmbed, "dailymotion", id);
        }
    }

    // 3. Article, tagged by publisher host.
    if PAYWALLED_HOSTS.iter().any(|h| host.ends_with(h)) {
        return Classification {
            kind: ContentKind::PaywalledPublisher,
            platform: publisher_tag(&host),
            media_id: None,
            direct_media_url: None,
        };
    }

    Classification {
        kind: ContentKind::ArticleHtml,
        platform: publisher_tag(&host),
        media_id: None,
        direct_media_url: None,
    }
}

/// Re-classifies with the rendered response body available.
///
/// Scans iframe `src` attributes with the same platform patterns used
/// for URLs; the first match wins and overrides `ArticleHtml`.
/// Scanning is strict: embed domains only, a mention of a video in
/// prose never counts.
#[must_use]
pub fn classify_with_body(url: &str, body: &str) -> Classification {
    let base = classify_url(url);
    if base.kind != ContentKind::ArticleHtml && base.kind != ContentKind::PaywalledPublisher {
        return base;
    }

    let document = Html::parse_document(body);
    let iframe_sel = Selector::parse("iframe").expect("valid selector");

    for iframe in document.select(&iframe_sel) {
        let Some(src) = iframe.value().attr("src") else {
            continue;
        };

        if src.contains("youtube.com/embed") || src.contains("youtube-nocookie.com/embed") {
            if let Some(id) = youtube_re().captures(src).map(|c| c[1].to_string()) {
                return embed_override(&base, ContentKind::YoutubeWatch, "youtube", id);
            }
        }
        if src.contains("player.vimeo.com/video") {
            if let Some(id) = vimeo_re().captures(src).map(|c| c[1].to_string()) {
                return embed_override(&base, ContentKind::VimeoEmbed, "vimeo", id);
            }
        }
        if src.contains("loom.com/embed") {
            if let Some(id) = loom_re().captures(src).map(|c| c[1].to_string()) {
                return embed_override(&base, ContentKind::LoomEmbed, "loom", id);
            }
        }
        if src.contains("wistia.net/embed") || src.contains("wistia.com/embed") {
            if let Some(id) = wistia_re().captures(src).map(|c| c[1].to_string()) {
                return embed_override(&base, ContentKind::WistiaEmbed, "wistia", id);
            }
        }
        if src.contains("dailymotion.com/embed") {
            if let Some(id) = dailymotion_re().captures(src).map(|c| c[1].to_string()) {
                return embed_override(&base, ContentKind::DailymotionEmbed, "dailymotion", id);
            }
        }
        for (pattern, platform) in PODCAST_IFRAME_HOSTS {
            if src.contains(pattern) {
                return Classification {
                    kind: ContentKind::HostedPodcast,
                    platform: platform.to_string(),
                    media_id: None,
                    direct_media_url: Some(src.to_string()),
                };
            }
        }
    }

    base
}

fn embed_override(
    base: &Classification,
    kind: ContentKind,
    platform: &str,
    id: String,
) -> Classification {
    log::info!(
        "[Classify] Body scan found {} embed {} inside {} page",
        platform,
        id,
        base.platform
    );
    platform_embed(kind, platform, id)
}

fn platform_embed(kind: ContentKind, platform: &str, id: String) -> Classification {
    Classification {
        kind,
        platform: platform.to_string(),
        media_id: Some(id),
        direct_media_url: None,
    }
}

/// Derives the platform tag for article pages from the host suffix.
fn publisher_tag(host: &str) -> String {
    let known = [
        ("substack.com", "substack"),
        ("medium.com", "medium"),
        ("stratechery.com", "stratechery"),
        ("seekingalpha.com", "seekingalpha"),
        ("ghost.io", "ghost"),
        ("linkedin.com", "linkedin"),
    ];
    for (suffix, tag) in known {
        if host == suffix || host.ends_with(&format!(".{}", suffix)) {
            return tag.to_string();
        }
    }
    "generic".to_string()
}

fn path_lowercase(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_default()
}
