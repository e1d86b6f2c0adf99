//! Media location and download.
//!
//! Resolves the primary media asset a page references, streams it to a
//! temporary file, and optionally persists it to the long-term media
//! bucket. Platform embeds are resolved through an external downloader
//! subprocess; direct assets stream over plain HTTP.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use scraper::{Html, Selector};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::classify::{Classification, ContentKind};
use crate::config::{EXPIRING_MEDIA_BUCKET, PERMANENT_MEDIA_BUCKET};
use crate::error::{LecternError, LecternResult};
use crate::store::objects::ObjectStorage;
use crate::store::MediaPointer;

/// Broad media shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn from_content_kind(kind: ContentKind) -> Option<Self> {
        match kind {
            ContentKind::DirectVideo
            | ContentKind::YoutubeWatch
            | ContentKind::VimeoEmbed
            | ContentKind::LoomEmbed
            | ContentKind::WistiaEmbed
            | ContentKind::DailymotionEmbed => Some(Self::Video),
            ContentKind::DirectAudio | ContentKind::HostedPodcast => Some(Self::Audio),
            ContentKind::Document => Some(Self::Document),
            ContentKind::ArticleHtml | ContentKind::PaywalledPublisher => None,
        }
    }
}

/// A located (and possibly downloaded) media asset.
#[derive(Debug, Clone)]
pub struct MediaAsset {
    pub kind: MediaKind,
    pub url: String,
    pub download_path: Option<PathBuf>,
    pub content_type: String,
    pub size_bytes: Option<i64>,
    pub duration_seconds: Option<f64>,
}

/// Maps a file extension to its MIME type.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "m4v" => "video/x-m4v",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "opus" => "audio/opus",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn extension_of(url_or_path: &str) -> String {
    let path = url::Url::parse(url_or_path)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url_or_path.to_string());
    Path::new(&path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin")
        .to_ascii_lowercase()
}

/// Subprocess seam for platform media resolution.
#[async_trait::async_trait]
pub trait PlatformDownloader: Send + Sync {
    /// Downloads the asset for a platform embed into `dest_dir`,
    /// returning the file path. `want_video` keeps the video track;
    /// otherwise audio-only is preferred for size.
    async fn download(
        &self,
        platform: &str,
        media_id: &str,
        want_video: bool,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> LecternResult<PathBuf>;
}

/// Downloader shelling out to `yt-dlp`.
pub struct YtDlpDownloader;

fn platform_watch_url(platform: &str, media_id: &str) -> Option<String> {
    match platform {
        "youtube" => Some(format!("https://www.youtube.com/watch?v={}", media_id)),
        "vimeo" => Some(format!("https://vimeo.com/{}", media_id)),
        "loom" => Some(format!("https://www.loom.com/share/{}", media_id)),
        "wistia" => Some(format!("https://fast.wistia.net/embed/iframe/{}", media_id)),
        "dailymotion" => Some(format!("https://www.dailymotion.com/video/{}", media_id)),
        _ => None,
    }
}

#[async_trait::async_trait]
impl PlatformDownloader for YtDlpDownloader {
    async fn download(
        &self,
        platform: &str,
        media_id: &str,
        want_video: bool,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> LecternResult<PathBuf> {
        let url = platform_watch_url(platform, media_id).ok_or_else(|| {
            LecternError::ClassificationMiss(format!("no downloader for platform {}", platform))
        })?;

        let format = if want_video {
            "bestvideo[height<=1080]+bestaudio/best"
        } else {
            "bestaudio/best"
        };
        let output = dest_dir.join("media.%(ext)s");

        let mut child = tokio::process::Command::new("yt-dlp")
            .arg("--no-playlist")
            .arg("-f")
            .arg(format)
            .arg("-o")
            .arg(&output)
            .arg("--print")
            .arg("after_move:filepath")
            .arg("--no-simulate")
            .arg("--quiet")
            .arg(&url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LecternError::Internal(format!("spawning yt-dlp: {}", e)))?;

        let result = tokio::select! {
            result = child.wait_with_output() => result,
            _ = cancel.cancelled() => {
                // wait_with_output took ownership; the kill-on-drop
                // below covers the child when the future is dropped.
                return Err(LecternError::Cancelled);
            }
        };

        let output = result.map_err(|e| LecternError::Internal(format!("yt-dlp: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LecternError::ClassificationMiss(format!(
                "yt-dlp failed for {} ({}): {}",
                url,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = stdout
            .lines()
            .last()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| {
                LecternError::Internal("yt-dlp reported no output file".to_string())
            })?;
        Ok(path)
    }
}

/// Seam for media location and download, so the pipeline is testable
/// without a network or external downloader binary.
#[async_trait::async_trait]
pub trait MediaResolver: Send + Sync {
    /// First embedded audio asset in an article page, if any.
    fn find_embedded_audio(&self, html: &str) -> Option<String>;

    /// Streams a direct asset to disk.
    async fn download_direct(
        &self,
        url: &str,
        kind: MediaKind,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> LecternResult<MediaAsset>;

    /// Resolves and downloads a platform embed.
    async fn download_platform(
        &self,
        classification: &Classification,
        want_video: bool,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> LecternResult<MediaAsset>;

    /// Uploads a downloaded asset to the expiring bucket, returning the
    /// pointer columns for the content row.
    async fn persist_to_bucket(
        &self,
        storage: &dyn ObjectStorage,
        asset: &MediaAsset,
        article_id: i64,
        private: bool,
    ) -> LecternResult<MediaPointer>;
}

/// Locates and downloads the primary media asset for a page.
pub struct MediaExtractor {
    http: reqwest::Client,
    downloader: std::sync::Arc<dyn PlatformDownloader>,
}

impl MediaExtractor {
    pub fn new(
        downloader: std::sync::Arc<dyn PlatformDownloader>,
        user_agent: &str,
    ) -> LecternResult<Self> {
        // Downloads are unbounded in time but cancellable; only connect
        // is bounded.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()
            .map_err(|e| LecternError::Internal(format!("http client: {}", e)))?;
        Ok(Self { http, downloader })
    }
}

#[async_trait::async_trait]
impl MediaResolver for MediaExtractor {
    /// Finds the first embedded audio asset in an article page:
    /// `<audio src>`, nested `<source src>`, or a supported platform
    /// iframe already classified upstream.
    fn find_embedded_audio(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);

        let audio_sel = Selector::parse("audio").expect("valid selector");
        let source_sel = Selector::parse("source").expect("valid selector");

        for audio in document.select(&audio_sel) {
            if let Some(src) = audio.value().attr("src").filter(|s| !s.is_empty()) {
                return Some(src.to_string());
            }
            for source in audio.select(&source_sel) {
                if let Some(src) = source.value().attr("src").filter(|s| !s.is_empty()) {
                    return Some(src.to_string());
                }
            }
        }
        None
    }

    /// Streams a direct asset to `dest_dir`, cancellable mid-transfer.
    async fn download_direct(
        &self,
        url: &str,
        kind: MediaKind,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> LecternResult<MediaAsset> {
        let ext = extension_of(url);
        let dest = dest_dir.join(format!("media.{}", ext));

        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(LecternError::Network(format!(
                "media download of {} failed with {}",
                url, status
            )));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| mime_for_extension(&ext).to_string());

        let mut file = tokio::fs::File::create(&dest).await?;
        let mut stream = response.bytes_stream();

        loop {
            tokio::select! {
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => file.write_all(&bytes).await?,
                        Some(Err(e)) => {
                            let _ = tokio::fs::remove_file(&dest).await;
                            return Err(e.into());
                        }
                        None => break,
                    }
                }
                _ = cancel.cancelled() => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&dest).await;
                    return Err(LecternError::Cancelled);
                }
            }
        }
        file.flush().await?;

        let size_bytes = tokio::fs::metadata(&dest).await?.len() as i64;
        log::info!(
            "[Media] Downloaded {} ({} bytes) to {}",
            url,
            size_bytes,
            dest.display()
        );

        Ok(MediaAsset {
            kind,
            url: url.to_string(),
            download_path: Some(dest),
            content_type,
            size_bytes: Some(size_bytes),
            duration_seconds: None,
        })
    }

    /// Resolves a platform embed to a downloaded file.
    async fn download_platform(
        &self,
        classification: &Classification,
        want_video: bool,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> LecternResult<MediaAsset> {
        let media_id = classification.media_id.as_deref().ok_or_else(|| {
            LecternError::ClassificationMiss(format!(
                "{} embed without a media id",
                classification.platform
            ))
        })?;

        let path = self
            .downloader
            .download(
                &classification.platform,
                media_id,
                want_video,
                dest_dir,
                cancel,
            )
            .await?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_string();
        let size_bytes = tokio::fs::metadata(&path).await?.len() as i64;
        let kind = if want_video {
            MediaKind::Video
        } else {
            MediaKind::Audio
        };

        Ok(MediaAsset {
            kind,
            url: platform_watch_url(&classification.platform, media_id)
                .unwrap_or_else(|| media_id.to_string()),
            content_type: mime_for_extension(&ext).to_string(),
            download_path: Some(path),
            size_bytes: Some(size_bytes),
            duration_seconds: None,
        })
    }

    /// Uploads a downloaded asset to the expiring media bucket and
    /// returns the pointer columns for the content row.
    async fn persist_to_bucket(
        &self,
        storage: &dyn ObjectStorage,
        asset: &MediaAsset,
        article_id: i64,
        private: bool,
    ) -> LecternResult<MediaPointer> {
        let path = asset.download_path.as_ref().ok_or_else(|| {
            LecternError::Internal("persist requested for undownloaded media".to_string())
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let scope = if private { "private" } else { "public" };
        let object_path = format!("{}/{}/media.{}", scope, article_id, ext);

        let content = tokio::fs::read(path).await?;
        storage
            .upload(
                EXPIRING_MEDIA_BUCKET,
                &object_path,
                Bytes::from(content),
                &asset.content_type,
            )
            .await?;

        Ok(MediaPointer {
            bucket: Some(EXPIRING_MEDIA_BUCKET.to_string()),
            path: Some(object_path),
            uploaded_at: Some(Utc::now()),
            content_type: Some(asset.content_type.clone()),
            size_bytes: asset.size_bytes,
            duration_seconds: asset.duration_seconds,
            is_permanent: false,
        })
    }
}

/// Uploads a user-provided file to the permanent bucket. Unlike
/// pipeline downloads, these never expire.
pub async fn upload_user_media(
    storage: &dyn ObjectStorage,
    user_id: &str,
    filename: &str,
    content: Bytes,
) -> LecternResult<(String, String, MediaKind)> {
    let ext = extension_of(filename);
    let kind = match mime_for_extension(&ext) {
        t if t.starts_with("video/") => MediaKind::Video,
        t if t.starts_with("audio/") => MediaKind::Audio,
        "application/pdf" => MediaKind::Document,
        _ => {
            return Err(LecternError::InvalidRequest(format!(
                "unsupported file type: .{}",
                ext
            )))
        }
    };

    let safe_name: String = filename
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    let object_path = format!(
        "user_{}/{}_{}",
        user_id,
        Utc::now().timestamp(),
        safe_name
    );

    let url = storage
        .upload(
            PERMANENT_MEDIA_BUCKET,
            &object_path,
            content,
            mime_for_extension(&ext),
        )
        .await?;
    Ok((url, object_path, kind))
}
