//! Content fetching.
//!
//! Plain HTTP first, escalating to a headless-browser render when the
//! response carries bot-block indicators (or the host is on the
//! browser-always list). Session cookies are injected into both paths,
//! scoped per origin.

pub mod browser;
pub mod session;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{LecternError, LecternResult};
use crate::retry::with_retry;
use crate::util::host_of;

pub use browser::{BrowserServiceClient, PageRenderer, RenderedPage};
pub use session::{SessionCookie, SessionManager, SessionState};

/// Bodies shorter than this with an SPA skeleton shape are treated as
/// JS-gated.
const SPA_SKELETON_MAX_BYTES: usize = 2048;

/// Result of a fetch: final URL after redirects, the rendered HTML, the
/// cookie jar as injected for the origin, and which path produced it.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub final_url: String,
    pub html: String,
    pub cookies: Vec<SessionCookie>,
    pub status: u16,
    pub used_browser: bool,
}

/// Checks a response body (lower-cased) for bot-block indicators.
///
/// Indicators, from pages actually served by blocked fetches:
/// Cloudflare's challenge interstitial, access-denied/captcha text,
/// "enable JavaScript" boilerplate, and the near-empty single-root-div
/// skeleton an unrendered SPA returns.
pub fn is_bot_blocked(html: &str, status: u16) -> bool {
    if status == 403 || status == 429 || status == 503 {
        return true;
    }

    let content = html.to_lowercase();

    if content.contains("checking your browser") || content.contains("cloudflare") {
        return true;
    }
    if content.contains("access denied") || content.contains("forbidden") {
        return true;
    }
    if content.contains("captcha") || content.contains("recaptcha") {
        return true;
    }
    if content.contains("you need to enable javascript")
        || content.contains("javascript is required")
        || content.contains("please enable javascript")
    {
        return true;
    }

    is_spa_skeleton(&content)
}

fn is_spa_skeleton(content: &str) -> bool {
    if content.len() >= SPA_SKELETON_MAX_BYTES {
        return false;
    }
    let div_count = content.matches("<div").count();
    div_count <= 1 && (content.contains("id=\"root\"") || content.contains("id=\"app\""))
}

/// Whether a final URL landed on a login wall.
fn is_auth_page(final_url: &str) -> bool {
    let lower = final_url.to_lowercase();
    let path = url::Url::parse(&lower)
        .map(|u| u.path().to_string())
        .unwrap_or(lower);
    path.split('/')
        .any(|segment| matches!(segment, "login" | "signin" | "sign-in" | "auth"))
}

/// Seam for page fetching, so the pipeline is testable without a
/// network.
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> LecternResult<FetchResult>;
}

/// Fetches fully-rendered pages.
pub struct ContentFetcher {
    http: reqwest::Client,
    renderer: Arc<dyn PageRenderer>,
    sessions: SessionManager,
    browser_always: HashSet<String>,
}

impl ContentFetcher {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        sessions: SessionManager,
        user_agent: &str,
        http_timeout: Duration,
        browser_always: HashSet<String>,
    ) -> LecternResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| LecternError::Internal(format!("http client: {}", e)))?;
        Ok(Self {
            http,
            renderer,
            sessions,
            browser_always,
        })
    }

    fn forces_browser(&self, host: &str) -> bool {
        self.browser_always.contains(host)
            || self
                .browser_always
                .iter()
                .any(|d| host.ends_with(&format!(".{}", d)))
    }

    /// Fetches a URL, escalating to the browser on bot-block.
    pub async fn fetch_page(&self, url: &str) -> LecternResult<FetchResult> {
        let host = host_of(url).unwrap_or_default();
        // Consistent snapshot for this fetch; refreshes land on the
        // next invocation.
        let session = self.sessions.load().await?;
        let cookies: Vec<SessionCookie> = session
            .cookies_for_host(&host)
            .into_iter()
            .cloned()
            .collect();

        if self.forces_browser(&host) {
            log::info!("[Fetch] {} is on the browser-always list", host);
            return self.browser_fetch(url, &cookies).await;
        }

        let (status, final_url, html) = self.plain_fetch(url, &session, &host).await?;

        if is_auth_page(&final_url) {
            log::warn!("[Fetch] {} redirected to a login page: {}", url, final_url);
            return Err(LecternError::AuthRequired(url.to_string()));
        }

        if is_bot_blocked(&html, status) {
            log::info!(
                "[Fetch] Bot-block indicators on {} (status {}), escalating to browser",
                url,
                status
            );
            return self.browser_fetch(url, &cookies).await;
        }

        Ok(FetchResult {
            final_url,
            html,
            cookies,
            status,
            used_browser: false,
        })
    }

    async fn plain_fetch(
        &self,
        url: &str,
        session: &SessionState,
        host: &str,
    ) -> LecternResult<(u16, String, String)> {
        let cookie_header = session.cookie_header_for(host);

        with_retry("plain fetch", || {
            let cookie_header = cookie_header.clone();
            async move {
                let mut request = self.http.get(url);
                if let Some(ref header) = cookie_header {
                    request = request.header(reqwest::header::COOKIE, header.clone());
                }
                let response = request.send().await?;
                let status = response.status().as_u16();
                let final_url = response.url().to_string();
                let html = response.text().await?;
                Ok((status, final_url, html))
            }
        })
        .await
    }

    async fn browser_fetch(
        &self,
        url: &str,
        cookies: &[SessionCookie],
    ) -> LecternResult<FetchResult> {
        let page = self.renderer.render(url, cookies).await?;

        if is_auth_page(&page.final_url) {
            return Err(LecternError::AuthRequired(url.to_string()));
        }

        Ok(FetchResult {
            final_url: page.final_url,
            html: page.html,
            cookies: cookies.to_vec(),
            status: 200,
            used_browser: true,
        })
    }
}

#[async_trait::async_trait]
impl PageFetcher for ContentFetcher {
    async fn fetch(&self, url: &str) -> LecternResult<FetchResult> {
        self.fetch_page(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloudflare_challenge_is_blocked() {
        assert!(is_bot_blocked(
            "<html>Checking your browser before accessing example.com</html>",
            200
        ));
    }

    #[test]
    fn error_statuses_are_blocked() {
        assert!(is_bot_blocked("<html>anything</html>", 403));
        assert!(is_bot_blocked("<html>anything</html>", 503));
    }

    #[test]
    fn javascript_gate_is_blocked() {
        assert!(is_bot_blocked(
            "<html><body>You need to enable JavaScript to run this app.</body></html>",
            200
        ));
    }

    #[test]
    fn spa_skeleton_is_blocked() {
        assert!(is_bot_blocked(
            r#"<html><head></head><body><div id="root"></div></body></html>"#,
            200
        ));
    }

    #[test]
    fn full_article_is_not_blocked() {
        let html = format!(
            "<html><body><article>{}</article><div>a</div><div>b</div></body></html>",
            "real content ".repeat(500)
        );
        assert!(!is_bot_blocked(&html, 200));
    }

    #[test]
    fn login_redirects_detected() {
        assert!(is_auth_page("https://example.com/login?next=%2Fpost"));
        assert!(is_auth_page("https://example.com/auth/signin"));
        assert!(!is_auth_page("https://example.com/blog/logins-in-rust"));
    }
}
