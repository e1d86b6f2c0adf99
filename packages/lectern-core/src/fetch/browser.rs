//! Headless-browser rendering client.
//!
//! The browser runtime is an external service that accepts a URL plus
//! cookie state and returns the fully-rendered DOM. This module only
//! speaks its HTTP API; launching and sandboxing the browser is the
//! service's problem.

use std::time::Duration;

use serde_json::json;

use crate::error::{LecternError, LecternResult};

use super::session::SessionCookie;

/// A fully-rendered page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub final_url: String,
    pub html: String,
}

/// Seam for browser-assisted fetching.
#[async_trait::async_trait]
pub trait PageRenderer: Send + Sync {
    /// Renders a URL with the given cookies injected, waiting for
    /// network idle and semantic content before reading the DOM.
    async fn render(&self, url: &str, cookies: &[SessionCookie]) -> LecternResult<RenderedPage>;
}

/// Selectors that indicate the main content has mounted.
const CONTENT_SELECTORS: &str = "article, main, [role=main]";

/// Client for a browserless-style `/content` endpoint.
pub struct BrowserServiceClient {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
    timeout: Duration,
}

impl BrowserServiceClient {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> LecternResult<Self> {
        let client = reqwest::Client::builder()
            // The outer timeout leaves headroom over the navigation
            // timeout the service itself enforces.
            .timeout(timeout + Duration::from_secs(15))
            .build()
            .map_err(|e| LecternError::Internal(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent: user_agent.to_string(),
            timeout,
        })
    }
}

#[async_trait::async_trait]
impl PageRenderer for BrowserServiceClient {
    async fn render(&self, url: &str, cookies: &[SessionCookie]) -> LecternResult<RenderedPage> {
        let cookie_payload: Vec<_> = cookies
            .iter()
            .map(|c| {
                json!({
                    "name": c.name,
                    "value": c.value,
                    "domain": c.domain,
                    "path": c.path,
                })
            })
            .collect();

        // Isolated context per render; realistic viewport/UA/locale and
        // masked automation flag; network-idle wait, then a content
        // selector wait, then a scroll pass for lazy-loaded sections.
        let body = json!({
            "url": url,
            "cookies": cookie_payload,
            "userAgent": self.user_agent,
            "viewport": { "width": 1440, "height": 900 },
            "locale": "en-US",
            "stealth": true,
            "gotoOptions": {
                "waitUntil": "networkidle2",
                "timeout": self.timeout.as_millis() as u64,
            },
            "waitForSelector": {
                "selector": CONTENT_SELECTORS,
                "timeout": 5000,
            },
            "scrollPage": true,
        });

        let response = self
            .client
            .post(format!("{}/content", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LecternError::Network(format!("browser render timed out for {}", url))
                } else {
                    LecternError::Network(format!("browser service: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(LecternError::Network(format!(
                "browser render of {} failed with {}",
                url, status
            )));
        }

        let final_url = response
            .headers()
            .get("x-final-url")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(url)
            .to_string();
        let html = response.text().await?;

        log::info!(
            "[Browser] Rendered {} ({} bytes of DOM)",
            final_url,
            html.len()
        );
        Ok(RenderedPage { final_url, html })
    }
}
