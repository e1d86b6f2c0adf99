//! Browser session snapshots.
//!
//! A session snapshot is a serialized cookie jar plus origin
//! localStorage, written out-of-band by the session uploader. The
//! ingestion path is a pure reader: it loads the newest active row at
//! the start of each fetch and scopes cookies per origin. The snapshot
//! is never mutated in-process.

use std::sync::Arc;

use serde::Deserialize;

use crate::error::LecternResult;
use crate::store::SessionSnapshotStore;

/// One cookie from the snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    "/".to_string()
}

#[derive(Deserialize)]
struct StorageState {
    #[serde(default)]
    cookies: Vec<SessionCookie>,
}

/// A consistent snapshot of the shared session, taken at fetch start.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    cookies: Vec<SessionCookie>,
}

impl SessionState {
    /// Parses the stored `storage_state_json` payload. Unknown fields
    /// (origins/localStorage) are ignored; the fetcher only needs
    /// cookies.
    pub fn from_storage_state(value: &serde_json::Value) -> Self {
        let state: StorageState =
            serde_json::from_value(value.clone()).unwrap_or(StorageState { cookies: Vec::new() });
        Self {
            cookies: state.cookies,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Cookies whose domain matches the host. A leading dot in the
    /// stored domain means the cookie also applies to subdomains.
    pub fn cookies_for_host(&self, host: &str) -> Vec<&SessionCookie> {
        self.cookies
            .iter()
            .filter(|c| domain_matches(&c.domain, host))
            .collect()
    }

    /// Builds a `Cookie:` header value scoped to the host, or `None`
    /// when no cookie applies.
    pub fn cookie_header_for(&self, host: &str) -> Option<String> {
        let cookies = self.cookies_for_host(host);
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

fn domain_matches(cookie_domain: &str, host: &str) -> bool {
    if cookie_domain.is_empty() {
        return false;
    }
    let domain = cookie_domain.trim_start_matches('.');
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// Read-through access to the shared snapshot.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionSnapshotStore>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionSnapshotStore>) -> Self {
        Self { store }
    }

    /// Loads the newest active snapshot. A missing row yields an empty
    /// state rather than an error so unauthenticated fetches still run.
    pub async fn load(&self) -> LecternResult<SessionState> {
        match self.store.newest_active().await? {
            Some(snapshot) => {
                let state = SessionState::from_storage_state(&snapshot.storage_state);
                log::debug!(
                    "[Session] Loaded snapshot from {} ({} cookies)",
                    snapshot.updated_at,
                    state.cookies.len()
                );
                Ok(state)
            }
            None => {
                log::debug!("[Session] No active snapshot configured");
                Ok(SessionState::default())
            }
        }
    }

    /// Whether any active snapshot exists (reported by /health).
    pub async fn is_configured(&self) -> bool {
        matches!(self.store.newest_active().await, Ok(Some(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> SessionState {
        SessionState::from_storage_state(&json!({
            "cookies": [
                {"name": "sid", "value": "abc", "domain": ".example.com", "path": "/"},
                {"name": "theme", "value": "dark", "domain": "other.net", "path": "/"}
            ],
            "origins": [{"origin": "https://example.com", "localStorage": []}]
        }))
    }

    #[test]
    fn parses_cookies_and_ignores_origins() {
        let state = state();
        assert_eq!(state.cookies_for_host("example.com").len(), 1);
    }

    #[test]
    fn dot_domain_matches_subdomains() {
        let state = state();
        assert_eq!(state.cookies_for_host("app.example.com").len(), 1);
        assert!(state.cookies_for_host("example.org").is_empty());
    }

    #[test]
    fn exact_domain_does_not_match_other_hosts() {
        let state = state();
        assert_eq!(state.cookies_for_host("other.net").len(), 1);
        assert!(state.cookies_for_host("sub.example.net").is_empty());
    }

    #[test]
    fn cookie_header_joins_pairs() {
        let state = SessionState::from_storage_state(&json!({
            "cookies": [
                {"name": "a", "value": "1", "domain": "site.com"},
                {"name": "b", "value": "2", "domain": ".site.com"}
            ]
        }));
        assert_eq!(state.cookie_header_for("site.com").unwrap(), "a=1; b=2");
        assert!(state.cookie_header_for("elsewhere.com").is_none());
    }

    #[test]
    fn malformed_state_yields_empty_jar() {
        let state = SessionState::from_storage_state(&json!("not an object"));
        assert!(state.is_empty());
    }
}
