//! Small shared utilities: URL canonicalization and timestamp formatting.

use url::Url;

/// Returns the canonical form of a URL: query and fragment stripped,
/// scheme/host/path preserved.
///
/// Canonical URLs are the identity key for content items, so two
/// submissions that differ only in tracking parameters resolve to the
/// same row. Unparseable input is returned unchanged.
#[must_use]
pub fn canonical_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}

/// Checks whether two URLs share the same canonical form.
#[must_use]
pub fn is_same_canonical_url(a: &str, b: &str) -> bool {
    canonical_url(a) == canonical_url(b)
}

/// Returns the lower-cased host of a URL, with a leading `www.` removed.
#[must_use]
pub fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// Formats seconds as `MM:SS`, or `H:MM:SS` past the first hour.
///
/// This is the timestamp prefix format used in stored transcripts and
/// in frame metadata.
#[must_use]
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// Truncates a string to at most `max_chars`, appending `...` when cut.
#[must_use]
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Returns the current Unix timestamp in milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_url_strips_query_and_fragment() {
        assert_eq!(
            canonical_url("https://example.com/post?utm=x&token=abc#section"),
            "https://example.com/post"
        );
    }

    #[test]
    fn canonical_url_preserves_path_and_trailing_slash() {
        assert_eq!(
            canonical_url("https://stratechery.com/2025/article/?access_token=xyz"),
            "https://stratechery.com/2025/article/"
        );
    }

    #[test]
    fn canonical_url_passes_through_unparseable_input() {
        assert_eq!(canonical_url("not a url"), "not a url");
    }

    #[test]
    fn same_canonical_url_ignores_differing_tokens() {
        assert!(is_same_canonical_url(
            "https://example.com/a?token=1",
            "https://example.com/a?token=2"
        ));
        assert!(!is_same_canonical_url(
            "https://example.com/a",
            "https://example.com/b"
        ));
    }

    #[test]
    fn host_of_strips_www_prefix() {
        assert_eq!(
            host_of("https://www.youtube.com/watch?v=abc"),
            Some("youtube.com".to_string())
        );
        assert_eq!(host_of("nonsense"), None);
    }

    #[test]
    fn format_timestamp_minutes_and_hours() {
        assert_eq!(format_timestamp(0.0), "00:00");
        assert_eq!(format_timestamp(65.4), "01:05");
        assert_eq!(format_timestamp(3723.0), "1:02:03");
    }

    #[test]
    fn truncate_appends_ellipsis_only_when_cut() {
        assert_eq!(truncate_with_ellipsis("short", 10), "short");
        assert_eq!(truncate_with_ellipsis("abcdefgh", 4), "abcd...");
    }
}
