//! Tolerant parsing of LLM analysis responses.
//!
//! Responses arrive as free text, frequently wrapped in Markdown code
//! fences and occasionally missing keys or mistyping fields. The parser
//! strips fences, decodes, then runs a normalize pass: missing
//! top-level keys become empty collections, mistyped fields are coerced
//! to empties, and timestamps outside `[0, duration]` are nulled. Only
//! a completely undecodable response is an error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LecternError, LecternResult};

/// One key insight, optionally anchored to a media timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyInsight {
    pub insight: String,
    #[serde(default)]
    pub timestamp_seconds: Option<f64>,
    #[serde(default)]
    pub time_formatted: Option<String>,
}

/// One notable quote with attribution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub quote: String,
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub timestamp_seconds: Option<f64>,
    #[serde(default)]
    pub time_formatted: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
}

/// The validated analysis payload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Insights {
    pub summary: String,
    pub summary_html: Option<String>,
    pub key_insights: Vec<KeyInsight>,
    pub quotes: Vec<Quote>,
    pub duration_minutes: Option<f64>,
    pub word_count: Option<i64>,
    pub topics: Vec<String>,
    /// Additional named sections (earnings analysis). Always objects or
    /// arrays after normalization.
    pub sections: Map<String, Value>,
}

/// Sections an earnings analysis must always carry.
pub const EARNINGS_SECTIONS: [&str; 6] = [
    "key_metrics",
    "business_highlights",
    "guidance",
    "risks_concerns",
    "positives",
    "notable_quotes",
];

/// Strips an optional Markdown code fence (```json ... ``` or ``` ... ```).
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") up to the first newline.
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Decodes the response into a JSON object, tolerating prose around the
/// object itself.
fn decode_object(raw: &str) -> LecternResult<Map<String, Value>> {
    let stripped = strip_code_fence(raw);

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(stripped) {
        return Ok(map);
    }

    // Fall back to the outermost brace span.
    if let (Some(start), Some(end)) = (stripped.find('{'), stripped.rfind('}')) {
        if start < end {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&stripped[start..=end]) {
                return Ok(map);
            }
        }
    }

    Err(LecternError::LlmParse(format!(
        "response is not a JSON object ({} chars)",
        raw.len()
    )))
}

/// Parses and normalizes a general analysis response.
pub fn parse_insights(raw: &str, duration_seconds: Option<f64>) -> LecternResult<Insights> {
    let mut map = decode_object(raw)?;

    let mut insights = Insights {
        summary: take_string(&mut map, "summary"),
        summary_html: None,
        key_insights: take_array(&mut map, "key_insights")
            .into_iter()
            .filter_map(|v| serde_json::from_value::<KeyInsight>(v).ok())
            .collect(),
        quotes: take_array(&mut map, "quotes")
            .into_iter()
            .filter_map(|v| serde_json::from_value::<Quote>(v).ok())
            .collect(),
        duration_minutes: map.remove("duration_minutes").and_then(|v| v.as_f64()),
        word_count: map.remove("word_count").and_then(|v| v.as_i64()),
        topics: take_array(&mut map, "topics")
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        sections: Map::new(),
    };

    // The model already writes <p>-tagged paragraphs; keep the HTML
    // variant alongside the plain summary when markup is present.
    if insights.summary.contains("<p>") {
        insights.summary_html = Some(insights.summary.clone());
    }

    validate_timestamps(&mut insights, duration_seconds);
    Ok(insights)
}

/// Parses and normalizes an earnings-call response. Every section in
/// [`EARNINGS_SECTIONS`] is guaranteed present as an object or array.
pub fn parse_earnings_insights(
    raw: &str,
    duration_seconds: Option<f64>,
) -> LecternResult<Insights> {
    let mut map = decode_object(raw)?;

    let mut sections = Map::new();
    for key in EARNINGS_SECTIONS {
        let value = match map.remove(key) {
            Some(v @ Value::Object(_)) | Some(v @ Value::Array(_)) => v,
            // Mistyped or missing sections become an empty collection.
            // key_metrics and guidance are object-shaped, the rest are lists.
            _ if key == "key_metrics" || key == "guidance" => Value::Object(Map::new()),
            _ => Value::Array(Vec::new()),
        };
        sections.insert(key.to_string(), value);
    }

    // notable_quotes double as the quotes list.
    let quotes = sections
        .get("notable_quotes")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| serde_json::from_value::<Quote>(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default();

    let mut insights = Insights {
        summary: take_string(&mut map, "summary"),
        summary_html: None,
        key_insights: Vec::new(),
        quotes,
        duration_minutes: map.remove("duration_minutes").and_then(|v| v.as_f64()),
        word_count: None,
        topics: take_array(&mut map, "topics")
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        sections,
    };

    validate_timestamps(&mut insights, duration_seconds);
    Ok(insights)
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> String {
    match map.remove(key) {
        Some(Value::String(s)) => s,
        _ => String::new(),
    }
}

fn take_array(map: &mut Map<String, Value>, key: &str) -> Vec<Value> {
    match map.remove(key) {
        Some(Value::Array(items)) => items,
        // A mapping (or anything else) where an array was expected
        // coerces to empty.
        _ => Vec::new(),
    }
}

/// Nulls timestamps outside `[0, duration]` when the duration is known;
/// negative timestamps are always nulled.
fn validate_timestamps(insights: &mut Insights, duration_seconds: Option<f64>) {
    let in_range = |ts: f64| ts >= 0.0 && duration_seconds.map_or(true, |d| ts <= d);

    for insight in &mut insights.key_insights {
        if insight.timestamp_seconds.is_some_and(|ts| !in_range(ts)) {
            insight.timestamp_seconds = None;
            insight.time_formatted = None;
        }
    }
    for quote in &mut insights.quotes {
        if quote.timestamp_seconds.is_some_and(|ts| !in_range(ts)) {
            quote.timestamp_seconds = None;
            quote.time_formatted = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "summary": "<p>First paragraph.</p><p>Second.</p>",
        "key_insights": [
            {"insight": "In range", "timestamp_seconds": 300, "time_formatted": "5:00"},
            {"insight": "Out of range", "timestamp_seconds": 9000, "time_formatted": "2:30:00"},
            {"insight": "No stamp", "timestamp_seconds": null, "time_formatted": null}
        ],
        "quotes": [
            {"quote": "Great quote", "speaker": "Jane", "timestamp_seconds": 120, "time_formatted": "2:00", "context": "Intro"}
        ],
        "duration_minutes": 45,
        "word_count": 5000,
        "topics": ["AI", "Product"]
    }"#;

    #[test]
    fn parses_plain_json() {
        let insights = parse_insights(RESPONSE, Some(2700.0)).unwrap();
        assert_eq!(insights.key_insights.len(), 3);
        assert_eq!(insights.topics, vec!["AI", "Product"]);
        assert_eq!(insights.word_count, Some(5000));
        assert!(insights.summary_html.is_some());
    }

    #[test]
    fn parses_fenced_json() {
        let fenced = format!("```json\n{}\n```", RESPONSE);
        let insights = parse_insights(&fenced, None).unwrap();
        assert_eq!(insights.quotes.len(), 1);
    }

    #[test]
    fn parses_json_with_surrounding_prose() {
        let wrapped = format!("Here is the analysis you asked for:\n{}\nHope that helps!", RESPONSE);
        let insights = parse_insights(&wrapped, None).unwrap();
        assert!(!insights.summary.is_empty());
    }

    #[test]
    fn out_of_range_timestamps_are_nulled() {
        let insights = parse_insights(RESPONSE, Some(2700.0)).unwrap();
        let out_of_range = &insights.key_insights[1];
        assert_eq!(out_of_range.timestamp_seconds, None);
        assert_eq!(out_of_range.time_formatted, None);
        // In-range stamp untouched.
        assert_eq!(insights.key_insights[0].timestamp_seconds, Some(300.0));
    }

    #[test]
    fn unknown_duration_keeps_positive_timestamps() {
        let insights = parse_insights(RESPONSE, None).unwrap();
        assert_eq!(insights.key_insights[1].timestamp_seconds, Some(9000.0));
    }

    #[test]
    fn missing_keys_become_empty_collections() {
        let insights = parse_insights(r#"{"summary": "only a summary"}"#, None).unwrap();
        assert!(insights.key_insights.is_empty());
        assert!(insights.quotes.is_empty());
        assert!(insights.topics.is_empty());
    }

    #[test]
    fn mistyped_array_coerces_to_empty() {
        let insights =
            parse_insights(r#"{"summary": "s", "topics": {"oops": "a map"}}"#, None).unwrap();
        assert!(insights.topics.is_empty());
    }

    #[test]
    fn unparseable_response_is_an_error() {
        let err = parse_insights("I could not produce JSON today.", None).unwrap_err();
        assert!(matches!(err, LecternError::LlmParse(_)));
    }

    #[test]
    fn earnings_sections_always_present() {
        let insights = parse_earnings_insights(
            r#"{"summary": "Q3", "key_metrics": {"revenue": "$1B"}, "risks_concerns": "oops"}"#,
            None,
        )
        .unwrap();

        for key in EARNINGS_SECTIONS {
            let value = insights.sections.get(key).unwrap();
            assert!(
                value.is_object() || value.is_array(),
                "{} should be object or array",
                key
            );
        }
        assert_eq!(insights.sections["key_metrics"]["revenue"], "$1B");
        // Mistyped string section coerced to empty list.
        assert!(insights.sections["risks_concerns"].as_array().unwrap().is_empty());
    }

    #[test]
    fn earnings_notable_quotes_feed_quotes_list() {
        let insights = parse_earnings_insights(
            r#"{"notable_quotes": [{"quote": "Margins expanded", "speaker": "CFO"}]}"#,
            None,
        )
        .unwrap();
        assert_eq!(insights.quotes.len(), 1);
        assert_eq!(insights.quotes[0].speaker.as_deref(), Some("CFO"));
    }

    #[test]
    fn strip_code_fence_variants() {
        assert_eq!(strip_code_fence("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("{}"), "{}");
    }
}
