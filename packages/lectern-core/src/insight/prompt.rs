//! Analysis prompt assembly.
//!
//! Prompts are built from a tagged media context so each media shape
//! gets its own instructions: timestamp extraction only when a
//! transcript actually exists, and an explicit prohibition when it
//! does not.

use serde_json::Value;

use crate::config::MAX_TRANSCRIPT_CHARS;
use crate::util::truncate_with_ellipsis;

/// Media-specific prompt context. One constructor per content shape.
#[derive(Debug, Clone)]
pub enum PromptContext {
    /// Page with an embedded or platform video.
    Video {
        transcript: Option<String>,
        video_urls: Vec<String>,
        article_text: String,
    },
    /// Page with embedded or direct audio.
    Audio {
        transcript: Option<String>,
        audio_platform: String,
        article_text: String,
    },
    /// Text-only article.
    Text { article_text: String },
    /// Earnings-call page with a publisher transcript.
    Earnings {
        transcript: Option<String>,
        article_text: String,
    },
}

impl PromptContext {
    /// Whether a usable transcript is present.
    pub fn has_transcript(&self) -> bool {
        match self {
            Self::Video { transcript, .. }
            | Self::Audio { transcript, .. }
            | Self::Earnings { transcript, .. } => {
                transcript.as_deref().is_some_and(|t| !t.trim().is_empty())
            }
            Self::Text { .. } => false,
        }
    }
}

/// Builds the full analysis prompt for a URL.
pub fn build_analysis_prompt(url: &str, metadata: &Value, context: &PromptContext) -> String {
    let media_context = build_media_context(context);

    format!(
        r#"Analyze this article: {url}

Create a comprehensive summary with the following structure:
1. Write a clear, structured summary (2-4 paragraphs) in HTML format as paragraphs (NOT bullets)
2. Extract 8-12 key insights combining main points, insights, and actionable takeaways
3. If video/audio content exists, identify specific timestamps with detailed descriptions

{media_context}

Article metadata: {metadata}

Return your response in this JSON format:
{{
    "summary": "HTML formatted summary in paragraph form (2-4 paragraphs, NOT bullets). Use <p> tags for paragraphs.",
    "key_insights": [
        {{"insight": "Key insight, main point, or actionable takeaway", "timestamp_seconds": 300, "time_formatted": "5:00"}},
        {{"insight": "Another insight without timestamp", "timestamp_seconds": null, "time_formatted": null}}
    ],
    "quotes": [
        {{"quote": "Exact quote text", "speaker": "Speaker name", "timestamp_seconds": 120, "time_formatted": "2:00", "context": "Context for the quote"}}
    ],
    "duration_minutes": 45,
    "word_count": 5000,
    "topics": ["AI", "Product", "Engineering"]
}}

CRITICAL TIMESTAMP RULES:
- Each timestamp section should cover AT LEAST 30 SECONDS of continuous content
- Group related ideas that span 30-60 seconds into a single timestamp entry with a comprehensive description
- Use null for timestamp_seconds and time_formatted if you cannot find the EXACT content in the provided transcript
- NEVER guess or estimate timestamps - if you can't find it in the transcript, use null
- For quotes: search the transcript for the exact quote text and use that timestamp
- Only include timestamps for content you can find in the provided transcript
- If the transcript is truncated, only use timestamps from the visible portion"#,
        url = url,
        media_context = media_context,
        metadata = serde_json::to_string_pretty(metadata).unwrap_or_default(),
    )
}

fn build_media_context(context: &PromptContext) -> String {
    match context {
        PromptContext::Video {
            transcript,
            video_urls,
            article_text,
        } => match bounded_transcript(transcript) {
            Some(transcript) => format!(
                "IMPORTANT: This article contains video content. Video URLs found: {urls:?}\n\
                 Focus on extracting video timestamps in MM:SS format (e.g., \"5:23\", \"1:02:30\"),\n\
                 aiming for 5-8 key timestamps that represent the most valuable content.\n\n\
                 VIDEO TRANSCRIPT:\n{transcript}\n\n\
                 ARTICLE TEXT CONTENT:\n{text}\n\n\
                 Analyze both the article text and the video transcript.",
                urls = video_urls,
                transcript = transcript,
                text = article_text,
            ),
            None => format!(
                "IMPORTANT: This article contains video content but no transcript is available.\n\
                 DO NOT include any timestamps or time-based references in your response.\n\
                 Base your analysis only on the article text, not on video content.\n\n\
                 ARTICLE TEXT CONTENT:\n{}",
                article_text
            ),
        },
        PromptContext::Audio {
            transcript,
            audio_platform,
            article_text,
        } => match bounded_transcript(transcript) {
            Some(transcript) => format!(
                "IMPORTANT: This article contains audio/podcast content (platform: {platform}).\n\
                 Focus on extracting audio timestamps in MM:SS format, aiming for 5-8 key\n\
                 timestamps that represent the most valuable discussions.\n\n\
                 AUDIO TRANSCRIPT:\n{transcript}\n\n\
                 ARTICLE TEXT CONTENT:\n{text}\n\n\
                 Analyze both the article text and the audio transcript.",
                platform = audio_platform,
                transcript = transcript,
                text = article_text,
            ),
            None => format!(
                "IMPORTANT: This article contains audio/podcast content (platform: {platform})\n\
                 but no transcript is available.\n\
                 DO NOT include any timestamps or time-based references in your response.\n\
                 Note the participants/speakers if mentioned in the content.\n\n\
                 ARTICLE TEXT CONTENT:\n{text}",
                platform = audio_platform,
                text = article_text,
            ),
        },
        PromptContext::Text { article_text } => format!(
            "IMPORTANT: This is a TEXT-ONLY article with no video or audio content.\n\
             Focus on extracting key insights, main themes and arguments, actionable\n\
             takeaways, and important quotes or data points from the written content.\n\
             NO timestamps should be included (since there is no media).\n\n\
             Article text content: {}",
            article_text
        ),
        PromptContext::Earnings { .. } => build_earnings_context(context),
    }
}

fn bounded_transcript(transcript: &Option<String>) -> Option<String> {
    transcript
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .map(|t| truncate_with_ellipsis(t, MAX_TRANSCRIPT_CHARS))
}

/// Builds the earnings-call analysis prompt. The response schema is
/// stricter than the general one: every section must be present.
pub fn build_earnings_prompt(url: &str, context: &PromptContext) -> String {
    format!(
        "Analyze this earnings call: {url}\n\n{context}\n\n\
         Return your response in this JSON format:\n\
         {{\n\
           \"summary\": \"2-3 paragraph overview of the quarter\",\n\
           \"key_metrics\": {{\"revenue\": \"...\", \"margins\": \"...\", \"cash_flow\": \"...\"}},\n\
           \"business_highlights\": [\"Non-financial updates: products, markets, deals\"],\n\
           \"guidance\": {{\"next_quarter\": \"...\", \"full_year\": \"...\"}},\n\
           \"risks_concerns\": [{{\"risk\": \"...\", \"context\": \"management remark or analyst question\"}}],\n\
           \"positives\": [\"...\"],\n\
           \"notable_quotes\": [{{\"quote\": \"...\", \"speaker\": \"...\", \"timestamp_seconds\": null}}],\n\
           \"topics\": [\"...\"]\n\
         }}\n\n\
         RULES:\n\
         - key_metrics = FINANCIAL metrics only (revenue, margins, cash flow)\n\
         - business_highlights = NON-FINANCIAL updates (products, markets, deals)\n\
         - For risks_concerns use the context field to distinguish management remarks from analyst questions\n\
         - Only include timestamps locatable in the provided transcript; otherwise use null",
        url = url,
        context = build_earnings_context(context),
    )
}

fn build_earnings_context(context: &PromptContext) -> String {
    let PromptContext::Earnings {
        transcript,
        article_text,
    } = context
    else {
        return String::new();
    };
    match bounded_transcript(transcript) {
        Some(transcript) => format!(
            "This is an earnings-call page. A speaker-labelled transcript with timestamps follows.\n\n\
             CALL TRANSCRIPT:\n{transcript}\n\n\
             PAGE CONTENT:\n{text}",
            transcript = transcript,
            text = article_text,
        ),
        None => format!(
            "This is an earnings-call page. No transcript is available;\n\
             DO NOT include timestamps.\n\nPAGE CONTENT:\n{}",
            article_text
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn video_prompt_with_transcript_demands_locatable_timestamps() {
        let ctx = PromptContext::Video {
            transcript: Some("[00:00] hello world".to_string()),
            video_urls: vec!["https://youtube.com/watch?v=x".to_string()],
            article_text: "text".to_string(),
        };
        let prompt = build_analysis_prompt("https://example.com", &json!({}), &ctx);
        assert!(prompt.contains("VIDEO TRANSCRIPT"));
        assert!(prompt.contains("AT LEAST 30 SECONDS"));
        assert!(ctx.has_transcript());
    }

    #[test]
    fn video_prompt_without_transcript_forbids_timestamps() {
        let ctx = PromptContext::Video {
            transcript: None,
            video_urls: vec![],
            article_text: "text".to_string(),
        };
        let prompt = build_analysis_prompt("https://example.com", &json!({}), &ctx);
        assert!(prompt.contains("DO NOT include any timestamps"));
        assert!(!ctx.has_transcript());
    }

    #[test]
    fn text_prompt_mentions_no_media() {
        let ctx = PromptContext::Text {
            article_text: "just words".to_string(),
        };
        let prompt = build_analysis_prompt("https://example.com", &json!({}), &ctx);
        assert!(prompt.contains("TEXT-ONLY"));
    }

    #[test]
    fn transcript_is_truncated_with_ellipsis() {
        let long = "x".repeat(MAX_TRANSCRIPT_CHARS + 100);
        let ctx = PromptContext::Audio {
            transcript: Some(long),
            audio_platform: "spotify".to_string(),
            article_text: String::new(),
        };
        let prompt = build_analysis_prompt("https://example.com", &json!({}), &ctx);
        assert!(prompt.contains("..."));
        // The embedded transcript must not exceed the budget (plus ellipsis).
        assert!(prompt.len() < MAX_TRANSCRIPT_CHARS + 5000);
    }

    #[test]
    fn earnings_prompt_lists_required_sections() {
        let ctx = PromptContext::Earnings {
            transcript: Some("[00:00] Operator: welcome".to_string()),
            article_text: String::new(),
        };
        let prompt = build_earnings_prompt("https://seekingalpha.com/call", &ctx);
        for key in [
            "key_metrics",
            "business_highlights",
            "guidance",
            "risks_concerns",
            "positives",
            "notable_quotes",
        ] {
            assert!(prompt.contains(key), "missing {}", key);
        }
    }
}
