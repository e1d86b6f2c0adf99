//! Insight generation.
//!
//! Assembles a media-type-specific prompt, invokes the chat oracle,
//! and validates the structured response.

pub mod parse;
pub mod prompt;

use std::sync::Arc;

use serde_json::Value;

use crate::error::LecternResult;
use crate::oracle::ChatModel;
use crate::retry::with_retry;

pub use parse::{parse_earnings_insights, parse_insights, Insights, KeyInsight, Quote};
pub use prompt::{build_analysis_prompt, build_earnings_prompt, PromptContext};

/// System message framing every analysis request.
const SYSTEM_MESSAGE: &str = "You are a careful analyst. You return only the requested JSON, \
     never commentary, and you never invent timestamps that are not \
     verifiable in the provided transcript.";

/// Generates validated insight payloads from content.
pub struct InsightGenerator {
    model: Arc<dyn ChatModel>,
}

impl InsightGenerator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Runs analysis for a URL. `duration_seconds` bounds timestamp
    /// validation when known.
    pub async fn generate(
        &self,
        url: &str,
        metadata: &Value,
        context: &PromptContext,
        duration_seconds: Option<f64>,
    ) -> LecternResult<Insights> {
        let is_earnings = matches!(context, PromptContext::Earnings { .. });
        let prompt = if is_earnings {
            build_earnings_prompt(url, context)
        } else {
            build_analysis_prompt(url, metadata, context)
        };

        log::info!(
            "[Insight] Requesting analysis for {} ({} prompt chars)",
            url,
            prompt.len()
        );

        let raw = with_retry("insight generation", || {
            self.model.complete(Some(SYSTEM_MESSAGE), &prompt)
        })
        .await?;

        let insights = if is_earnings {
            parse_earnings_insights(&raw, duration_seconds)?
        } else {
            parse_insights(&raw, duration_seconds)?
        };

        log::info!(
            "[Insight] Parsed {} insights, {} quotes, {} topics",
            insights.key_insights.len(),
            insights.quotes.len(),
            insights.topics.len()
        );
        Ok(insights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LecternError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedModel {
        responses: Vec<LecternResult<String>>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, _system: Option<&str>, _prompt: &str) -> LecternResult<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.get(n) {
                Some(Ok(s)) => Ok(s.clone()),
                Some(Err(e)) => Err(LecternError::Internal(e.to_string())),
                None => Ok("{}".to_string()),
            }
        }
    }

    #[tokio::test]
    async fn generates_and_parses_video_analysis() {
        let model = Arc::new(ScriptedModel {
            responses: vec![Ok(r#"{"summary": "<p>ok</p>", "topics": ["AI"]}"#.to_string())],
            calls: AtomicUsize::new(0),
        });
        let generator = InsightGenerator::new(model);
        let ctx = PromptContext::Video {
            transcript: Some("[00:00] hi".into()),
            video_urls: vec![],
            article_text: "text".into(),
        };

        let insights = generator
            .generate("https://example.com", &json!({}), &ctx, Some(100.0))
            .await
            .unwrap();
        assert_eq!(insights.topics, vec!["AI"]);
    }

    #[tokio::test]
    async fn earnings_context_uses_earnings_parser() {
        let model = Arc::new(ScriptedModel {
            responses: vec![Ok(r#"{"summary": "Q3"}"#.to_string())],
            calls: AtomicUsize::new(0),
        });
        let generator = InsightGenerator::new(model);
        let ctx = PromptContext::Earnings {
            transcript: None,
            article_text: "call page".into(),
        };

        let insights = generator
            .generate("https://seekingalpha.com/x", &json!({}), &ctx, None)
            .await
            .unwrap();
        assert!(insights.sections.contains_key("key_metrics"));
        assert!(insights.sections.contains_key("guidance"));
    }
}
