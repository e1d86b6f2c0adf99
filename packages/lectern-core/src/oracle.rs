//! External model oracles: chat completion, speech-to-text, embeddings.
//!
//! Services depend on the trait seams here rather than the vendor SDK,
//! so the pipeline is testable with scripted doubles and the vendor can
//! be swapped without touching call sites.

use std::path::Path;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    AudioResponseFormat, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    CreateEmbeddingRequestArgs, CreateTranscriptionRequestArgs, TimestampGranularity,
};
use async_openai::Client;

use crate::config::EMBEDDING_DIMENSIONS;
use crate::error::{LecternError, LecternResult};
use crate::transcript::{TimedWord, TranscriptSegment};

/// Chat model used for insight generation.
const CHAT_MODEL: &str = "gpt-4o";
/// Token ceiling for a single analysis response.
const CHAT_MAX_TOKENS: u32 = 8000;
/// Speech-to-text model.
const STT_MODEL: &str = "whisper-1";
/// Embedding model; reduced to [`EMBEDDING_DIMENSIONS`] dimensions.
const EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Request/response oracle for structured analysis.
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    /// Sends one prompt and returns the raw completion text.
    async fn complete(&self, system: Option<&str>, prompt: &str) -> LecternResult<String>;
}

/// Audio-to-word-stream oracle.
#[async_trait::async_trait]
pub trait SpeechOracle: Send + Sync {
    /// Transcribes an audio file into word-level timings.
    async fn transcribe_words(&self, audio: &Path) -> LecternResult<Vec<TimedWord>>;

    /// Transcribes an audio file into sentence-level segments.
    async fn transcribe_segments(&self, audio: &Path) -> LecternResult<Vec<TranscriptSegment>>;
}

/// Text embedding oracle.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds text into a fixed-dimension vector.
    async fn embed(&self, text: &str) -> LecternResult<Vec<f32>>;
}

fn map_openai_error(err: async_openai::error::OpenAIError) -> LecternError {
    use async_openai::error::OpenAIError;
    match &err {
        OpenAIError::ApiError(api) => {
            let code = api.code.as_deref().unwrap_or("");
            if code.contains("rate_limit") || api.message.to_lowercase().contains("rate limit") {
                LecternError::RateLimited(api.message.clone())
            } else {
                LecternError::Network(api.message.clone())
            }
        }
        OpenAIError::Reqwest(e) => LecternError::Network(e.to_string()),
        OpenAIError::JSONDeserialize(e) => LecternError::LlmParse(e.to_string()),
        other => LecternError::Internal(other.to_string()),
    }
}

/// Oracle implementation backed by the OpenAI-compatible API.
pub struct OpenAiOracle {
    client: Client<OpenAIConfig>,
    stt_client: Client<OpenAIConfig>,
}

impl OpenAiOracle {
    /// Builds oracle clients. The chat/embedding client and the STT
    /// client carry separate API keys since the deployments may differ.
    pub fn new(llm_api_key: &str, stt_api_key: &str, llm_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(llm_timeout)
            .build()
            .unwrap_or_default();
        let client = Client::build(
            http.clone(),
            OpenAIConfig::new().with_api_key(llm_api_key),
            Default::default(),
        );
        let stt_client = Client::build(
            http,
            OpenAIConfig::new().with_api_key(stt_api_key),
            Default::default(),
        );
        Self { client, stt_client }
    }
}

#[async_trait::async_trait]
impl ChatModel for OpenAiOracle {
    async fn complete(&self, system: Option<&str>, prompt: &str) -> LecternResult<String> {
        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()
                    .map_err(map_openai_error)?
                    .into(),
            );
        }
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(map_openai_error)?
                .into(),
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(CHAT_MODEL)
            .max_tokens(CHAT_MAX_TOKENS)
            .messages(messages)
            .build()
            .map_err(map_openai_error)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LecternError::LlmParse("empty completion".to_string()))
    }
}

#[async_trait::async_trait]
impl SpeechOracle for OpenAiOracle {
    async fn transcribe_words(&self, audio: &Path) -> LecternResult<Vec<TimedWord>> {
        let request = CreateTranscriptionRequestArgs::default()
            .file(audio.to_path_buf())
            .model(STT_MODEL)
            .response_format(AudioResponseFormat::VerboseJson)
            .timestamp_granularities(vec![TimestampGranularity::Word])
            .build()
            .map_err(map_openai_error)?;

        let response = self
            .stt_client
            .audio()
            .transcribe_verbose_json(request)
            .await
            .map_err(map_openai_error)?;

        let words = response
            .words
            .unwrap_or_default()
            .into_iter()
            .map(|w| TimedWord {
                word: w.word,
                start: w.start as f64,
                end: w.end as f64,
            })
            .collect();
        Ok(words)
    }

    async fn transcribe_segments(&self, audio: &Path) -> LecternResult<Vec<TranscriptSegment>> {
        let request = CreateTranscriptionRequestArgs::default()
            .file(audio.to_path_buf())
            .model(STT_MODEL)
            .response_format(AudioResponseFormat::VerboseJson)
            .timestamp_granularities(vec![TimestampGranularity::Segment])
            .build()
            .map_err(map_openai_error)?;

        let response = self
            .stt_client
            .audio()
            .transcribe_verbose_json(request)
            .await
            .map_err(map_openai_error)?;

        let segments = response
            .segments
            .unwrap_or_default()
            .into_iter()
            .filter_map(|s| {
                let text = s.text.trim().to_string();
                if text.is_empty() {
                    return None;
                }
                Some(TranscriptSegment {
                    start_seconds: s.start as f64,
                    duration: Some((s.end - s.start).max(0.0) as f64),
                    text,
                    speaker: None,
                })
            })
            .collect();
        Ok(segments)
    }
}

#[async_trait::async_trait]
impl Embedder for OpenAiOracle {
    async fn embed(&self, text: &str) -> LecternResult<Vec<f32>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(EMBEDDING_MODEL)
            .dimensions(EMBEDDING_DIMENSIONS)
            .input(text)
            .build()
            .map_err(map_openai_error)?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LecternError::Internal("empty embedding response".to_string()))?;

        if embedding.len() != EMBEDDING_DIMENSIONS as usize {
            return Err(LecternError::Internal(format!(
                "embedding dimension mismatch: got {}",
                embedding.len()
            )));
        }
        Ok(embedding)
    }
}
