//! Lectern Core - content ingestion, analysis and discovery.
//!
//! This crate provides the core functionality for Lectern, a service
//! that resolves URLs (articles, videos, podcasts, earnings calls) to a
//! canonical content form, acquires timestamped transcripts, generates
//! structured insights with an LLM, and persists the results to a
//! shared store - streaming live progress to clients over SSE along the
//! way.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`pipeline`]: the staged ingestion state machine and reprocessing
//! - [`events`]: the progress bus carrying pipeline events to clients
//! - [`classify`]: URL and content classification
//! - [`fetch`]: HTTP fetching with headless-browser escalation
//! - [`extract`]: readable-text extraction and media download
//! - [`transcript`]: transcript acquisition, alignment, formatting
//! - [`frames`]: demo-video frame sampling and filtering
//! - [`insight`]: prompt assembly and tolerant response parsing
//! - [`oracle`]: chat / speech-to-text / embedding model seams
//! - [`store`]: relational and object storage seams
//! - [`discovery`]: RSS and listening-history pull workers
//! - [`cleanup`]: retention cleanup for downloaded media
//! - [`api`]: the HTTP surface (routes, SSE transport, auth)
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! Core logic depends on trait seams rather than vendors:
//! [`fetch::PageFetcher`], [`fetch::PageRenderer`],
//! [`extract::media::MediaResolver`], [`oracle::ChatModel`],
//! [`oracle::SpeechOracle`], [`oracle::Embedder`],
//! [`transcript::CaptionProvider`], [`frames::PersonDetector`],
//! [`store::ArticleStore`] and friends, and
//! [`api::TokenVerifier`]. Each has a production implementation wired
//! by [`bootstrap`]; tests inject scripted doubles.

#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod classify;
pub mod cleanup;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod extract;
pub mod fetch;
pub mod frames;
pub mod insight;
pub mod oracle;
pub mod pipeline;
pub mod retry;
pub mod store;
pub mod transcript;
pub mod util;

// Re-export commonly used types at the crate root
pub use api::{start_server, AppState, AuthenticatedUser, TokenVerifier};
pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use classify::{classify_url, classify_with_body, Classification, ContentKind};
pub use config::Config;
pub use error::{LecternError, LecternResult};
pub use events::{ProgressBus, ProgressFrame, ProgressReceiver, ProgressSender};
pub use pipeline::{Pipeline, PipelineRequest, ReprocessRequest, ReprocessStep};
pub use transcript::{Transcript, TranscriptSegment, TranscriptSource};
pub use util::canonical_url;
