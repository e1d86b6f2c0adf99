//! Service bootstrap.
//!
//! Builds the full production object graph from a [`Config`]: stores,
//! oracles, fetchers, the pipeline, discovery workers, and cleanup.
//! Background tasks run on the shared runtime and stop on shutdown.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{AppState, AuthServiceVerifier};
use crate::cleanup::CleanupWorker;
use crate::config::Config;
use crate::discovery::{FeedDiscovery, FeedPuller, ListeningHistoryPuller};
use crate::error::{LecternError, LecternResult};
use crate::extract::media::{MediaExtractor, YtDlpDownloader};
use crate::fetch::{BrowserServiceClient, ContentFetcher, SessionManager};
use crate::frames::{DisabledPersonDetector, FrameSampler};
use crate::insight::InsightGenerator;
use crate::oracle::OpenAiOracle;
use crate::pipeline::Pipeline;
use crate::store::objects::BucketStorage;
use crate::store::postgres::PostgresStore;
use crate::transcript::{TranscriptAcquirer, YoutubeTimedText};

/// Everything a server binary needs to run.
pub struct BootstrappedServices {
    pub app_state: AppState,
    pub pipeline: Arc<Pipeline>,
    pub cleanup: Arc<CleanupWorker>,
    pub config: Arc<Config>,
    shutdown: CancellationToken,
}

/// Builds the production object graph.
pub async fn bootstrap_services(config: Config) -> LecternResult<BootstrappedServices> {
    if config.database_url.is_empty() {
        return Err(LecternError::Configuration(
            "DATABASE_URL is required".to_string(),
        ));
    }

    let config = Arc::new(config);
    let store = Arc::new(PostgresStore::connect(&config.database_url).await?);
    let storage = Arc::new(BucketStorage::new(
        &config.storage_url,
        &config.service_role_key,
        config.http_timeout,
    )?);

    let oracle = Arc::new(OpenAiOracle::new(
        &config.llm_api_key,
        &config.stt_api_key,
        config.llm_timeout,
    ));

    let sessions = SessionManager::new(store.clone());
    let renderer = Arc::new(BrowserServiceClient::new(
        &config.browser_service_url,
        &config.user_agent,
        config.browser_timeout,
    )?);
    let fetcher = Arc::new(ContentFetcher::new(
        renderer,
        sessions.clone(),
        &config.user_agent,
        config.http_timeout,
        config.browser_fetch_domains.clone(),
    )?);

    let media = Arc::new(MediaExtractor::new(
        Arc::new(YtDlpDownloader),
        &config.user_agent,
    )?);
    let captions = Arc::new(YoutubeTimedText::new(config.http_timeout)?);
    let transcripts = Arc::new(TranscriptAcquirer::new(captions, oracle.clone()));
    let insights = Arc::new(InsightGenerator::new(oracle.clone()));
    let frames = Arc::new(FrameSampler::new(Arc::new(DisabledPersonDetector)));

    let pipeline = Arc::new(Pipeline {
        articles: store.clone(),
        queue: store.clone(),
        channels: store.clone(),
        storage: storage.clone(),
        fetcher,
        media,
        transcripts,
        insights,
        embedder: oracle,
        frames,
        media_retention_days: config.media_retention_days,
    });

    let feed_puller = Arc::new(FeedPuller::new(
        store.clone(),
        store.clone(),
        &config.user_agent,
        config.http_timeout,
        config.rss_post_recency_days,
    )?);
    let listening_puller = Arc::new(ListeningHistoryPuller::new(
        store.clone(),
        store.clone(),
        &config.listening_history_url,
        &config.listening_history_email,
        &config.listening_history_password,
        &config.search_url,
        &config.user_agent,
        config.http_timeout,
    )?);
    let feed_discovery = Arc::new(FeedDiscovery::new(&config.user_agent, config.http_timeout)?);
    let verifier = Arc::new(AuthServiceVerifier::new(
        &config.auth_url,
        &config.service_role_key,
        config.http_timeout,
    )?);
    let cleanup = Arc::new(CleanupWorker::new(
        store.clone(),
        storage.clone(),
        config.media_retention_days,
    ));

    let app_state = AppState {
        pipeline: pipeline.clone(),
        sources: store.clone(),
        queue: store,
        storage,
        verifier,
        sessions,
        feed_puller,
        listening_puller,
        feed_discovery,
        config: config.clone(),
    };

    Ok(BootstrappedServices {
        app_state,
        pipeline,
        cleanup,
        config,
        shutdown: CancellationToken::new(),
    })
}

impl BootstrappedServices {
    /// Starts the periodic workers: discovery sweeps and media cleanup.
    pub fn start_background_tasks(&self) {
        let feed_puller = self.app_state.feed_puller.clone();
        let listening_puller = self.app_state.listening_puller.clone();
        let cleanup = self.cleanup.clone();
        let discovery_interval = self.config.discovery_interval;
        let cleanup_interval = self.config.cleanup_interval;
        let shutdown = self.shutdown.clone();

        let discovery_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(discovery_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        feed_puller.run_sweep().await;
                        listening_puller.run_sweep().await;
                    }
                    _ = discovery_shutdown.cancelled() => break,
                }
            }
            log::info!("[Bootstrap] Discovery worker stopped");
        });

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cleanup.run_once().await;
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
            log::info!("[Bootstrap] Cleanup worker stopped");
        });

        log::info!("[Bootstrap] Background tasks started");
    }

    /// Signals the background tasks to stop.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
