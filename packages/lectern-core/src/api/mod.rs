//! HTTP API layer.
//!
//! [`AppState`] bundles the services handlers need; [`http`] holds the
//! router and handlers; [`sse`] the event-stream transport; [`auth`]
//! the token-verification capability.

pub mod auth;
pub mod http;
pub mod sse;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use crate::discovery::{FeedDiscovery, FeedPuller, ListeningHistoryPuller};
use crate::error::{LecternError, LecternResult};
use crate::fetch::SessionManager;
use crate::pipeline::Pipeline;
use crate::store::objects::ObjectStorage;
use crate::store::{QueueStore, SourceStore};

pub use auth::{AuthServiceVerifier, AuthenticatedUser, StaticTokenVerifier, TokenVerifier};
pub use http::create_router;
pub use sse::sse_response;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub sources: Arc<dyn SourceStore>,
    pub queue: Arc<dyn QueueStore>,
    pub storage: Arc<dyn ObjectStorage>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub sessions: SessionManager,
    pub feed_puller: Arc<FeedPuller>,
    pub listening_puller: Arc<ListeningHistoryPuller>,
    pub feed_discovery: Arc<FeedDiscovery>,
    pub config: Arc<Config>,
}

/// Binds and serves the API until the task is aborted.
pub async fn start_server(state: AppState, addr: SocketAddr) -> LecternResult<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| LecternError::Configuration(format!("bind {}: {}", addr, e)))?;
    log::info!("[Api] Listening on {}", addr);

    axum::serve(listener, router)
        .await
        .map_err(|e| LecternError::Internal(format!("server: {}", e)))
}
