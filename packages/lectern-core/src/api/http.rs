//! HTTP route handlers.
//!
//! All handlers are thin - they authenticate, validate, and delegate to
//! services. Streaming endpoints accept the bearer token as a query
//! parameter because EventSource clients cannot attach headers.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{LecternError, LecternResult};
use crate::events::ProgressBus;
use crate::extract::media::upload_user_media;
use crate::pipeline::{PipelineRequest, ReprocessRequest, ReprocessStep};
use crate::store::{
    QueueContentType, QueueStatus, SourceKind, SourcePatch, UserRef,
};

use super::sse::sse_response;
use super::{AppState, AuthenticatedUser};

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = if state.config.cors_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = state
            .config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/process", get(process_url))
        .route("/reprocess", post(reprocess))
        .route("/reprocess/info", get(reprocess_info))
        .route("/reprocess/list", get(reprocess_list))
        .route("/upload-media", post(upload_media))
        .route("/sources", get(list_sources).post(create_source))
        .route(
            "/sources/{id}",
            axum::routing::patch(update_source).delete(delete_source),
        )
        .route("/sources/discover", post(discover_source))
        .route("/podcasts/check", post(check_podcasts))
        .route("/posts/check", post(check_posts))
        .route("/podcasts/discovered", get(discovered_podcasts))
        .route("/posts/discovered", get(discovered_posts))
        .route("/queue/{id}/status", post(update_queue_status))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth helpers
// ─────────────────────────────────────────────────────────────────────────────

fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Verifies the token from a query parameter or the Authorization
/// header. SSE endpoints rely on the query parameter.
async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> LecternResult<AuthenticatedUser> {
    let token = query_token
        .map(str::to_string)
        .or_else(|| bearer_from_headers(headers))
        .ok_or_else(|| LecternError::Unauthorized("missing authentication token".to_string()))?;
    state.verifier.verify(&token).await
}

async fn not_found(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "not_found",
            "message": "Unknown route",
            "path": uri.path(),
        })),
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let session_configured = state.sessions.is_configured().await;
    Json(json!({
        "status": "ok",
        "session_configured": session_configured,
        "session_source": if session_configured { "database" } else { "none" },
        "environment": state.config.environment,
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Ingestion
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ProcessParams {
    url: String,
    token: Option<String>,
    #[serde(default)]
    force_reprocess: bool,
    #[serde(default)]
    demo_video: bool,
}

/// GET /process - run the full ingestion pipeline, streaming progress
/// as server-sent events.
async fn process_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ProcessParams>,
) -> Result<Response, LecternError> {
    let user = authenticate(&state, &headers, params.token.as_deref()).await?;
    let job_id = uuid::Uuid::new_v4();
    log::info!(
        "[Api] Job {}: processing {} for user {} (force={}, demo={})",
        job_id,
        params.url,
        user.user_id,
        params.force_reprocess,
        params.demo_video
    );

    let (tx, rx) = ProgressBus::channel();
    tx.set_sink(std::sync::Arc::new(crate::events::LoggingProgressSink));
    let cancel = CancellationToken::new();

    let request = PipelineRequest {
        url: params.url,
        user: Some(UserRef {
            user_id: user.user_id,
            organization_id: None,
        }),
        force_reprocess: params.force_reprocess,
        demo_video: params.demo_video,
    };

    let pipeline = state.pipeline.clone();
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        pipeline.run(request, tx, task_cancel).await;
        log::info!("[Api] Job {} finished", job_id);
    });

    Ok(sse_response(rx, cancel))
}

// ─────────────────────────────────────────────────────────────────────────────
// Reprocess
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TokenParam {
    token: Option<String>,
}

#[derive(Deserialize)]
struct ReprocessBody {
    article_id: i64,
    #[serde(default)]
    is_private: bool,
    steps: Vec<String>,
}

/// POST /reprocess - partial re-execution with SSE progress.
async fn reprocess(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TokenParam>,
    Json(body): Json<ReprocessBody>,
) -> Result<Response, LecternError> {
    let user = authenticate(&state, &headers, params.token.as_deref()).await?;

    if body.steps.is_empty() {
        return Err(LecternError::InvalidRequest(
            "at least one step must be specified".to_string(),
        ));
    }
    let mut steps = Vec::with_capacity(body.steps.len());
    for raw in &body.steps {
        let step = ReprocessStep::parse(raw).ok_or_else(|| {
            LecternError::InvalidRequest(format!("invalid step: {}", raw))
        })?;
        steps.push(step);
    }

    log::info!(
        "[Api] Reprocessing article {} (private={}, steps={:?}, user={})",
        body.article_id,
        body.is_private,
        body.steps,
        user.user_id
    );

    let request = ReprocessRequest {
        article_id: body.article_id,
        is_private: body.is_private,
        steps,
        user: UserRef {
            user_id: user.user_id,
            organization_id: None,
        },
    };

    let (tx, rx) = ProgressBus::channel();
    tx.set_sink(std::sync::Arc::new(crate::events::LoggingProgressSink));
    let cancel = CancellationToken::new();
    let pipeline = state.pipeline.clone();
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        pipeline.reprocess(request, tx, task_cancel).await;
    });

    Ok(sse_response(rx, cancel))
}

#[derive(Deserialize)]
struct ReprocessInfoParams {
    article_id: i64,
    #[serde(default)]
    is_private: bool,
    token: Option<String>,
}

/// GET /reprocess/info - which operations a row currently supports.
async fn reprocess_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ReprocessInfoParams>,
) -> Result<Response, LecternError> {
    authenticate(&state, &headers, params.token.as_deref()).await?;
    let info = state
        .pipeline
        .reprocess_info(params.article_id, params.is_private)
        .await?;
    Ok(Json(info).into_response())
}

#[derive(Deserialize)]
struct ReprocessListParams {
    #[serde(default)]
    is_private: bool,
    search: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    token: Option<String>,
}

/// GET /reprocess/list - paginated listing for the reprocess UI.
async fn reprocess_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ReprocessListParams>,
) -> Result<Response, LecternError> {
    let user = authenticate(&state, &headers, params.token.as_deref()).await?;
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let offset = params.offset.unwrap_or(0).max(0);

    let organization_id = if params.is_private {
        state.pipeline.articles.organization_of(&user.user_id).await?
    } else {
        None
    };

    let (articles, total) = state
        .pipeline
        .articles
        .list_for_reprocess(
            params.is_private,
            organization_id.as_deref(),
            params.search.as_deref(),
            limit,
            offset,
        )
        .await?;

    Ok(Json(json!({
        "articles": articles,
        "total": total,
        "limit": limit,
        "offset": offset,
    }))
    .into_response())
}

// ─────────────────────────────────────────────────────────────────────────────
// Upload
// ─────────────────────────────────────────────────────────────────────────────

/// POST /upload-media - multipart upload into the permanent bucket.
async fn upload_media(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, LecternError> {
    let user = authenticate(&state, &headers, None).await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| LecternError::InvalidRequest(format!("multipart: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| LecternError::InvalidRequest("no filename provided".to_string()))?;
        let content = field
            .bytes()
            .await
            .map_err(|e| LecternError::InvalidRequest(format!("upload read: {}", e)))?;
        let size_mb = content.len() as f64 / 1024.0 / 1024.0;

        let (url, storage_path, media_type) =
            upload_user_media(state.storage.as_ref(), &user.user_id, &filename, content).await?;

        log::info!(
            "[Api] Uploaded {:.2} MB for user {}: {}",
            size_mb,
            user.user_id,
            storage_path
        );
        return Ok(Json(json!({
            "url": url,
            "storage_path": storage_path,
            "media_type": media_type,
            "filename": filename,
            "size_mb": (size_mb * 100.0).round() / 100.0,
        }))
        .into_response());
    }

    Err(LecternError::InvalidRequest(
        "multipart field 'file' missing".to_string(),
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Content sources
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateSourceBody {
    title: String,
    url: String,
    source_type: SourceKind,
}

async fn list_sources(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, LecternError> {
    let user = authenticate(&state, &headers, None).await?;
    let sources = state.sources.list_for_user(&user.user_id).await?;
    Ok(Json(json!({ "sources": sources })).into_response())
}

async fn create_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateSourceBody>,
) -> Result<Response, LecternError> {
    let user = authenticate(&state, &headers, None).await?;
    let source = state
        .sources
        .create(&user.user_id, &body.title, &body.url, body.source_type)
        .await?;
    Ok((StatusCode::CREATED, Json(source)).into_response())
}

async fn update_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(patch): Json<SourcePatch>,
) -> Result<Response, LecternError> {
    let user = authenticate(&state, &headers, None).await?;
    match state.sources.update(id, &user.user_id, &patch).await? {
        Some(source) => Ok(Json(source).into_response()),
        None => Err(LecternError::InvalidRequest(format!(
            "source {} not found",
            id
        ))),
    }
}

async fn delete_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Response, LecternError> {
    let user = authenticate(&state, &headers, None).await?;
    if state.sources.delete(id, &user.user_id).await? {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Err(LecternError::InvalidRequest(format!(
            "source {} not found",
            id
        )))
    }
}

#[derive(Deserialize)]
struct DiscoverBody {
    url: String,
}

/// POST /sources/discover - feed auto-discovery with a preview.
async fn discover_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DiscoverBody>,
) -> Result<Response, LecternError> {
    authenticate(&state, &headers, None).await?;
    let discovered = state.feed_discovery.discover(&body.url).await?;
    Ok(Json(discovered).into_response())
}

// ─────────────────────────────────────────────────────────────────────────────
// Discovery control and queue readout
// ─────────────────────────────────────────────────────────────────────────────

async fn check_podcasts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, LecternError> {
    authenticate(&state, &headers, None).await?;
    let report = state.listening_puller.run_sweep().await;
    Ok(Json(report).into_response())
}

async fn check_posts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, LecternError> {
    authenticate(&state, &headers, None).await?;
    let report = state.feed_puller.run_sweep().await;
    Ok(Json(report).into_response())
}

#[derive(Deserialize)]
struct DiscoveredParams {
    status: Option<String>,
    limit: Option<i64>,
}

async fn discovered_podcasts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<DiscoveredParams>,
) -> Result<Response, LecternError> {
    authenticate(&state, &headers, None).await?;
    let items = state
        .queue
        .list(
            Some(QueueContentType::PodcastEpisode),
            params.status.as_deref().map(QueueStatus::parse),
            params.limit.unwrap_or(100).clamp(1, 500),
        )
        .await?;
    Ok(Json(json!({ "episodes": items })).into_response())
}

async fn discovered_posts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<DiscoveredParams>,
) -> Result<Response, LecternError> {
    authenticate(&state, &headers, None).await?;
    let items = state
        .queue
        .list(
            Some(QueueContentType::Article),
            params.status.as_deref().map(QueueStatus::parse),
            params.limit.unwrap_or(100).clamp(1, 500),
        )
        .await?;
    Ok(Json(json!({ "posts": items })).into_response())
}

#[derive(Deserialize)]
struct QueueStatusBody {
    status: QueueStatus,
}

/// POST /queue/{id}/status - client-driven queue row transitions.
async fn update_queue_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<QueueStatusBody>,
) -> Result<Response, LecternError> {
    authenticate(&state, &headers, None).await?;
    state.queue.update_status(id, body.status).await?;
    Ok(Json(json!({ "id": id, "status": body.status })).into_response())
}
