//! HTTP handlers for Video Service
//!
//! Identity arrives from the gateway in the `x-user-id` header and is trusted
//! as-is; it is validated upstream.

use actix_web::{web, HttpRequest, HttpResponse};
use std::sync::Arc;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::services::{CounterService, VideoService};
use crate::workers::AggregationScheduler;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub counters: CounterService,
    pub videos: VideoService,
    pub scheduler: Arc<AggregationScheduler>,
}

/// Viewer id from the gateway header; `None` when the header is absent.
fn viewer_id(req: &HttpRequest) -> Result<Option<i64>> {
    let Some(raw) = req.headers().get(USER_ID_HEADER) else {
        return Ok(None);
    };

    raw.to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(Some)
        .ok_or_else(|| AppError::ValidationError(format!("invalid {} header", USER_ID_HEADER)))
}

fn require_viewer(req: &HttpRequest) -> Result<i64> {
    viewer_id(req)?.ok_or_else(|| AppError::Unauthorized("missing user identity".to_string()))
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

/// GET /api/v1/videos/{id}
pub async fn get_video(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let video_id = path.into_inner();
    let viewer = viewer_id(&req)?;

    let video = state.videos.get_video(video_id, viewer).await?;
    Ok(HttpResponse::Ok().json(video))
}

/// POST /api/v1/videos/{id}/views
pub async fn record_view(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let video_id = path.into_inner();
    state.videos.ensure_exists(video_id).await?;

    state.counters.record_view(video_id).await;
    debug!(video_id, "View recorded");
    Ok(HttpResponse::NoContent().finish())
}

/// POST /api/v1/videos/{id}/like
pub async fn toggle_like(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let video_id = path.into_inner();
    let user_id = require_viewer(&req)?;

    let toggle = state.counters.toggle_like(user_id, video_id).await?;
    Ok(HttpResponse::Ok().json(toggle))
}

/// POST /internal/aggregation/run
pub async fn run_aggregation(state: web::Data<AppState>) -> HttpResponse {
    let report = state.scheduler.run_cycle().await;
    HttpResponse::Ok().json(report)
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/videos")
            .route("/{id}", web::get().to(get_video))
            .route("/{id}/views", web::post().to(record_view))
            .route("/{id}/like", web::post().to(toggle_like)),
    );
}

pub fn configure_internal_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/internal/aggregation/run", web::post().to(run_aggregation));
}
