//! Axum JSON API for review submission, dashboards, and flag adjudication.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use noor_core::{FlagAdjudication, FlagStatus, FlaggedTranslation, TranslationReview, User};
use noor_review::{
    DashboardOverview, Page, PageParams, ProcessFlag, RegisterUser, ReviewService, SubmitReview,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

mod error;

pub use error::{ApiResponse, AppError, AppResult, ErrorCode};

pub const CRATE_NAME: &str = "noor-web";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ReviewService>,
}

impl AppState {
    pub fn new(service: Arc<ReviewService>) -> Self {
        Self { service }
    }
}

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub port: u16,
}

impl WebConfig {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("NOOR_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallerQuery {
    firebase_uid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    firebase_uid: String,
    page: Option<u32>,
    per_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlagQueueQuery {
    firebase_uid: String,
    status: Option<FlagStatus>,
    page: Option<u32>,
    per_page: Option<u32>,
}

fn page_params(page: Option<u32>, per_page: Option<u32>) -> PageParams {
    let defaults = PageParams::default();
    PageParams {
        page: page.unwrap_or(defaults.page),
        per_page: per_page.unwrap_or(defaults.per_page),
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    service: &'static str,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/users", post(register_user_handler))
        .route("/api/reviews", post(submit_review_handler))
        .route("/api/reviews/history", get(review_history_handler))
        .route("/api/dashboard/overview", get(overview_handler))
        .route("/api/flags", get(flag_queue_handler))
        .route("/api/flags/{id}/process", post(process_flag_handler))
        .route("/api/flags/{id}/history", get(flag_history_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, config: WebConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "noor web listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn health_handler() -> Json<Health> {
    Json(Health {
        status: "ok",
        service: CRATE_NAME,
    })
}

async fn register_user_handler(
    State(state): State<AppState>,
    body: Result<Json<RegisterUser>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(req) = body.map_err(|e| AppError::bad_request(e.body_text()))?;
    let user: User = state.service.register_user(req).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(user))))
}

async fn submit_review_handler(
    State(state): State<AppState>,
    body: Result<Json<SubmitReview>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(req) = body.map_err(|e| AppError::bad_request(e.body_text()))?;
    let review: TranslationReview = state.service.submit_review(req).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(review))))
}

async fn review_history_handler(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> AppResult<Json<ApiResponse<Page<TranslationReview>>>> {
    let Query(q) = query.map_err(|e| AppError::bad_request(e.body_text()))?;
    let page = state
        .service
        .review_history(&q.firebase_uid, page_params(q.page, q.per_page))
        .await?;
    Ok(Json(ApiResponse::ok(page)))
}

async fn overview_handler(
    State(state): State<AppState>,
    query: Result<Query<CallerQuery>, QueryRejection>,
) -> AppResult<Json<ApiResponse<DashboardOverview>>> {
    let Query(q) = query.map_err(|e| AppError::bad_request(e.body_text()))?;
    let overview = state.service.overview(&q.firebase_uid).await?;
    Ok(Json(ApiResponse::ok(overview)))
}

async fn flag_queue_handler(
    State(state): State<AppState>,
    query: Result<Query<FlagQueueQuery>, QueryRejection>,
) -> AppResult<Json<ApiResponse<Page<FlaggedTranslation>>>> {
    let Query(q) = query.map_err(|e| AppError::bad_request(e.body_text()))?;
    let page = state
        .service
        .flag_queue(&q.firebase_uid, q.status, page_params(q.page, q.per_page))
        .await?;
    Ok(Json(ApiResponse::ok(page)))
}

async fn process_flag_handler(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<ProcessFlag>, JsonRejection>,
) -> AppResult<Json<ApiResponse<FlaggedTranslation>>> {
    let Path(id) = id.map_err(|_| AppError::not_found("flagged translation not found"))?;
    let Json(req) = body.map_err(|e| AppError::bad_request(e.body_text()))?;
    let updated = state.service.process_flag(id, req).await?;
    Ok(Json(ApiResponse::ok(updated)))
}

async fn flag_history_handler(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<CallerQuery>, QueryRejection>,
) -> AppResult<Json<ApiResponse<Vec<FlagAdjudication>>>> {
    let Path(id) = id.map_err(|_| AppError::not_found("flagged translation not found"))?;
    let Query(q) = query.map_err(|e| AppError::bad_request(e.body_text()))?;
    let history = state.service.flag_history(&q.firebase_uid, id).await?;
    Ok(Json(ApiResponse::ok(history)))
}
