use super::progress::TaskProgressRegistry;
use super::protocol::*;
use super::scheduler::TaskScheduler;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query},
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;

pub fn router(scheduler: Arc<TaskScheduler>, progress: Arc<TaskProgressRegistry>) -> Router {
    Router::new()
        .route(ENDPOINT_STATE, get(handle_get_state))
        .route(ENDPOINT_SCHEDULED, get(handle_get_scheduled))
        .route(ENDPOINT_OFFER, post(handle_offer))
        .route(ENDPOINT_PROGRESS, get(handle_get_progress))
        .route(ENDPOINT_MESSAGES, get(handle_get_messages))
        .route(ENDPOINT_CANCEL, post(handle_cancel))
        .route(ENDPOINT_DONE, post(handle_task_done))
        .layer(Extension(scheduler))
        .layer(Extension(progress))
}

pub async fn handle_get_state(
    Extension(scheduler): Extension<Arc<TaskScheduler>>,
) -> (StatusCode, Json<StateResponse>) {
    let root = scheduler.get_state().await;
    (StatusCode::OK, Json(StateResponse { root }))
}

pub async fn handle_get_scheduled(
    Extension(scheduler): Extension<Arc<TaskScheduler>>,
    Query(query): Query<ScheduledQuery>,
) -> (StatusCode, Json<ScheduledResponse>) {
    let max = query.max.unwrap_or(DEFAULT_SCHEDULED_LIMIT);
    let ids = scheduler.get_scheduled(query.start, query.end, max).await;
    tracing::debug!(
        "Scheduled query ({}, {}) -> {} ids",
        query.start,
        query.end,
        ids.len()
    );
    (StatusCode::OK, Json(ScheduledResponse { ids }))
}

pub async fn handle_offer(
    Extension(scheduler): Extension<Arc<TaskScheduler>>,
    Json(req): Json<OfferRequest>,
) -> (StatusCode, Json<OfferResponse>) {
    if scheduler.offer(req.release_time, req.id).await {
        tracing::info!("Task {} scheduled for {}", req.id, req.release_time);
        (StatusCode::OK, Json(OfferResponse { accepted: true }))
    } else {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(OfferResponse { accepted: false }),
        )
    }
}

pub async fn handle_get_progress(
    Extension(progress): Extension<Arc<TaskProgressRegistry>>,
) -> (StatusCode, Json<ProgressResponse>) {
    let progress = progress.get_progress().await;
    (StatusCode::OK, Json(ProgressResponse { progress }))
}

pub async fn handle_get_messages(
    Extension(progress): Extension<Arc<TaskProgressRegistry>>,
) -> (StatusCode, Json<MessagesResponse>) {
    let messages = progress.get_messages().await;
    (StatusCode::OK, Json(MessagesResponse { messages }))
}

pub async fn handle_cancel(
    Extension(progress): Extension<Arc<TaskProgressRegistry>>,
    Path(task_id): Path<i64>,
) -> (StatusCode, Json<TaskActionResponse>) {
    match progress.cancel(task_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(TaskActionResponse {
                task_id,
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!("Failed to cancel task {}: {}", task_id, e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(TaskActionResponse {
                    task_id,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_task_done(
    Extension(progress): Extension<Arc<TaskProgressRegistry>>,
    Path(task_id): Path<i64>,
) -> (StatusCode, Json<TaskActionResponse>) {
    match progress.task_done(task_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(TaskActionResponse {
                task_id,
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!("Failed to finalize task {}: {}", task_id, e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(TaskActionResponse {
                    task_id,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}
