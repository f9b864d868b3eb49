use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use uuid::Uuid;

use fileflow_core::{CompletionReport, HelloRequest, LogAppendRequest};

use crate::{error::ApiResult, response::success, routes::AppState};

pub async fn hello(
    State(state): State<AppState>,
    Json(request): Json<HelloRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.hub.hello(&request).await))
}

pub async fn append_log(
    State(state): State<AppState>,
    Json(request): Json<LogAppendRequest>,
) -> ApiResult<impl IntoResponse> {
    state.hub.append_log(&request).await?;
    Ok(success(()))
}

pub async fn complete(
    State(state): State<AppState>,
    Json(report): Json<CompletionReport>,
) -> ApiResult<impl IntoResponse> {
    state.hub.complete(&report).await?;
    Ok(success(()))
}

pub async fn cancel_runner(
    State(state): State<AppState>,
    Path(runner_uid): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let cancelled = state.hub.cancel_runner(runner_uid, "用户取消").await?;
    Ok(success(json!({ "cancelled": cancelled })))
}

/// 当前执行器列表
pub async fn list_runners(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.hub.executors().await))
}
