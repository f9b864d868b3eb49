use axum::{extract::State, response::IntoResponse, Json};
use tracing::info;

use fileflow_core::{NextFilePreviewRequest, NextFileRequest, RunnerLaunchParameters};

use crate::{
    error::ApiResult,
    response::{accepted, success},
    routes::{AppState, NodeState},
};

/// 领取下一个文件
pub async fn next_file(
    State(state): State<AppState>,
    Json(request): Json<NextFileRequest>,
) -> ApiResult<impl IntoResponse> {
    let result = state.next_file.get_next(&request).await?;
    Ok(success(result))
}

/// 预览节点接下来会拿到的文件
pub async fn preview_next_files(
    State(state): State<AppState>,
    Json(request): Json<NextFilePreviewRequest>,
) -> ApiResult<impl IntoResponse> {
    let files = state.next_file.preview(&request).await?;
    Ok(success(files))
}

/// 由服务端转交的启动请求
pub async fn launch_runner(
    State(state): State<NodeState>,
    Json(params): Json<RunnerLaunchParameters>,
) -> ApiResult<impl IntoResponse> {
    let launched = state.launcher.launch(&params).await?;
    info!(
        runner_uid = %launched.runner_uid,
        file = %params.library_file_name,
        "已按远程请求启动Runner"
    );
    Ok(accepted(format!("Runner {} 已启动", launched.runner_uid)))
}
