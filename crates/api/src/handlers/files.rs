use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use fileflow_core::{FileFlags, LibraryFile, SchedulerError};

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success},
    routes::AppState,
};

/// 登记新发现的库文件
#[derive(Debug, Deserialize)]
pub struct RegisterFileRequest {
    pub library_uid: Uuid,
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub force: bool,
}

pub async fn register_file(
    State(state): State<AppState>,
    Json(request): Json<RegisterFileRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("文件名不能为空".to_string()));
    }
    let library = state
        .libraries
        .get_by_id(request.library_uid)
        .await?
        .ok_or(SchedulerError::LibraryNotFound {
            id: request.library_uid,
        })?;

    let mut file = LibraryFile::new(&library, request.name, request.size);
    if request.force {
        file.flags.insert(FileFlags::FORCE_PROCESSING);
    }
    state.files.upsert(&file).await?;
    info!(file = %file.name, library = %library.name, "登记库文件");
    Ok(created(file))
}

pub async fn cancel_file(
    State(state): State<AppState>,
    Path(file_uid): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let cancelled = state.hub.cancel_file(file_uid, "用户取消").await?;
    Ok(success(json!({ "cancelled": cancelled })))
}

pub async fn read_file_log(
    State(state): State<AppState>,
    Path(file_uid): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state
        .files
        .get_by_id(file_uid)
        .await?
        .ok_or(SchedulerError::LibraryFileNotFound { id: file_uid })?;
    Ok(success(state.hub.read_log(file_uid).await))
}
