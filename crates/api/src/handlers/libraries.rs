use axum::{extract::State, response::IntoResponse, Json};
use serde_json::Value;
use tracing::info;

use fileflow_core::{Library, ProcessingNode};

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

pub async fn list_libraries(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.libraries.list().await?))
}

/// 保存库配置；格式错误或检测规则不合法时返回400
pub async fn save_library(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let library: Library = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("库配置格式错误: {e}")))?;
    library.validate()?;
    state.libraries.upsert(&library).await?;
    info!(library = %library.name, uid = %library.uid, "保存库配置");
    Ok(success(library))
}

pub async fn list_nodes(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.nodes.list().await?))
}

pub async fn save_node(
    State(state): State<AppState>,
    Json(node): Json<ProcessingNode>,
) -> ApiResult<impl IntoResponse> {
    if node.name.trim().is_empty() {
        return Err(ApiError::BadRequest("节点名称不能为空".to_string()));
    }
    if node.max_runners == 0 {
        return Err(ApiError::BadRequest("最大Runner数必须大于0".to_string()));
    }
    state.nodes.upsert(&node).await?;
    info!(node = %node.name, uid = %node.uid, "保存处理节点");
    Ok(success(node))
}
