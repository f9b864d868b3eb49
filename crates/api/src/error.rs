use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fileflow_core::SchedulerError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,

    #[error("缺少或无效的访问令牌")]
    Unauthorized,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Scheduler(SchedulerError::Configuration(msg)) => {
                (StatusCode::BAD_REQUEST, "CONFIGURATION_ERROR", msg.clone())
            }
            ApiError::Scheduler(SchedulerError::LibraryNotFound { id }) => (
                StatusCode::NOT_FOUND,
                "LIBRARY_NOT_FOUND",
                format!("库 {id} 不存在"),
            ),
            ApiError::Scheduler(SchedulerError::LibraryFileNotFound { id }) => (
                StatusCode::NOT_FOUND,
                "LIBRARY_FILE_NOT_FOUND",
                format!("库文件 {id} 不存在"),
            ),
            ApiError::Scheduler(SchedulerError::NodeNotFound { id }) => (
                StatusCode::NOT_FOUND,
                "NODE_NOT_FOUND",
                format!("处理节点 {id} 不存在"),
            ),
            ApiError::Scheduler(SchedulerError::RunnerNotFound { id }) => (
                StatusCode::NOT_FOUND,
                "RUNNER_NOT_FOUND",
                format!("Runner {id} 没有有效租约"),
            ),
            ApiError::Scheduler(SchedulerError::Persistence(msg)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "PERSISTENCE_ERROR",
                msg.clone(),
            ),
            ApiError::Scheduler(SchedulerError::RunnerLaunch(msg)) => {
                (StatusCode::BAD_GATEWAY, "RUNNER_LAUNCH_ERROR", msg.clone())
            }
            ApiError::Scheduler(SchedulerError::Serialization(err)) => (
                StatusCode::BAD_REQUEST,
                "SERIALIZATION_ERROR",
                err.to_string(),
            ),
            ApiError::Scheduler(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "系统内部错误".to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "请求的资源不存在".to_string(),
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "请在请求头中添加 Authorization: Bearer <token>".to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = self.parts();
        if status.is_server_error() {
            error!("请求处理失败: {}", self);
        }

        let body = Json(json!({
            "success": false,
            "message": message,
            "error": {
                "type": error_type,
                "code": status.as_u16(),
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                ApiError::Scheduler(SchedulerError::Configuration("bad".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::Scheduler(SchedulerError::NodeNotFound { id: Uuid::nil() }),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::Scheduler(SchedulerError::Persistence("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApiError::Scheduler(SchedulerError::Internal("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
            (ApiError::NotFound, StatusCode::NOT_FOUND),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
