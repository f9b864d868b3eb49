//! # FileFlow API
//!
//! 基于Axum的HTTP接口：节点领取文件、Runner心跳/日志/完成上报、
//! 取消、推送通道（WebSocket）以及库与节点配置。
//!
//! ## API 端点
//!
//! ### 节点
//! - `POST /api/node/next-file` - 领取下一个文件
//! - `POST /api/node/next-file/preview` - 预览候选文件
//! - `POST /api/node/launch` - 接收服务端转交的启动参数（节点侧）
//!
//! ### Runner
//! - `POST /api/runner/hello` - 心跳
//! - `POST /api/runner/log` - 追加日志
//! - `POST /api/runner/complete` - 上报最终状态
//! - `POST /api/runner/{runner_uid}/cancel` - 取消Runner
//! - `GET /api/runner/{runner_uid}/channel` - 推送通道
//! - `GET /api/runners` - 当前执行器
//!
//! ### 文件与配置
//! - `POST /api/files` - 登记库文件
//! - `POST /api/files/{file_uid}/cancel` - 取消文件处理
//! - `GET /api/files/{file_uid}/log` - 读取处理日志
//! - `GET|PUT /api/libraries`, `GET|PUT /api/nodes`
//!
//! ### 系统
//! - `GET /health`, `GET /metrics`
//!
//! 配置了访问令牌时，除 `/health` 与 `/metrics` 外都需要
//! `Authorization: Bearer <token>`。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use response::ApiResponse;
pub use routes::{create_node_routes, create_routes, AppState, NodeState};
