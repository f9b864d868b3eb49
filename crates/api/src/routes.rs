use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;

use fileflow_core::traits::{LibraryFileRepository, LibraryRepository, ProcessingNodeRepository};
use fileflow_dispatcher::{NextFileService, RunnerHub};
use fileflow_runner::RunnerLauncher;

use crate::handlers::{
    files::{cancel_file, read_file_log, register_file},
    health::health_check,
    libraries::{list_libraries, list_nodes, save_library, save_node},
    metrics::render_metrics,
    node::{launch_runner, next_file, preview_next_files},
    runner::{append_log, cancel_runner, complete, hello, list_runners},
    ws::runner_channel,
};
use crate::middleware::{cors_layer, require_token, trace_layer};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub next_file: Arc<NextFileService>,
    pub hub: Arc<RunnerHub>,
    pub libraries: Arc<dyn LibraryRepository>,
    pub nodes: Arc<dyn ProcessingNodeRepository>,
    pub files: Arc<dyn LibraryFileRepository>,
    pub metrics: Option<PrometheusHandle>,
    pub access_token: Option<String>,
    pub cors_enabled: bool,
}

/// 节点模式下接收远程启动请求的状态
#[derive(Clone)]
pub struct NodeState {
    pub launcher: Arc<dyn RunnerLauncher>,
}

/// 创建服务端API路由
pub fn create_routes(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/node/next-file", post(next_file))
        .route("/api/node/next-file/preview", post(preview_next_files))
        .route("/api/runner/hello", post(hello))
        .route("/api/runner/log", post(append_log))
        .route("/api/runner/complete", post(complete))
        .route("/api/runner/{runner_uid}/cancel", post(cancel_runner))
        .route("/api/runner/{runner_uid}/channel", get(runner_channel))
        .route("/api/runners", get(list_runners))
        .route("/api/files", post(register_file))
        .route("/api/files/{file_uid}/cancel", post(cancel_file))
        .route("/api/files/{file_uid}/log", get(read_file_log))
        .route("/api/libraries", get(list_libraries).put(save_library))
        .route("/api/nodes", get(list_nodes).put(save_node))
        .layer(middleware::from_fn_with_state(
            state.access_token.clone(),
            require_token,
        ));

    let router = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .merge(protected)
        .layer(trace_layer());

    let router = if state.cors_enabled {
        router.layer(cors_layer())
    } else {
        router
    };
    router.with_state(state)
}

/// 创建节点侧路由，供服务端把启动参数转交给本节点
pub fn create_node_routes(launcher: Arc<dyn RunnerLauncher>, access_token: Option<String>) -> Router {
    Router::new()
        .route("/api/node/launch", post(launch_runner))
        .layer(middleware::from_fn_with_state(access_token, require_token))
        .route("/health", get(health_check))
        .layer(trace_layer())
        .with_state(NodeState { launcher })
}
