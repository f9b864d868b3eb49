use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};
use uuid::Uuid;

use fileflow_core::{
    CompletionReport, ExecutorSnapshot, FileStatus, HelloRequest, LogAppendRequest,
    RunnerConfig, RunnerLaunchParameters, SchedulerResult,
};

use crate::{DispatcherClient, HeartbeatManager, RunnerReporter, RunnerShell, ShellOutcome, StopReason};

/// 通过HTTP向服务端上报
pub struct ClientReporter {
    client: Arc<DispatcherClient>,
    runner_uid: Uuid,
}

impl ClientReporter {
    pub fn new(client: Arc<DispatcherClient>, runner_uid: Uuid) -> Self {
        Self { client, runner_uid }
    }
}

#[async_trait]
impl RunnerReporter for ClientReporter {
    async fn append_log(&self, line: String) -> SchedulerResult<()> {
        self.client
            .append_log(&LogAppendRequest {
                runner_uid: self.runner_uid,
                line,
            })
            .await
    }

    async fn complete(&self, status: FileStatus, message: Option<String>) -> SchedulerResult<()> {
        self.client
            .complete(&CompletionReport {
                runner_uid: self.runner_uid,
                status,
                message,
            })
            .await
    }
}

/// Runner进程主流程：首次心跳、启动心跳任务、执行流水线并上报结果
pub async fn run_runner(
    params: RunnerLaunchParameters,
    config: &RunnerConfig,
) -> SchedulerResult<ShellOutcome> {
    let runner_uid = params.runner_uid;
    let client = Arc::new(DispatcherClient::new(
        params.base_url.clone(),
        params.access_token.clone(),
    ));

    info!(
        runner_uid = %runner_uid,
        file = %params.library_file_name,
        hostname = %params.hostname,
        "Runner启动"
    );

    // 首次心跳把租约从Pending推进到Active
    match client
        .hello(&HelloRequest {
            runner_uid,
            snapshot: ExecutorSnapshot::default(),
        })
        .await
    {
        Ok(response) if !response.continue_processing => {
            warn!(runner_uid = %runner_uid, "服务端不承认该Runner，放弃处理");
            return Ok(ShellOutcome::Stopped(StopReason::Rejected));
        }
        Ok(_) => {}
        Err(e) => warn!(runner_uid = %runner_uid, "首次心跳失败: {}", e),
    }

    let (snapshot_tx, snapshot_rx) = watch::channel(ExecutorSnapshot::default());
    let (stop_tx, stop_rx) = watch::channel(None);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let heartbeat = HeartbeatManager::new(
        Arc::clone(&client),
        runner_uid,
        config.heartbeat_interval_seconds,
    )
    .start(snapshot_rx, stop_tx, shutdown_rx);

    let reporter = ClientReporter::new(Arc::clone(&client), runner_uid);
    let outcome = RunnerShell::from_config(config)
        .run(&params, &reporter, &snapshot_tx, stop_rx)
        .await;

    let _ = shutdown_tx.send(());
    if let Err(e) = heartbeat.await {
        warn!("心跳任务异常结束: {}", e);
    }

    match &outcome {
        Ok(result) => info!(runner_uid = %runner_uid, "Runner结束: {:?}", result),
        Err(e) => warn!(runner_uid = %runner_uid, "Runner执行失败: {}", e),
    }
    outcome
}
