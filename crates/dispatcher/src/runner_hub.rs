//! Runner通道
//!
//! 每个runner一个广播通道：服务端往里发布取消指令，WebSocket连接订阅后转发给Runner。
//! 心跳、日志与完成上报既可以走WebSocket，也可以走普通HTTP接口，最终都落到 `RunnerHub`。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fileflow_core::{
    CompletionReport, ExecutorInfo, HelloRequest, HelloResponse, Lease, LogAppendRequest,
    RunnerCommand, SchedulerError, SchedulerResult,
};
use fileflow_infrastructure::{FileLogStore, MetricsCollector};

use crate::lease_manager::LeaseManager;

const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Default)]
pub struct RunnerChannels {
    senders: Mutex<HashMap<Uuid, broadcast::Sender<RunnerCommand>>>,
}

impl RunnerChannels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, runner_uid: Uuid) -> broadcast::Receiver<RunnerCommand> {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders
            .entry(runner_uid)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// 发布指令，返回是否有订阅者收到
    pub fn publish(&self, runner_uid: Uuid, command: RunnerCommand) -> bool {
        let senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        match senders.get(&runner_uid) {
            Some(sender) => sender.send(command).is_ok(),
            None => false,
        }
    }

    pub fn close(&self, runner_uid: Uuid) {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders.remove(&runner_uid);
    }

    pub fn len(&self) -> usize {
        self.senders.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct RunnerHub {
    leases: Arc<LeaseManager>,
    logs: FileLogStore,
    channels: Arc<RunnerChannels>,
    metrics: MetricsCollector,
}

impl RunnerHub {
    pub fn new(leases: Arc<LeaseManager>, logs: FileLogStore, channels: Arc<RunnerChannels>) -> Self {
        Self {
            leases,
            logs,
            channels,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn leases(&self) -> &Arc<LeaseManager> {
        &self.leases
    }

    /// 心跳：续期租约并更新执行器视图，`continue` 为false时Runner应停止
    pub async fn hello(&self, request: &HelloRequest) -> HelloResponse {
        let alive = self
            .leases
            .heartbeat(request.runner_uid, &request.snapshot)
            .await;
        if !alive {
            debug!(runner_uid = %request.runner_uid, "拒绝过期或未知runner的心跳");
        }
        HelloResponse {
            continue_processing: alive,
        }
    }

    pub async fn append_log(&self, request: &LogAppendRequest) -> SchedulerResult<()> {
        let lease = self
            .leases
            .lease_for_runner(request.runner_uid)
            .await
            .ok_or(SchedulerError::RunnerNotFound {
                id: request.runner_uid,
            })?;
        self.logs
            .append(lease.library_file_uid, request.line.clone())
            .await;
        self.metrics.record_log_line();
        Ok(())
    }

    pub async fn complete(&self, report: &CompletionReport) -> SchedulerResult<()> {
        let lease = self.leases.complete(report.runner_uid, report.status).await?;
        if let Some(message) = &report.message {
            self.logs
                .append(lease.library_file_uid, message.clone())
                .await;
        }
        self.finish_log(&lease).await;
        self.channels.close(report.runner_uid);
        Ok(())
    }

    /// 取消文件的处理；租约立即结束，停止Runner是尽力而为
    pub async fn cancel_file(&self, file_uid: Uuid, reason: &str) -> SchedulerResult<bool> {
        match self.leases.cancel_file(file_uid).await? {
            Some(lease) => {
                self.release(&lease, reason).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn cancel_runner(&self, runner_uid: Uuid, reason: &str) -> SchedulerResult<bool> {
        match self.leases.cancel_runner(runner_uid).await? {
            Some(lease) => {
                self.release(&lease, reason).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 租约已在服务端结束：通知runner停止，文件日志进入保留期
    pub async fn release(&self, lease: &Lease, reason: &str) {
        self.notify_stop(lease.runner_uid, reason);
        self.finish_log(lease).await;
    }

    async fn finish_log(&self, lease: &Lease) {
        self.logs
            .mark_finished(lease.library_file_uid, self.leases.now())
            .await;
    }

    /// 回收保留期已过的文件日志
    pub async fn evict_logs(&self, retention: chrono::Duration) -> usize {
        let cutoff = self.leases.now() - retention;
        self.logs.evict_finished(cutoff).await
    }

    /// 给Runner推送取消指令并关闭通道
    fn notify_stop(&self, runner_uid: Uuid, reason: &str) {
        let delivered = self.channels.publish(
            runner_uid,
            RunnerCommand::Cancel {
                reason: reason.to_string(),
            },
        );
        if delivered {
            info!(runner_uid = %runner_uid, reason, "已通知runner停止");
        } else {
            warn!(runner_uid = %runner_uid, "runner没有连接推送通道，等待其下次心跳时停止");
        }
        self.channels.close(runner_uid);
    }

    /// 订阅runner的推送通道，runner没有有效租约时返回None
    ///
    /// 登记通道后再确认一次租约：两次检查之间被取消的runner，
    /// 其取消通知可能早于通道登记，这里负责把通道关掉。
    pub async fn subscribe(&self, runner_uid: Uuid) -> Option<broadcast::Receiver<RunnerCommand>> {
        self.leases.lease_for_runner(runner_uid).await?;
        let receiver = self.channels.subscribe(runner_uid);
        if self.leases.lease_for_runner(runner_uid).await.is_none() {
            debug!(runner_uid = %runner_uid, "订阅期间租约已结束，关闭通道");
            self.channels.close(runner_uid);
            return None;
        }
        Some(receiver)
    }

    /// 当前登记的推送通道数
    pub fn open_channels(&self) -> usize {
        self.channels.len()
    }

    pub async fn executors(&self) -> Vec<ExecutorInfo> {
        self.leases.executors().await
    }

    pub async fn read_log(&self, file_uid: Uuid) -> Vec<String> {
        self.logs.read(file_uid).await
    }
}
