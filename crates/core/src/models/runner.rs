use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ExecutorSnapshot, FileStatus};

/// 交给Runner进程（或远程节点）的启动参数，构建后不再修改
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerLaunchParameters {
    pub runner_uid: Uuid,
    pub node_uid: Uuid,
    /// 仅远程派发时设置
    pub remote_node_uid: Option<Uuid>,
    pub library_file_uid: Uuid,
    pub library_file_name: String,
    pub temp_path: PathBuf,
    /// 节点加载的配置文件，Runner据此使用与节点一致的配置
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    pub base_url: String,
    pub access_token: Option<String>,
    pub is_docker: bool,
    pub hostname: String,
    pub is_internal_node: bool,
}

impl RunnerLaunchParameters {
    pub fn is_remote(&self) -> bool {
        self.remote_node_uid.is_some()
    }
}

/// 心跳请求
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HelloRequest {
    pub runner_uid: Uuid,
    #[serde(default)]
    pub snapshot: ExecutorSnapshot,
}

/// 心跳响应，`continue` 为false时Runner应停止
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloResponse {
    #[serde(rename = "continue")]
    pub continue_processing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogAppendRequest {
    pub runner_uid: Uuid,
    pub line: String,
}

/// 流水线结束后的最终状态上报
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionReport {
    pub runner_uid: Uuid,
    pub status: FileStatus,
    #[serde(default)]
    pub message: Option<String>,
}

/// 服务端推送给Runner的指令
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerCommand {
    Cancel { reason: String },
}

/// Runner推送通道上的帧（双向）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelFrame {
    Hello(HelloRequest),
    Log(LogAppendRequest),
    HelloAck(HelloResponse),
    Cancel { reason: String },
}

impl From<RunnerCommand> for ChannelFrame {
    fn from(command: RunnerCommand) -> Self {
        match command {
            RunnerCommand::Cancel { reason } => ChannelFrame::Cancel { reason },
        }
    }
}
