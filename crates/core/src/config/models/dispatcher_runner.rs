use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// 超过该时长没有心跳的租约会被回收
    pub heartbeat_timeout_seconds: u64,
    pub sweep_interval_seconds: u64,
    /// 没有租约的 Processing 文件超过该时长才会被重新排队
    pub reconcile_grace_seconds: u64,
    pub licensed_for_processing_order: bool,
    /// 单次领取允许的CAS冲突次数，超过后重新排序
    pub claim_attempts: usize,
    /// 每个文件日志保留的最大行数
    pub log_max_lines: usize,
    /// 文件处理结束后日志在内存中保留的时长
    pub log_retention_seconds: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_timeout_seconds: 60,
            sweep_interval_seconds: 10,
            reconcile_grace_seconds: 300,
            licensed_for_processing_order: true,
            claim_attempts: 5,
            log_max_lines: 10_000,
            log_retention_seconds: 86_400,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("心跳超时必须大于0"));
        }

        if self.sweep_interval_seconds == 0 {
            return Err(anyhow::anyhow!("巡检间隔必须大于0"));
        }

        if self.claim_attempts == 0 {
            return Err(anyhow::anyhow!("领取尝试次数必须大于0"));
        }

        if self.log_max_lines == 0 {
            return Err(anyhow::anyhow!("日志最大行数必须大于0"));
        }

        if self.log_retention_seconds == 0 {
            return Err(anyhow::anyhow!("日志保留时长必须大于0"));
        }

        Ok(())
    }

    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_timeout_seconds as i64)
    }

    pub fn reconcile_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reconcile_grace_seconds as i64)
    }

    pub fn log_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.log_retention_seconds as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub runner_binary: PathBuf,
    pub temp_path: PathBuf,
    /// Runner回调服务端的地址
    pub base_url: String,
    pub access_token: Option<String>,
    pub is_docker: bool,
    pub heartbeat_interval_seconds: u64,
    /// 流水线命令，参数中的 `{file}` `{file_uid}` `{runner}` `{temp}` 会被替换
    pub pipeline_command: String,
    pub pipeline_args: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            runner_binary: PathBuf::from("fileflow-runner"),
            temp_path: std::env::temp_dir().join("fileflow"),
            base_url: "http://127.0.0.1:8080".to_string(),
            access_token: None,
            is_docker: false,
            heartbeat_interval_seconds: 20,
            pipeline_command: "true".to_string(),
            pipeline_args: Vec::new(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.runner_binary.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Runner程序路径不能为空"));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(anyhow::anyhow!("无效的回调地址: {}", self.base_url));
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.pipeline_command.trim().is_empty() {
            return Err(anyhow::anyhow!("流水线命令不能为空"));
        }

        Ok(())
    }
}
