use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use fileflow_core::{
    ExecutorSnapshot, FileStatus, RunnerConfig, RunnerLaunchParameters, SchedulerError,
    SchedulerResult,
};

use crate::StopReason;

/// Runner向服务端上报日志与最终状态
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RunnerReporter: Send + Sync {
    async fn append_log(&self, line: String) -> SchedulerResult<()>;

    async fn complete(&self, status: FileStatus, message: Option<String>) -> SchedulerResult<()>;
}

/// 流水线执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellOutcome {
    /// 流水线自行结束并已上报该状态
    Finished(FileStatus),
    /// 被服务端叫停，不再上报状态
    Stopped(StopReason),
}

/// 执行处理流水线命令
///
/// 参数中的占位符会被替换：`{file}` 文件名，`{file_uid}` 文件ID，
/// `{runner}` runner ID，`{temp}` 本次执行的临时目录。
/// 输出中以 `@step <n> <name>` 与 `@progress <0-100>` 开头的行会更新执行快照。
#[derive(Debug, Clone)]
pub struct RunnerShell {
    command: String,
    args: Vec<String>,
}

impl RunnerShell {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(config.pipeline_command.clone(), config.pipeline_args.clone())
    }

    fn render_args(&self, params: &RunnerLaunchParameters, work_dir: &Path) -> Vec<String> {
        let runner_uid = params.runner_uid.to_string();
        let file_uid = params.library_file_uid.to_string();
        let temp = work_dir.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{file_uid}", &file_uid)
                    .replace("{file}", &params.library_file_name)
                    .replace("{runner}", &runner_uid)
                    .replace("{temp}", &temp)
            })
            .collect()
    }

    pub fn work_dir(params: &RunnerLaunchParameters) -> PathBuf {
        params.temp_path.join(params.runner_uid.to_string())
    }

    pub async fn run(
        &self,
        params: &RunnerLaunchParameters,
        reporter: &dyn RunnerReporter,
        snapshot_tx: &watch::Sender<ExecutorSnapshot>,
        mut stop_rx: watch::Receiver<Option<StopReason>>,
    ) -> SchedulerResult<ShellOutcome> {
        let work_dir = Self::work_dir(params);
        tokio::fs::create_dir_all(&work_dir).await?;

        let outcome = self
            .execute(params, &work_dir, reporter, snapshot_tx, &mut stop_rx)
            .await;

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            warn!("清理临时目录 {} 失败: {}", work_dir.display(), e);
        }
        outcome
    }

    async fn execute(
        &self,
        params: &RunnerLaunchParameters,
        work_dir: &Path,
        reporter: &dyn RunnerReporter,
        snapshot_tx: &watch::Sender<ExecutorSnapshot>,
        stop_rx: &mut watch::Receiver<Option<StopReason>>,
    ) -> SchedulerResult<ShellOutcome> {
        let args = self.render_args(params, work_dir);
        info!(
            runner_uid = %params.runner_uid,
            file = %params.library_file_name,
            "执行流水线: command={}, args={:?}",
            self.command,
            args
        );

        let mut cmd = Command::new(&self.command);
        cmd.args(&args)
            .current_dir(work_dir)
            .env("FILEFLOW_RUNNER_UID", params.runner_uid.to_string())
            .env("FILEFLOW_FILE_UID", params.library_file_uid.to_string())
            .env("FILEFLOW_FILE", &params.library_file_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("启动流水线命令失败: {e}");
                warn!("{}", message);
                reporter
                    .complete(FileStatus::ProcessingFailed, Some(message))
                    .await?;
                return Ok(ShellOutcome::Finished(FileStatus::ProcessingFailed));
            }
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SchedulerError::Internal("无法获取stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SchedulerError::Internal("无法获取stderr".to_string()))?;

        let (line_tx, mut line_rx) = mpsc::channel::<String>(256);
        tokio::spawn(forward_lines(stdout, line_tx.clone()));
        tokio::spawn(forward_lines(stderr, line_tx));

        let mut snapshot = snapshot_tx.borrow().clone();
        let mut stop_open = true;

        loop {
            tokio::select! {
                line = line_rx.recv() => {
                    let Some(line) = line else { break };
                    if apply_directive(&line, &mut snapshot) {
                        snapshot_tx.send_replace(snapshot.clone());
                    }
                    if let Err(e) = reporter.append_log(line).await {
                        warn!("上报日志失败: {}", e);
                    }
                }
                changed = stop_rx.changed(), if stop_open => {
                    if changed.is_err() {
                        stop_open = false;
                        continue;
                    }
                    let reason = stop_rx.borrow_and_update().clone();
                    if let Some(reason) = reason {
                        info!(runner_uid = %params.runner_uid, "停止流水线: {:?}", reason);
                        if let Err(e) = child.kill().await {
                            warn!("终止流水线进程失败: {}", e);
                        }
                        return Ok(ShellOutcome::Stopped(reason));
                    }
                }
            }
        }

        let exit_status = child.wait().await?;
        let (status, message) = if exit_status.success() {
            (FileStatus::Processed, None)
        } else {
            (
                FileStatus::ProcessingFailed,
                Some(format!("流水线执行失败，退出码: {:?}", exit_status.code())),
            )
        };

        info!(
            runner_uid = %params.runner_uid,
            status = ?status,
            "流水线执行完成"
        );
        reporter.complete(status, message).await?;
        Ok(ShellOutcome::Finished(status))
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("读取流水线输出失败: {}", e);
                break;
            }
        }
    }
}

/// 解析进度指令行，返回快照是否发生变化
fn apply_directive(line: &str, snapshot: &mut ExecutorSnapshot) -> bool {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("@step ") {
        let mut parts = rest.trim().splitn(2, char::is_whitespace);
        let Some(Ok(step)) = parts.next().map(str::parse::<u32>) else {
            return false;
        };
        snapshot.current_step = step;
        snapshot.current_step_name = parts
            .next()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        return true;
    }
    if let Some(rest) = line.strip_prefix("@progress ") {
        if let Ok(progress) = rest.trim().parse::<f32>() {
            snapshot.progress = progress.clamp(0.0, 100.0);
            return true;
        }
    }
    false
}
