use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use fileflow_core::{RunnerLaunchParameters, SchedulerError, SchedulerResult};

/// 已启动的Runner
#[derive(Debug)]
pub struct LaunchedRunner {
    pub runner_uid: Uuid,
    pub pid: Option<u32>,
    completion: Option<JoinHandle<()>>,
}

impl LaunchedRunner {
    pub fn new(runner_uid: Uuid, pid: Option<u32>, completion: JoinHandle<()>) -> Self {
        Self {
            runner_uid,
            pid,
            completion: Some(completion),
        }
    }

    pub fn detached(runner_uid: Uuid) -> Self {
        Self {
            runner_uid,
            pid: None,
            completion: None,
        }
    }

    /// 等待本地Runner进程退出；远程启动的Runner立即返回
    pub async fn wait(self) {
        if let Some(handle) = self.completion {
            if let Err(e) = handle.await {
                warn!(runner_uid = %self.runner_uid, "等待Runner退出失败: {}", e);
            }
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RunnerLauncher: Send + Sync {
    async fn launch(&self, params: &RunnerLaunchParameters) -> SchedulerResult<LaunchedRunner>;
}

/// 在本机以子进程方式启动Runner
///
/// Runner用 `--config` 加载配置：优先使用本机配置文件，
/// 否则使用启动参数中节点的配置文件。
#[derive(Debug, Clone)]
pub struct ProcessRunnerLauncher {
    binary: PathBuf,
    config_path: Option<PathBuf>,
}

impl ProcessRunnerLauncher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config_path: None,
        }
    }

    /// 为转交过来的启动请求指定本机配置
    pub fn with_config(mut self, config_path: Option<PathBuf>) -> Self {
        self.config_path = config_path;
        self
    }
}

#[async_trait]
impl RunnerLauncher for ProcessRunnerLauncher {
    async fn launch(&self, params: &RunnerLaunchParameters) -> SchedulerResult<LaunchedRunner> {
        tokio::fs::create_dir_all(&params.temp_path).await?;
        let params_file = params.temp_path.join(format!("{}.json", params.runner_uid));
        tokio::fs::write(&params_file, serde_json::to_vec_pretty(params)?).await?;

        let mut command = Command::new(&self.binary);
        command.arg("--params").arg(&params_file);
        if let Some(config_path) = self.config_path.as_ref().or(params.config_path.as_ref()) {
            command.arg("--config").arg(config_path);
        }
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                SchedulerError::RunnerLaunch(format!(
                    "启动Runner {} 失败: {e}",
                    self.binary.display()
                ))
            })?;

        let runner_uid = params.runner_uid;
        let pid = child.id();
        info!(
            runner_uid = %runner_uid,
            pid = ?pid,
            file = %params.library_file_name,
            "Runner进程已启动"
        );

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let completion = tokio::spawn(async move {
            let forward_stdout = async {
                if let Some(stdout) = stdout {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        info!(runner_uid = %runner_uid, "{}", line);
                    }
                }
            };
            let forward_stderr = async {
                if let Some(stderr) = stderr {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        warn!(runner_uid = %runner_uid, "{}", line);
                    }
                }
            };
            tokio::join!(forward_stdout, forward_stderr);

            match child.wait().await {
                Ok(status) if status.success() => {
                    info!(runner_uid = %runner_uid, "Runner进程已退出")
                }
                Ok(status) => {
                    warn!(runner_uid = %runner_uid, "Runner进程异常退出: {:?}", status.code())
                }
                Err(e) => warn!(runner_uid = %runner_uid, "等待Runner进程失败: {}", e),
            }

            if let Err(e) = tokio::fs::remove_file(&params_file).await {
                warn!("删除启动参数文件 {} 失败: {}", params_file.display(), e);
            }
        });

        Ok(LaunchedRunner::new(runner_uid, pid, completion))
    }
}

/// 把启动参数转交给远程节点
#[derive(Debug, Clone)]
pub struct RemoteRunnerLauncher {
    base_url: String,
    access_token: Option<String>,
    http_client: reqwest::Client,
}

impl RemoteRunnerLauncher {
    pub fn new(base_url: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
            http_client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl RunnerLauncher for RemoteRunnerLauncher {
    async fn launch(&self, params: &RunnerLaunchParameters) -> SchedulerResult<LaunchedRunner> {
        let url = format!("{}/api/node/launch", self.base_url);
        let mut request = self.http_client.post(&url).json(params);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SchedulerError::RunnerLaunch(format!("请求远程节点 {url} 失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SchedulerError::RunnerLaunch(format!(
                "远程节点拒绝启动: HTTP {status} - {body}"
            )));
        }

        info!(
            runner_uid = %params.runner_uid,
            remote = %self.base_url,
            "已转交远程节点启动Runner"
        );
        Ok(LaunchedRunner::detached(params.runner_uid))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn params(temp_path: &Path) -> RunnerLaunchParameters {
        RunnerLaunchParameters {
            runner_uid: Uuid::new_v4(),
            node_uid: Uuid::new_v4(),
            remote_node_uid: None,
            library_file_uid: Uuid::new_v4(),
            library_file_name: "a.mkv".to_string(),
            temp_path: temp_path.to_path_buf(),
            config_path: None,
            base_url: "http://127.0.0.1:8080".to_string(),
            access_token: None,
            is_docker: false,
            hostname: "test".to_string(),
            is_internal_node: true,
        }
    }

    #[tokio::test]
    async fn test_process_launcher_passes_params_file() {
        let temp = TempDir::new().unwrap();
        let copy = temp.path().join("received.json");
        let script = temp.path().join("runner.sh");
        std::fs::write(
            &script,
            format!("#!/bin/sh\ncp \"$2\" '{}'\necho started\n", copy.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let params = params(&temp.path().join("runs"));
        let launched = ProcessRunnerLauncher::new(&script)
            .launch(&params)
            .await
            .unwrap();
        assert_eq!(launched.runner_uid, params.runner_uid);
        launched.wait().await;

        let received: RunnerLaunchParameters =
            serde_json::from_slice(&std::fs::read(&copy).unwrap()).unwrap();
        assert_eq!(received, params);
        // 参数文件在Runner退出后删除
        assert!(!params
            .temp_path
            .join(format!("{}.json", params.runner_uid))
            .exists());
    }

    /// 脚本把收到的命令行参数逐行写入 `args_file`
    fn args_recorder(dir: &Path, args_file: &Path) -> PathBuf {
        let script = dir.join("record.sh");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\nfor arg in \"$@\"; do echo \"$arg\" >> '{}'; done\n",
                args_file.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    fn recorded_args(args_file: &Path) -> Vec<String> {
        std::fs::read_to_string(args_file)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_process_launcher_passes_node_config() {
        let temp = TempDir::new().unwrap();
        let args_file = temp.path().join("args.txt");
        let script = args_recorder(temp.path(), &args_file);
        let node_config = temp.path().join("node.toml");

        let mut params = params(&temp.path().join("runs"));
        params.config_path = Some(node_config.clone());
        ProcessRunnerLauncher::new(&script)
            .launch(&params)
            .await
            .unwrap()
            .wait()
            .await;

        let args = recorded_args(&args_file);
        assert_eq!(args.len(), 4);
        assert_eq!(args[0], "--params");
        assert_eq!(args[2], "--config");
        assert_eq!(args[3], node_config.display().to_string());
    }

    #[tokio::test]
    async fn test_local_config_overrides_forwarded_one() {
        let temp = TempDir::new().unwrap();
        let args_file = temp.path().join("args.txt");
        let script = args_recorder(temp.path(), &args_file);
        let local = temp.path().join("local.toml");

        let mut params = params(&temp.path().join("runs"));
        params.config_path = Some(PathBuf::from("/elsewhere/node.toml"));
        ProcessRunnerLauncher::new(&script)
            .with_config(Some(local.clone()))
            .launch(&params)
            .await
            .unwrap()
            .wait()
            .await;

        let args = recorded_args(&args_file);
        assert_eq!(&args[2..], &["--config".to_string(), local.display().to_string()]);
    }

    #[tokio::test]
    async fn test_process_launcher_missing_binary() {
        let temp = TempDir::new().unwrap();
        let err = ProcessRunnerLauncher::new(temp.path().join("missing"))
            .launch(&params(temp.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::RunnerLaunch(_)));
    }

    #[tokio::test]
    async fn test_remote_launcher_unreachable() {
        let temp = TempDir::new().unwrap();
        let err = RemoteRunnerLauncher::new("http://127.0.0.1:1", None)
            .launch(&params(temp.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::RunnerLaunch(_)));
    }
}
