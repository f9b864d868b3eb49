use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use fileflow_core::{
    NextFileRequest, NextFileResult, NextFileStatus, NodeConfig, SchedulerError, SchedulerResult,
};

use crate::{DispatcherClient, LaunchParametersBuilder, RunnerLauncher};

/// 领取下一个文件的来源：内部节点直接调用服务，远程节点走HTTP
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NextFileSource: Send + Sync {
    async fn next_file(&self, request: NextFileRequest) -> SchedulerResult<NextFileResult>;
}

#[async_trait]
impl NextFileSource for DispatcherClient {
    async fn next_file(&self, request: NextFileRequest) -> SchedulerResult<NextFileResult> {
        DispatcherClient::next_file(self, &request).await
    }
}

#[derive(Debug, Clone)]
pub struct NodeAgentConfig {
    pub node_uid: Uuid,
    pub version: String,
    pub poll_interval: Duration,
    pub max_runners: usize,
}

impl NodeAgentConfig {
    pub fn new(node_uid: Uuid, config: &NodeConfig) -> Self {
        Self {
            node_uid,
            version: config.version.clone(),
            poll_interval: Duration::from_secs(config.poll_interval_seconds.max(1)),
            max_runners: config.max_runners.max(1),
        }
    }
}

/// 节点轮询循环
///
/// 有空闲槽位时领取文件、构建启动参数并启动Runner。
/// 本地Runner在进程退出前占用一个槽位，远程启动不占用。
pub struct NodeAgent {
    config: NodeAgentConfig,
    source: Arc<dyn NextFileSource>,
    launcher: Arc<dyn RunnerLauncher>,
    builder: LaunchParametersBuilder,
    permits: Arc<Semaphore>,
}

impl NodeAgent {
    pub fn new(
        config: NodeAgentConfig,
        source: Arc<dyn NextFileSource>,
        launcher: Arc<dyn RunnerLauncher>,
        builder: LaunchParametersBuilder,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_runners));
        Self {
            config,
            source,
            launcher,
            builder,
            permits,
        }
    }

    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// 尝试领取并启动一个Runner，返回是否启动成功
    pub async fn poll_once(&self) -> SchedulerResult<bool> {
        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            debug!(node_uid = %self.config.node_uid, "没有空闲的Runner槽位");
            return Ok(false);
        };

        let runner_uid = Uuid::new_v4();
        let request = NextFileRequest {
            node_uid: self.config.node_uid,
            node_version: self.config.version.clone(),
            runner_uid,
        };
        let result = self.source.next_file(request).await?;

        let file = match result.status {
            NextFileStatus::Success => result.file.ok_or_else(|| {
                SchedulerError::Internal("领取成功但响应中没有文件".to_string())
            })?,
            NextFileStatus::NoFile => {
                debug!(node_uid = %self.config.node_uid, "暂无可处理的文件");
                return Ok(false);
            }
            status => {
                warn!(node_uid = %self.config.node_uid, "节点无法领取文件: {:?}", status);
                return Ok(false);
            }
        };

        let params = self.builder.build(self.config.node_uid, runner_uid, &file);
        let launched = self.launcher.launch(&params).await.map_err(|e| {
            // 未启动的Runner不会发送心跳，租约到期后文件会重新排队
            error!(runner_uid = %runner_uid, file = %file.name, "启动Runner失败: {}", e);
            e
        })?;

        info!(
            node_uid = %self.config.node_uid,
            runner_uid = %runner_uid,
            file = %file.name,
            "Runner已启动"
        );
        tokio::spawn(async move {
            launched.wait().await;
            drop(permit);
        });
        Ok(true)
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            node_uid = %self.config.node_uid,
            max_runners = self.config.max_runners,
            "节点轮询已启动"
        );
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    loop {
                        match self.poll_once().await {
                            Ok(true) => continue,
                            Ok(false) => break,
                            Err(e) => {
                                warn!("轮询文件失败: {}", e);
                                break;
                            }
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(node_uid = %self.config.node_uid, "节点轮询已停止");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::MockRunnerLauncher;
    use crate::LaunchedRunner;
    use fileflow_core::{Library, LibraryFile, RunnerConfig, RunnerLaunchParameters};
    use tokio::sync::oneshot;

    fn agent_config(max_runners: usize) -> NodeAgentConfig {
        NodeAgentConfig {
            node_uid: Uuid::new_v4(),
            version: "1.0.0".to_string(),
            poll_interval: Duration::from_millis(50),
            max_runners,
        }
    }

    fn builder() -> LaunchParametersBuilder {
        LaunchParametersBuilder::new(&RunnerConfig::default()).hostname("test")
    }

    fn success() -> NextFileResult {
        NextFileResult::success(LibraryFile::new(&Library::new("lib"), "a.mkv", 1))
    }

    #[tokio::test]
    async fn test_no_file_does_not_launch() {
        let mut source = MockNextFileSource::new();
        source
            .expect_next_file()
            .times(1)
            .returning(|_| Ok(NextFileResult::no_file()));
        let mut launcher = MockRunnerLauncher::new();
        launcher.expect_launch().times(0);

        let agent = NodeAgent::new(agent_config(1), Arc::new(source), Arc::new(launcher), builder());
        assert!(!agent.poll_once().await.unwrap());
        assert_eq!(agent.available_slots(), 1);
    }

    #[tokio::test]
    async fn test_request_carries_node_identity() {
        let config = agent_config(1);
        let node_uid = config.node_uid;
        let mut source = MockNextFileSource::new();
        source
            .expect_next_file()
            .withf(move |req| req.node_uid == node_uid && req.node_version == "1.0.0")
            .times(1)
            .returning(|_| Ok(NextFileResult::status(NextFileStatus::NodeNotEnabled)));
        let launcher = MockRunnerLauncher::new();

        let agent = NodeAgent::new(config, Arc::new(source), Arc::new(launcher), builder());
        assert!(!agent.poll_once().await.unwrap());
    }

    #[tokio::test]
    async fn test_max_runners_limits_launches() {
        let mut source = MockNextFileSource::new();
        source.expect_next_file().times(2).returning(|_| Ok(success()));

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let mut launcher = MockRunnerLauncher::new();
        let mut release_rx = Some(release_rx);
        launcher
            .expect_launch()
            .times(2)
            .returning(move |params: &RunnerLaunchParameters| {
                let rx = release_rx.take();
                Ok(LaunchedRunner::new(
                    params.runner_uid,
                    None,
                    tokio::spawn(async move {
                        if let Some(rx) = rx {
                            let _ = rx.await;
                        }
                    }),
                ))
            });

        let agent = NodeAgent::new(agent_config(1), Arc::new(source), Arc::new(launcher), builder());
        assert!(agent.poll_once().await.unwrap());
        // 槽位被占用时不会再去领取
        assert!(!agent.poll_once().await.unwrap());
        assert_eq!(agent.available_slots(), 0);

        release_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while agent.available_slots() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(agent.poll_once().await.unwrap());
    }

    #[tokio::test]
    async fn test_launch_failure_releases_slot() {
        let mut source = MockNextFileSource::new();
        source.expect_next_file().returning(|_| Ok(success()));
        let mut launcher = MockRunnerLauncher::new();
        launcher
            .expect_launch()
            .returning(|_| Err(SchedulerError::RunnerLaunch("boom".to_string())));

        let agent = NodeAgent::new(agent_config(1), Arc::new(source), Arc::new(launcher), builder());
        assert!(agent.poll_once().await.is_err());
        assert_eq!(agent.available_slots(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut source = MockNextFileSource::new();
        source
            .expect_next_file()
            .returning(|_| Ok(NextFileResult::no_file()));
        let launcher = MockRunnerLauncher::new();
        let agent = NodeAgent::new(agent_config(1), Arc::new(source), Arc::new(launcher), builder());

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move { agent.run(shutdown_rx).await });
        tokio::time::sleep(Duration::from_millis(120)).await;
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
