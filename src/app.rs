use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info, warn};

use fileflow_api::{create_node_routes, create_routes, AppState};
use fileflow_core::{
    traits::ProcessingNodeRepository, AppConfig, NextFileRequest, NextFileResult,
    ProcessingNode, SchedulerResult, SystemClock,
};
use fileflow_dispatcher::{
    LeaseManager, LeaseManagerConfig, LeaseWatchdog, LeaseWatchdogConfig, NextFileConfig,
    NextFileService, RunnerChannels, RunnerHub,
};
use fileflow_infrastructure::{
    init_metrics, FileLogStore, InMemoryLibraryFileRepository, InMemoryLibraryRepository,
    InMemoryProcessingNodeRepository,
};
use fileflow_runner::{
    DispatcherClient, LaunchParametersBuilder, NextFileSource, NodeAgent, NodeAgentConfig,
    ProcessRunnerLauncher, RemoteRunnerLauncher, RunnerLauncher,
};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 调度服务端，可同时运行内部节点
    Server,
    /// 远程处理节点
    Node,
}

/// 内部节点与服务端同进程，直接调用领取服务
pub struct InProcessNextFile {
    service: Arc<NextFileService>,
}

impl InProcessNextFile {
    pub fn new(service: Arc<NextFileService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl NextFileSource for InProcessNextFile {
    async fn next_file(&self, request: NextFileRequest) -> SchedulerResult<NextFileResult> {
        self.service.get_next(&request).await
    }
}

/// 服务端组件
pub struct ServerComponents {
    pub state: AppState,
    pub leases: Arc<LeaseManager>,
    pub hub: Arc<RunnerHub>,
    pub watchdog: Arc<LeaseWatchdog>,
}

impl ServerComponents {
    /// 基于内存仓储组装服务端
    pub fn in_memory(config: &AppConfig, metrics: Option<PrometheusHandle>) -> Self {
        let libraries = Arc::new(InMemoryLibraryRepository::new());
        let nodes = Arc::new(InMemoryProcessingNodeRepository::new());
        let files = Arc::new(InMemoryLibraryFileRepository::new());
        let clock = Arc::new(SystemClock);
        let logs = FileLogStore::new(config.dispatcher.log_max_lines);

        let leases = Arc::new(LeaseManager::new(
            files.clone(),
            clock.clone(),
            LeaseManagerConfig {
                heartbeat_timeout: config.dispatcher.heartbeat_timeout(),
                claim_attempts: config.dispatcher.claim_attempts,
            },
        ));
        let next_file = Arc::new(NextFileService::new(
            libraries.clone(),
            nodes.clone(),
            files.clone(),
            Arc::clone(&leases),
            logs.clone(),
            clock,
            NextFileConfig {
                licensed_for_processing_order: config.dispatcher.licensed_for_processing_order,
            },
        ));
        let hub = Arc::new(RunnerHub::new(
            Arc::clone(&leases),
            logs,
            Arc::new(RunnerChannels::new()),
        ));
        let watchdog = Arc::new(LeaseWatchdog::new(
            Arc::clone(&leases),
            Arc::clone(&hub),
            Some(LeaseWatchdogConfig::from(&config.dispatcher)),
        ));

        let state = AppState {
            next_file,
            hub: Arc::clone(&hub),
            libraries,
            nodes,
            files,
            metrics,
            access_token: config.api.access_token.clone(),
            cors_enabled: config.api.cors_enabled,
        };

        Self {
            state,
            leases,
            hub,
            watchdog,
        }
    }

    /// 登记内部节点
    pub async fn register_internal_node(&self, config: &AppConfig) -> Result<Option<ProcessingNode>> {
        let Some(node_uid) = config.node.node_uid.filter(|_| config.node.enabled && config.node.is_internal)
        else {
            return Ok(None);
        };

        let node = match self.state.nodes.get_by_id(node_uid).await? {
            Some(node) => node,
            None => {
                let mut node = ProcessingNode::new(config.node.name.clone(), config.node.version.clone());
                node.uid = node_uid;
                node.is_internal = true;
                node.max_runners = config.node.max_runners as u32;
                self.state.nodes.upsert(&node).await?;
                info!(node = %node.name, uid = %node.uid, "已登记内部节点");
                node
            }
        };
        Ok(Some(node))
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        config.validate().context("配置校验失败")?;
        if mode == AppMode::Node && config.node.node_uid.is_none() {
            return Err(anyhow::anyhow!("节点模式必须配置 node.node_uid"));
        }
        info!("初始化应用程序，模式: {:?}", mode);
        Ok(Self { config, mode })
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        match self.mode {
            AppMode::Server => self.run_server(shutdown_rx).await,
            AppMode::Node => self.run_node(shutdown_rx).await,
        }
    }

    fn launcher(&self) -> Arc<dyn RunnerLauncher> {
        match &self.config.node.remote_launch_url {
            Some(url) => Arc::new(RemoteRunnerLauncher::new(
                url.clone(),
                self.config.node.access_token.clone(),
            )),
            None => Arc::new(ProcessRunnerLauncher::new(&self.config.runner.runner_binary)),
        }
    }

    fn node_agent(&self, source: Arc<dyn NextFileSource>) -> Result<NodeAgent> {
        let node_uid = self
            .config
            .node
            .node_uid
            .context("节点未配置node_uid")?;
        let builder = LaunchParametersBuilder::new(&self.config.runner)
            .internal(self.config.node.is_internal)
            .config_path(self.config.source.clone());
        Ok(NodeAgent::new(
            NodeAgentConfig::new(node_uid, &self.config.node),
            source,
            self.launcher(),
            builder,
        ))
    }

    /// 运行服务端：启动恢复、租约巡检、内部节点与API
    async fn run_server(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let metrics = if self.config.api.enabled {
            match init_metrics() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("指标导出不可用: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let components = ServerComponents::in_memory(&self.config, metrics);
        if let Err(e) = components.watchdog.recover_on_startup().await {
            error!("启动恢复失败: {}", e);
        }

        let mut handles = Vec::new();

        if self.config.dispatcher.enabled {
            let watchdog = Arc::clone(&components.watchdog);
            handles.push(tokio::spawn(async move {
                if let Err(e) = watchdog.start().await {
                    error!("租约巡检运行失败: {}", e);
                }
            }));
        }

        if components.register_internal_node(&self.config).await?.is_some() {
            let source = Arc::new(InProcessNextFile::new(Arc::clone(&components.state.next_file)));
            let agent = self.node_agent(source)?;
            let shutdown_rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move { agent.run(shutdown_rx).await }));
        }

        if self.config.api.enabled {
            let listener = TcpListener::bind(&self.config.api.bind_address)
                .await
                .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;
            info!("API服务器启动在 http://{}", self.config.api.bind_address);

            let app = create_routes(components.state.clone());
            let mut api_shutdown = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                    let _ = api_shutdown.recv().await;
                });
                if let Err(e) = serve.await {
                    error!("API服务器运行失败: {}", e);
                }
            }));
        }

        let _ = shutdown_rx.recv().await;
        info!("服务端收到关闭信号");
        components.watchdog.stop().await;

        for handle in handles {
            let _ = handle.await;
        }
        info!("服务端已停止");
        Ok(())
    }

    /// 运行远程节点：轮询服务端领取文件，可选地接收服务端转交的启动请求
    async fn run_node(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let client = Arc::new(DispatcherClient::new(
            self.config.node.server_url.clone(),
            self.config.node.access_token.clone(),
        ));
        let agent = self.node_agent(client)?;

        let launch_server = match &self.config.node.launch_bind_address {
            Some(address) => {
                let listener = TcpListener::bind(address)
                    .await
                    .with_context(|| format!("绑定地址失败: {address}"))?;
                info!("节点启动接口监听在 http://{}", address);

                let routes = create_node_routes(
                    Arc::new(
                        ProcessRunnerLauncher::new(&self.config.runner.runner_binary)
                            .with_config(self.config.source.clone()),
                    ),
                    self.config.node.access_token.clone(),
                );
                let mut launch_shutdown = shutdown_rx.resubscribe();
                Some(tokio::spawn(async move {
                    let serve = axum::serve(listener, routes).with_graceful_shutdown(async move {
                        let _ = launch_shutdown.recv().await;
                    });
                    if let Err(e) = serve.await {
                        error!("节点启动接口运行失败: {}", e);
                    }
                }))
            }
            None => None,
        };

        agent.run(shutdown_rx).await;

        if let Some(handle) = launch_server {
            let _ = handle.await;
        }
        info!("节点已停止");
        Ok(())
    }
}
