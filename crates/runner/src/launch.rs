use std::path::PathBuf;

use uuid::Uuid;

use fileflow_core::{LibraryFile, RunnerConfig, RunnerLaunchParameters};

/// 由节点配置与领取结果构建Runner启动参数
#[derive(Debug, Clone)]
pub struct LaunchParametersBuilder {
    temp_path: PathBuf,
    config_path: Option<PathBuf>,
    base_url: String,
    access_token: Option<String>,
    is_docker: bool,
    hostname: String,
    is_internal_node: bool,
    remote_node_uid: Option<Uuid>,
}

impl LaunchParametersBuilder {
    pub fn new(config: &RunnerConfig) -> Self {
        let hostname = hostname::get()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        Self {
            temp_path: config.temp_path.clone(),
            config_path: None,
            base_url: config.base_url.clone(),
            access_token: config.access_token.clone(),
            is_docker: config.is_docker,
            hostname,
            is_internal_node: false,
            remote_node_uid: None,
        }
    }

    pub fn internal(mut self, is_internal_node: bool) -> Self {
        self.is_internal_node = is_internal_node;
        self
    }

    /// 由另一节点代为运行时设置
    pub fn remote_node(mut self, remote_node_uid: Option<Uuid>) -> Self {
        self.remote_node_uid = remote_node_uid;
        self
    }

    /// Runner启动时加载的配置文件，通常是节点自身的配置
    pub fn config_path(mut self, config_path: Option<PathBuf>) -> Self {
        self.config_path = config_path;
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn build(&self, node_uid: Uuid, runner_uid: Uuid, file: &LibraryFile) -> RunnerLaunchParameters {
        RunnerLaunchParameters {
            runner_uid,
            node_uid,
            remote_node_uid: self.remote_node_uid,
            library_file_uid: file.uid,
            library_file_name: file.name.clone(),
            temp_path: self.temp_path.clone(),
            config_path: self.config_path.clone(),
            base_url: self.base_url.clone(),
            access_token: self.access_token.clone(),
            is_docker: self.is_docker,
            hostname: self.hostname.clone(),
            is_internal_node: self.is_internal_node,
        }
    }
}
