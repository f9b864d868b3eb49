use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub enabled: bool,
    /// 在服务端登记的节点UID，节点模式下必填
    pub node_uid: Option<Uuid>,
    pub name: String,
    pub version: String,
    pub poll_interval_seconds: u64,
    pub max_runners: usize,
    /// 服务端地址，远程节点通过它领取文件
    pub server_url: String,
    pub access_token: Option<String>,
    /// 内部节点与服务端同进程运行，直接调用领取服务
    pub is_internal: bool,
    /// 设置后不在本机启动Runner，而是把启动参数转交给该地址的节点
    pub remote_launch_url: Option<String>,
    /// 节点模式下接收远程启动请求的监听地址
    pub launch_bind_address: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            node_uid: None,
            name: "internal".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            poll_interval_seconds: 10,
            max_runners: 1,
            server_url: "http://127.0.0.1:8080".to_string(),
            access_token: None,
            is_internal: true,
            remote_launch_url: None,
            launch_bind_address: None,
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled && self.node_uid.is_none() {
            return Err(anyhow::anyhow!("启用节点时必须配置node_uid"));
        }

        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.max_runners == 0 {
            return Err(anyhow::anyhow!("最大Runner数必须大于0"));
        }

        if !self.is_internal && self.server_url.is_empty() {
            return Err(anyhow::anyhow!("远程节点必须配置服务端地址"));
        }

        Ok(())
    }
}
