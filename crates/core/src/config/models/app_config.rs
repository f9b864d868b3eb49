use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    api_logging::{ApiConfig, LoggingConfig},
    dispatcher_runner::{DispatcherConfig, RunnerConfig},
    node::NodeConfig,
};

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dispatcher: DispatcherConfig,
    pub runner: RunnerConfig,
    pub node: NodeConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
    /// 实际加载的配置文件
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 未指定路径时依次尝试 `config/fileflow.toml`、`fileflow.toml`、
    /// `/etc/fileflow/config.toml`，都不存在则只使用默认值。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder().add_source(
            ConfigBuilder::try_from(&AppConfig::default()).context("生成默认配置失败")?,
        );

        let source = match config_path {
            Some(path) => {
                if !Path::new(path).exists() {
                    return Err(anyhow::anyhow!("配置文件不存在: {}", path));
                }
                Some(path)
            }
            None => [
                "config/fileflow.toml",
                "fileflow.toml",
                "/etc/fileflow/config.toml",
            ]
            .into_iter()
            .find(|p| Path::new(p).exists()),
        };
        if let Some(path) = source {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("FILEFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;
        config.source = source.map(|path| {
            let path = Path::new(path);
            path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
        });

        config.validate()?;
        Ok(config)
    }

    /// 从TOML字符串加载，不读取环境变量
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = ConfigBuilder::builder()
            .add_source(
                ConfigBuilder::try_from(&AppConfig::default()).context("生成默认配置失败")?,
            )
            .add_source(File::from_str(toml_str, FileFormat::Toml))
            .build()
            .context("解析TOML配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.dispatcher
            .validate()
            .context("Dispatcher配置验证失败")?;
        self.runner.validate().context("Runner配置验证失败")?;
        self.node.validate().context("节点配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        self.logging.validate().context("日志配置验证失败")?;

        if self.runner.heartbeat_interval_seconds >= self.dispatcher.heartbeat_timeout_seconds {
            return Err(anyhow::anyhow!(
                "Runner心跳间隔({}秒)必须小于心跳超时({}秒)",
                self.runner.heartbeat_interval_seconds,
                self.dispatcher.heartbeat_timeout_seconds
            ));
        }

        Ok(())
    }
}
