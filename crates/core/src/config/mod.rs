//! 配置管理
//!
//! 加载顺序：内置默认值 → TOML配置文件 → `FILEFLOW_` 前缀的环境变量
//! （层级用 `__` 分隔，例如 `FILEFLOW_DISPATCHER__HEARTBEAT_TIMEOUT_SECONDS=90`）。

pub mod models;


pub use models::{
    ApiConfig, AppConfig, DispatcherConfig, LoggingConfig, NodeConfig, RunnerConfig,
};
