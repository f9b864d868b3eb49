use thiserror::Error;
use uuid::Uuid;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("库未找到: {id}")]
    LibraryNotFound { id: Uuid },

    #[error("库文件未找到: {id}")]
    LibraryFileNotFound { id: Uuid },

    #[error("处理节点未找到: {id}")]
    NodeNotFound { id: Uuid },

    #[error("Runner未找到: {id}")]
    RunnerNotFound { id: Uuid },

    #[error("持久化错误: {0}")]
    Persistence(String),

    #[error("Runner启动失败: {0}")]
    RunnerLaunch(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 是否属于需要运维人员介入的错误（配置或持久化层故障）
    pub fn is_operator_facing(&self) -> bool {
        matches!(
            self,
            SchedulerError::Configuration(_) | SchedulerError::Persistence(_)
        )
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
