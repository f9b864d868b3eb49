//! # FileFlow Core
//!
//! 文件处理调度系统的基础库：数据模型、调度匹配器、仓储接口、错误类型、配置与日志初始化。
//!
//! 其余crate（dispatcher、runner、api、infrastructure）都只依赖这里定义的类型与trait，
//! 彼此之间通过构造函数注入协作。

pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::*;
pub use errors::*;
pub use logging::{init_logging, init_logging_from_config};
pub use models::*;
pub use traits::{Clock, ManualClock, SystemClock};
