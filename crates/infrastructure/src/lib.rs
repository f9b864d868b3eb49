//! # FileFlow Infrastructure
//!
//! 仓储的内存实现、按文件保存的处理日志，以及Prometheus指标。

pub mod database;
pub mod log_store;
pub mod observability;

pub use database::memory::{
    InMemoryLibraryFileRepository, InMemoryLibraryRepository, InMemoryProcessingNodeRepository,
};
pub use log_store::FileLogStore;
pub use observability::{init_metrics, MetricsCollector};
