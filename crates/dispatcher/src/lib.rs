//! # FileFlow Dispatcher
//!
//! 服务端调度核心：候选文件排序、租约管理、租约巡检，以及与Runner之间的心跳/日志/取消通道。
//!
//! 依赖关系（从叶子开始）：
//!
//! ```text
//! CandidateRanker → NextFileService → LeaseManager ← RunnerHub
//!                                          ↑
//!                                    LeaseWatchdog
//! ```

pub mod lease_manager;
pub mod lease_watchdog;
pub mod next_file;
pub mod ranking;
pub mod runner_hub;

#[cfg(test)]
pub mod test_utils;

pub use lease_manager::{ClaimOutcome, LeaseManager, LeaseManagerConfig, ReconcileReport};
pub use lease_watchdog::{LeaseWatchdog, LeaseWatchdogConfig};
pub use next_file::{NextFileConfig, NextFileService};
pub use ranking::{CandidateRanker, NextFileFilter, SystemInfo};
pub use runner_hub::{RunnerChannels, RunnerHub};
