//! # FileFlow Runner
//!
//! 处理节点一侧：轮询领取文件、构建启动参数、启动Runner进程，
//! 以及Runner进程内的流水线执行、心跳与日志上报。

pub mod components;
pub mod execution;
pub mod launch;
pub mod launcher;
pub mod node_agent;
pub mod shell;

pub use components::{DispatcherClient, HeartbeatManager, StopReason};
pub use execution::{run_runner, ClientReporter};
pub use launch::LaunchParametersBuilder;
pub use launcher::{LaunchedRunner, ProcessRunnerLauncher, RemoteRunnerLauncher, RunnerLauncher};
pub use node_agent::{NextFileSource, NodeAgent, NodeAgentConfig};
pub use shell::{RunnerReporter, RunnerShell, ShellOutcome};
