use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use fileflow_core::{init_logging, AppConfig, RunnerLaunchParameters};
use fileflow_runner::{run_runner, ShellOutcome};

/// 处理单个文件的Runner进程
#[derive(Debug, Parser)]
#[command(name = "fileflow-runner", version, about = "FileFlow Runner：执行单个文件的处理流水线")]
struct Args {
    /// 节点写入的启动参数文件（JSON）
    #[arg(long, value_name = "FILE")]
    params: PathBuf,

    /// 配置文件路径，未指定时使用启动参数中节点的配置文件
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let content = tokio::fs::read(&args.params)
        .await
        .with_context(|| format!("读取启动参数失败: {}", args.params.display()))?;
    let params: RunnerLaunchParameters =
        serde_json::from_slice(&content).context("解析启动参数失败")?;

    let config_path = args
        .config
        .or_else(|| params.config_path.clone())
        .map(|path| path.to_string_lossy().into_owned());
    let config = AppConfig::load(config_path.as_deref())
        .with_context(|| format!("加载配置失败: {}", config_path.as_deref().unwrap_or("<默认位置>")))?;
    init_logging(&config.logging.level, &config.logging.format)?;

    let outcome = run_runner(params, &config.runner)
        .await
        .context("Runner执行失败")?;
    match outcome {
        ShellOutcome::Finished(status) => info!("处理完成: {:?}", status),
        ShellOutcome::Stopped(reason) => info!("处理被停止: {:?}", reason),
    }
    Ok(())
}
