use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::signal;
use tracing::{error, info};

use fileflow::app::{AppMode, Application};
use fileflow::shutdown::ShutdownManager;
use fileflow_core::{init_logging, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("fileflow")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分布式文件处理调度系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时按默认位置查找"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["server", "node"])
                .default_value("server"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let config = AppConfig::load(config_path)
        .with_context(|| format!("加载配置失败: {}", config_path.unwrap_or("<默认位置>")))?;

    let log_level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or(config.logging.level.as_str());
    let log_format = matches
        .get_one::<String>("log-format")
        .map(String::as_str)
        .unwrap_or(config.logging.format.as_str());
    init_logging(log_level, log_format)?;

    let mode = match matches.get_one::<String>("mode").map(String::as_str) {
        Some("node") => AppMode::Node,
        _ => AppMode::Server,
    };
    info!("启动分布式文件处理调度系统，模式: {:?}", mode);

    let app = Arc::new(Application::new(config, mode)?);
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe();
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {:#}", e);
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown();

    if shutdown_manager
        .wait_for(app_handle, Duration::from_secs(30))
        .await
    {
        info!("应用已优雅关闭");
    }
    info!("分布式文件处理调度系统已退出");
    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("收到Ctrl+C信号"),
        _ = terminate => info!("收到SIGTERM信号"),
    }
}
