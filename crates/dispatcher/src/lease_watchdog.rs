use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use fileflow_core::{DispatcherConfig, SchedulerResult};

use crate::lease_manager::{LeaseManager, ReconcileReport};
use crate::runner_hub::RunnerHub;

/// 租约巡检配置
#[derive(Debug, Clone)]
pub struct LeaseWatchdogConfig {
    /// 巡检间隔（秒）
    pub sweep_interval_seconds: u64,
    /// 孤儿文件回收宽限期
    pub reconcile_grace: chrono::Duration,
    /// 结束文件的日志保留时长
    pub log_retention: chrono::Duration,
}

impl Default for LeaseWatchdogConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 10,
            reconcile_grace: chrono::Duration::minutes(5),
            log_retention: chrono::Duration::hours(24),
        }
    }
}

impl From<&DispatcherConfig> for LeaseWatchdogConfig {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            sweep_interval_seconds: config.sweep_interval_seconds,
            reconcile_grace: config.reconcile_grace(),
            log_retention: config.log_retention(),
        }
    }
}

/// 租约巡检：过期回收与持久化对账
///
/// 过期只在这里检测，领取路径不会顺带回收租约。停止后不能再次启动。
pub struct LeaseWatchdog {
    leases: Arc<LeaseManager>,
    hub: Arc<RunnerHub>,
    config: LeaseWatchdogConfig,
    running: Arc<RwLock<bool>>,
    stop_tx: watch::Sender<bool>,
}

impl LeaseWatchdog {
    pub fn new(
        leases: Arc<LeaseManager>,
        hub: Arc<RunnerHub>,
        config: Option<LeaseWatchdogConfig>,
    ) -> Self {
        Self {
            leases,
            hub,
            config: config.unwrap_or_default(),
            running: Arc::new(RwLock::new(false)),
            stop_tx: watch::channel(false).0,
        }
    }

    /// 启动时把上次运行遗留的处理中文件放回队列
    pub async fn recover_on_startup(&self) -> SchedulerResult<ReconcileReport> {
        let report = self.leases.reconcile(chrono::Duration::zero()).await?;
        info!(
            requeued = report.requeued_files,
            "启动恢复完成"
        );
        Ok(report)
    }

    /// 执行一轮巡检，返回过期的租约数
    ///
    /// 过期和对账丢弃的租约都会通知对应runner并关闭其推送通道，
    /// 保留期已过的文件日志在这里回收。
    pub async fn sweep_once(&self) -> SchedulerResult<usize> {
        let expired = self.leases.expire_overdue().await?;
        for lease in &expired {
            self.hub.release(lease, "租约已过期").await;
        }
        let report = self.leases.reconcile(self.config.reconcile_grace).await?;
        for lease in &report.dropped {
            self.hub.release(lease, "文件状态已被外部修改").await;
        }
        self.hub.evict_logs(self.config.log_retention).await;
        Ok(expired.len())
    }

    pub async fn start(&self) -> SchedulerResult<()> {
        let mut stop_rx = self.stop_tx.subscribe();
        if *stop_rx.borrow_and_update() {
            return Ok(());
        }
        info!("启动租约巡检");
        *self.running.write().await = true;

        let mut ticker = interval(Duration::from_secs(self.config.sweep_interval_seconds));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(expired) if expired > 0 => info!("回收了 {} 个过期租约", expired),
                        Ok(_) => {}
                        Err(e) => error!("租约巡检时出错: {}", e),
                    }
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        info!("收到停止信号，退出租约巡检循环");
                        break;
                    }
                }
            }
        }

        *self.running.write().await = false;
        Ok(())
    }

    pub async fn stop(&self) {
        info!("停止租约巡检");
        self.stop_tx.send_replace(true);
        *self.running.write().await = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
