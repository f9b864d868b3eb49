//! 调度核心的指标
//!
//! 指标通过 `metrics` 门面记录；`init_metrics` 安装Prometheus记录器，
//! 返回的句柄由API层渲染到 `/metrics`。

use anyhow::Result;
use metrics::{counter, gauge, Counter, Gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// 安装全局Prometheus记录器
pub fn init_metrics() -> Result<PrometheusHandle> {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::set_global_recorder(recorder)
        .map_err(|e| anyhow::anyhow!("安装指标记录器失败: {}", e))?;

    info!("Prometheus指标记录器已安装");
    Ok(handle)
}

/// 租约与领取相关的指标
#[derive(Clone)]
pub struct MetricsCollector {
    claims_total: Counter,
    claim_conflicts_total: Counter,
    leases_completed_total: Counter,
    leases_cancelled_total: Counter,
    leases_expired_total: Counter,
    files_requeued_total: Counter,
    leases_active: Gauge,
    log_lines_total: Counter,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            claims_total: counter!("fileflow_claims_total"),
            claim_conflicts_total: counter!("fileflow_claim_conflicts_total"),
            leases_completed_total: counter!("fileflow_leases_completed_total"),
            leases_cancelled_total: counter!("fileflow_leases_cancelled_total"),
            leases_expired_total: counter!("fileflow_leases_expired_total"),
            files_requeued_total: counter!("fileflow_files_requeued_total"),
            leases_active: gauge!("fileflow_leases_active"),
            log_lines_total: counter!("fileflow_log_lines_total"),
        }
    }

    pub fn record_claim(&self) {
        self.claims_total.increment(1);
    }

    /// 候选文件在CAS时已被其他节点领取
    pub fn record_claim_conflict(&self) {
        self.claim_conflicts_total.increment(1);
    }

    pub fn record_completed(&self) {
        self.leases_completed_total.increment(1);
    }

    pub fn record_cancelled(&self) {
        self.leases_cancelled_total.increment(1);
    }

    pub fn record_expired(&self) {
        self.leases_expired_total.increment(1);
    }

    pub fn record_requeued(&self, count: u64) {
        self.files_requeued_total.increment(count);
    }

    pub fn set_active_leases(&self, count: usize) {
        self.leases_active.set(count as f64);
    }

    pub fn record_log_line(&self) {
        self.log_lines_total.increment(1);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
