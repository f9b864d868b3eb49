//! 租约管理
//!
//! 租约表由一把 `Mutex<LeaseTable>` 保护，持锁期间不做任何持久化I/O，
//! 心跳、日志追加和执行器查询不会被存储延迟阻塞。
//!
//! 领取分两步：锁内把候选文件登记为预留（同时进入排除集），释放锁后执行
//! `compare_and_set_status`，再回到锁内把预留转成租约或撤销。
//! 排他性由这两者共同保证：预留和租约拒绝本进程内的重复领取，CAS拒绝其他进程已改动的文件。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fileflow_core::{
    traits::LibraryFileRepository, Clock, ExecutorInfo, ExecutorSnapshot, FileStatus, Lease,
    LeaseState, LibraryFile, ProcessingNode, SchedulerError, SchedulerResult, StatusTransition,
};
use fileflow_infrastructure::MetricsCollector;

#[derive(Debug, Clone)]
pub struct LeaseManagerConfig {
    pub heartbeat_timeout: Duration,
    /// 单次领取最多执行的CAS次数，已被本进程领取的候选不计入
    pub claim_attempts: usize,
}

impl Default for LeaseManagerConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::seconds(60),
            claim_attempts: 5,
        }
    }
}

/// 领取结果
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed { lease: Lease, file: LibraryFile },
    /// 该runner已持有租约，返回原有文件
    Existing(Lease),
    /// 同一runner的另一个领取请求尚未结束
    RunnerBusy,
    /// 候选都已被领取，或CAS冲突次数达到上限
    Exhausted,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// 被丢弃的租约，调用方据此关闭推送通道
    pub dropped: Vec<Lease>,
    pub requeued_files: usize,
}

#[derive(Debug, Default)]
struct LeaseTable {
    by_file: HashMap<Uuid, Lease>,
    by_runner: HashMap<Uuid, Uuid>,
    executors: HashMap<Uuid, ExecutorInfo>,
    /// 正在执行CAS的领取：文件 → runner
    reserved: HashMap<Uuid, Uuid>,
}

impl LeaseTable {
    fn insert(&mut self, lease: Lease, executor: ExecutorInfo) {
        self.by_runner
            .insert(lease.runner_uid, lease.library_file_uid);
        self.executors.insert(lease.runner_uid, executor);
        self.by_file.insert(lease.library_file_uid, lease);
    }

    fn remove_file(&mut self, file_uid: &Uuid) -> Option<Lease> {
        let lease = self.by_file.remove(file_uid)?;
        self.by_runner.remove(&lease.runner_uid);
        self.executors.remove(&lease.runner_uid);
        Some(lease)
    }

    /// 仅当文件仍由该runner持有时移除
    fn remove_if_held(&mut self, file_uid: &Uuid, runner_uid: &Uuid) -> Option<Lease> {
        if self.by_runner.get(runner_uid) != Some(file_uid) {
            return None;
        }
        self.remove_file(file_uid)
    }

    fn file_of_runner(&self, runner_uid: &Uuid) -> Option<Uuid> {
        self.by_runner.get(runner_uid).copied()
    }

    fn lease_of_runner(&self, runner_uid: &Uuid) -> Option<&Lease> {
        let file_uid = self.by_runner.get(runner_uid)?;
        self.by_file.get(file_uid)
    }

    fn is_taken(&self, file_uid: &Uuid) -> bool {
        self.by_file.contains_key(file_uid) || self.reserved.contains_key(file_uid)
    }

    fn is_claiming(&self, runner_uid: &Uuid) -> bool {
        self.reserved.values().any(|runner| runner == runner_uid)
    }
}

pub struct LeaseManager {
    files: Arc<dyn LibraryFileRepository>,
    clock: Arc<dyn Clock>,
    config: LeaseManagerConfig,
    metrics: MetricsCollector,
    table: Mutex<LeaseTable>,
}

impl LeaseManager {
    pub fn new(
        files: Arc<dyn LibraryFileRepository>,
        clock: Arc<dyn Clock>,
        config: LeaseManagerConfig,
    ) -> Self {
        Self {
            files,
            clock,
            config,
            metrics: MetricsCollector::new(),
            table: Mutex::new(LeaseTable::default()),
        }
    }

    pub fn config(&self) -> &LeaseManagerConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// 当前持有租约或正在领取的文件，排序时排除
    pub async fn exclusions(&self) -> HashSet<Uuid> {
        let table = self.table.lock().await;
        table
            .by_file
            .keys()
            .chain(table.reserved.keys())
            .copied()
            .collect()
    }

    pub async fn executors(&self) -> Vec<ExecutorInfo> {
        let table = self.table.lock().await;
        let mut executors: Vec<ExecutorInfo> = table.executors.values().cloned().collect();
        executors.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        executors
    }

    pub async fn lease_for_runner(&self, runner_uid: Uuid) -> Option<Lease> {
        self.table.lock().await.lease_of_runner(&runner_uid).cloned()
    }

    pub async fn lease_for_file(&self, file_uid: Uuid) -> Option<Lease> {
        self.table.lock().await.by_file.get(&file_uid).cloned()
    }

    pub async fn active_count(&self) -> usize {
        self.table.lock().await.by_file.len()
    }

    /// 按顺序尝试领取候选文件，第一个CAS成功的即为结果
    ///
    /// 已被本进程领取或预留的候选直接跳过，只有CAS失败计入 `claim_attempts`。
    pub async fn claim_next(
        &self,
        node: &ProcessingNode,
        runner_uid: Uuid,
        candidates: &[LibraryFile],
    ) -> SchedulerResult<ClaimOutcome> {
        let now = self.clock.now();
        let mut conflicts = 0;

        for candidate in candidates {
            if conflicts >= self.config.claim_attempts {
                break;
            }

            {
                let mut table = self.table.lock().await;
                if let Some(lease) = table.lease_of_runner(&runner_uid) {
                    debug!(runner_uid = %runner_uid, file_uid = %lease.library_file_uid, "runner已持有租约，返回原文件");
                    return Ok(ClaimOutcome::Existing(lease.clone()));
                }
                if table.is_claiming(&runner_uid) {
                    return Ok(ClaimOutcome::RunnerBusy);
                }
                if table.is_taken(&candidate.uid) {
                    continue;
                }
                table.reserved.insert(candidate.uid, runner_uid);
            }

            let transition = StatusTransition::claim(node.uid, runner_uid, now);
            let written = self
                .files
                .compare_and_set_status(candidate.uid, &transition)
                .await;

            let mut table = self.table.lock().await;
            table.reserved.remove(&candidate.uid);
            if !written? {
                conflicts += 1;
                self.metrics.record_claim_conflict();
                debug!(file_uid = %candidate.uid, "候选文件已被领取，尝试下一个");
                continue;
            }

            let mut file = candidate.clone();
            file.apply_transition(&transition);

            let lease = Lease::new(
                file.uid,
                file.library_uid,
                node.uid,
                runner_uid,
                now,
                self.config.heartbeat_timeout,
            );
            let executor = ExecutorInfo {
                runner_uid,
                node_uid: node.uid,
                library_file_uid: file.uid,
                library_uid: file.library_uid,
                library_file_name: file.name.clone(),
                current_step: 0,
                current_step_name: None,
                progress: 0.0,
                started_at: now,
                last_update: now,
            };
            table.insert(lease.clone(), executor);

            self.metrics.record_claim();
            self.metrics.set_active_leases(table.by_file.len());
            info!(
                file = %file.name,
                file_uid = %file.uid,
                node = %node.name,
                runner_uid = %runner_uid,
                "文件已领取"
            );
            return Ok(ClaimOutcome::Claimed { lease, file });
        }

        Ok(ClaimOutcome::Exhausted)
    }

    /// 心跳续期，未知或已结束的runner返回false
    pub async fn heartbeat(&self, runner_uid: Uuid, snapshot: &ExecutorSnapshot) -> bool {
        let mut table = self.table.lock().await;
        let Some(file_uid) = table.file_of_runner(&runner_uid) else {
            debug!(runner_uid = %runner_uid, "未知runner的心跳");
            return false;
        };

        let now = self.clock.now();
        let renewed = table
            .by_file
            .get_mut(&file_uid)
            .is_some_and(|lease| lease.renew(now, self.config.heartbeat_timeout));
        if renewed {
            if let Some(executor) = table.executors.get_mut(&runner_uid) {
                executor.apply_snapshot(snapshot, now);
            }
        }
        renewed
    }

    /// Runner上报最终状态
    ///
    /// 持久化失败时保留租约，Runner可以重试上报。
    pub async fn complete(&self, runner_uid: Uuid, status: FileStatus) -> SchedulerResult<Lease> {
        if !status.is_outcome() {
            return Err(SchedulerError::Internal(format!(
                "{status:?} 不是有效的处理结果"
            )));
        }

        let held = self
            .lease_for_runner(runner_uid)
            .await
            .ok_or(SchedulerError::RunnerNotFound { id: runner_uid })?;
        let file_uid = held.library_file_uid;

        let transition =
            StatusTransition::finish(held.node_uid, runner_uid, status, self.clock.now());
        if !self
            .files
            .compare_and_set_status(file_uid, &transition)
            .await?
        {
            warn!(
                file_uid = %file_uid,
                runner_uid = %runner_uid,
                "文件状态已被外部修改，未写入处理结果"
            );
        }

        let mut table = self.table.lock().await;
        // 写入期间租约可能已过期或被取消
        let mut lease = table.remove_if_held(&file_uid, &runner_uid).unwrap_or(held);
        lease.finish(LeaseState::Completed);
        self.metrics.record_completed();
        self.metrics.set_active_leases(table.by_file.len());
        info!(file_uid = %file_uid, runner_uid = %runner_uid, status = ?status, "文件处理完成");
        Ok(lease)
    }

    pub async fn cancel_file(&self, file_uid: Uuid) -> SchedulerResult<Option<Lease>> {
        let lease = self.table.lock().await.remove_file(&file_uid);
        self.finish_cancel(lease).await
    }

    pub async fn cancel_runner(&self, runner_uid: Uuid) -> SchedulerResult<Option<Lease>> {
        let lease = {
            let mut table = self.table.lock().await;
            table
                .file_of_runner(&runner_uid)
                .and_then(|file_uid| table.remove_file(&file_uid))
        };
        self.finish_cancel(lease).await
    }

    /// 取消立即生效：租约已移除，再尝试把文件放回队列
    async fn finish_cancel(&self, lease: Option<Lease>) -> SchedulerResult<Option<Lease>> {
        let Some(mut lease) = lease else {
            return Ok(None);
        };
        lease.finish(LeaseState::Cancelled);
        self.metrics.record_cancelled();
        self.metrics.set_active_leases(self.active_count().await);

        let file_uid = lease.library_file_uid;
        let transition = StatusTransition::requeue(lease.runner_uid, self.clock.now());
        match self.files.compare_and_set_status(file_uid, &transition).await {
            Ok(true) => self.metrics.record_requeued(1),
            Ok(false) => debug!(file_uid = %file_uid, "文件已不是处理中状态，保持原状态"),
            // 对账巡检会回收该文件
            Err(e) => warn!(file_uid = %file_uid, error = %e, "取消后重新排队失败"),
        }

        info!(file_uid = %file_uid, runner_uid = %lease.runner_uid, "租约已取消");
        Ok(Some(lease))
    }

    /// 回收超过截止时间没有心跳的租约
    pub async fn expire_overdue(&self) -> SchedulerResult<Vec<Lease>> {
        let now = self.clock.now();
        let (mut expired, active) = {
            let mut table = self.table.lock().await;
            let overdue: Vec<Uuid> = table
                .by_file
                .values()
                .filter(|lease| lease.is_expired(now))
                .map(|lease| lease.library_file_uid)
                .collect();
            let expired: Vec<Lease> = overdue
                .iter()
                .filter_map(|file_uid| table.remove_file(file_uid))
                .collect();
            (expired, table.by_file.len())
        };

        for lease in &mut expired {
            lease.finish(LeaseState::Expired);
            self.metrics.record_expired();
            let file_uid = lease.library_file_uid;

            warn!(
                file_uid = %file_uid,
                runner_uid = %lease.runner_uid,
                node_uid = %lease.node_uid,
                last_heartbeat = ?lease.last_heartbeat,
                "租约心跳超时，文件重新排队"
            );

            let transition = StatusTransition::requeue(lease.runner_uid, now);
            match self.files.compare_and_set_status(file_uid, &transition).await {
                Ok(true) => self.metrics.record_requeued(1),
                Ok(false) => debug!(file_uid = %file_uid, "过期租约的文件状态已变化"),
                Err(e) => warn!(file_uid = %file_uid, error = %e, "过期文件重新排队失败"),
            }
        }

        self.metrics.set_active_leases(active);
        Ok(expired)
    }

    /// 对账：丢弃持久化状态已不属于自己的租约，回收没有租约的处理中文件
    ///
    /// `grace` 为零时回收所有孤儿文件，用于启动恢复。存储读取都在锁外进行，
    /// 回到锁内时只处理仍与快照一致的租约。
    pub async fn reconcile(&self, grace: Duration) -> SchedulerResult<ReconcileReport> {
        let now = self.clock.now();
        let mut report = ReconcileReport::default();

        let leased: Vec<(Uuid, Uuid)> = {
            let table = self.table.lock().await;
            table
                .by_file
                .values()
                .map(|lease| (lease.library_file_uid, lease.runner_uid))
                .collect()
        };

        let mut stale = Vec::new();
        for (file_uid, runner_uid) in leased {
            let still_ours = self.files.get_by_id(file_uid).await?.is_some_and(|file| {
                file.status == FileStatus::Processing && file.worker_uid == Some(runner_uid)
            });
            if !still_ours {
                stale.push((file_uid, runner_uid));
            }
        }

        if !stale.is_empty() {
            let mut table = self.table.lock().await;
            for (file_uid, runner_uid) in stale {
                if let Some(lease) = table.remove_if_held(&file_uid, &runner_uid) {
                    report.dropped.push(lease);
                    warn!(file_uid = %file_uid, runner_uid = %runner_uid, "持久化状态与租约不一致，丢弃租约");
                }
            }
        }

        // 先读存储再取租约快照：读到的处理中文件若属于某个领取，此时已在快照中
        let processing = self.files.get_by_status(&[FileStatus::Processing]).await?;
        let held = self.exclusions().await;
        for file in processing {
            if held.contains(&file.uid) {
                continue;
            }
            let started = file.processing_started.unwrap_or(file.date_created);
            if now - started < grace {
                continue;
            }
            // 限定观察到的runner，避免误伤随后被重新领取的文件
            let transition = match file.worker_uid {
                Some(worker_uid) => StatusTransition::requeue(worker_uid, now),
                None => StatusTransition::requeue_orphan(now),
            };
            if self.files.compare_and_set_status(file.uid, &transition).await? {
                report.requeued_files += 1;
                warn!(file = %file.name, file_uid = %file.uid, "处理中文件没有租约，重新排队");
            }
        }

        if report.requeued_files > 0 {
            self.metrics.record_requeued(report.requeued_files as u64);
        }
        self.metrics.set_active_leases(self.active_count().await);
        if report != ReconcileReport::default() {
            info!(
                dropped = report.dropped.len(),
                requeued = report.requeued_files,
                "租约对账完成"
            );
        }
        Ok(report)
    }
}
