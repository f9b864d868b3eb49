use std::sync::Arc;

use tracing::{debug, info, warn};

use fileflow_core::{
    traits::{LibraryFileRepository, LibraryRepository, ProcessingNodeRepository},
    Clock, LibraryFile, NextFilePreviewRequest, NextFileRequest, NextFileResult, NextFileStatus,
    ProcessingNode, SchedulerError, SchedulerResult,
};
use fileflow_infrastructure::FileLogStore;

use crate::lease_manager::{ClaimOutcome, LeaseManager};
use crate::ranking::{CandidateRanker, NextFileFilter, SystemInfo};

#[derive(Debug, Clone)]
pub struct NextFileConfig {
    pub licensed_for_processing_order: bool,
}

impl Default for NextFileConfig {
    fn default() -> Self {
        Self {
            licensed_for_processing_order: true,
        }
    }
}

/// 处理节点领取下一个文件的入口
pub struct NextFileService {
    libraries: Arc<dyn LibraryRepository>,
    nodes: Arc<dyn ProcessingNodeRepository>,
    files: Arc<dyn LibraryFileRepository>,
    leases: Arc<LeaseManager>,
    logs: FileLogStore,
    clock: Arc<dyn Clock>,
    ranker: CandidateRanker,
    config: NextFileConfig,
}

impl NextFileService {
    pub fn new(
        libraries: Arc<dyn LibraryRepository>,
        nodes: Arc<dyn ProcessingNodeRepository>,
        files: Arc<dyn LibraryFileRepository>,
        leases: Arc<LeaseManager>,
        logs: FileLogStore,
        clock: Arc<dyn Clock>,
        config: NextFileConfig,
    ) -> Self {
        Self {
            libraries,
            nodes,
            files,
            leases,
            logs,
            clock,
            ranker: CandidateRanker::new(),
            config,
        }
    }

    /// 节点准入检查，通过时返回节点（必要时记录新上报的版本）
    async fn admit(
        &self,
        request: &NextFileRequest,
    ) -> SchedulerResult<Result<ProcessingNode, NextFileStatus>> {
        let Some(mut node) = self.nodes.get_by_id(request.node_uid).await? else {
            warn!(node_uid = %request.node_uid, "未登记的节点请求文件");
            return Ok(Err(NextFileStatus::NodeNotFound));
        };
        if !node.enabled {
            debug!(node = %node.name, "节点未启用");
            return Ok(Err(NextFileStatus::NodeNotEnabled));
        }

        let version = request.node_version.trim();
        if version.is_empty() {
            warn!(node = %node.name, "节点未上报版本");
            return Ok(Err(NextFileStatus::NodeUnversioned));
        }
        if node.version != version {
            info!(node = %node.name, old = %node.version, new = %version, "节点版本变更");
            node.version = version.to_string();
            self.nodes.upsert(&node).await?;
        }

        Ok(Ok(node))
    }

    async fn system_info(&self) -> SchedulerResult<SystemInfo> {
        Ok(SystemInfo {
            libraries: self.libraries.list().await?,
            executors: self.leases.executors().await,
            licensed_for_processing_order: self.config.licensed_for_processing_order,
        })
    }

    /// 领取下一个文件
    ///
    /// 同一个 `runner_uid` 重复请求时返回它已持有的文件。候选被并发领取完时
    /// 按最新的排除集重新排序，只有排序结果为空才返回 `NoFile`。
    pub async fn get_next(&self, request: &NextFileRequest) -> SchedulerResult<NextFileResult> {
        let node = match self.admit(request).await? {
            Ok(node) => node,
            Err(status) => return Ok(NextFileResult::status(status)),
        };

        if let Some(lease) = self.leases.lease_for_runner(request.runner_uid).await {
            return self.existing(lease.library_file_uid).await;
        }

        let mut round = 0usize;
        loop {
            round += 1;
            let ranked = self.rank_all(&node).await?;
            if ranked.is_empty() {
                debug!(node = %node.name, round, "没有可处理的文件");
                return Ok(NextFileResult::no_file());
            }

            match self
                .leases
                .claim_next(&node, request.runner_uid, &ranked)
                .await?
            {
                ClaimOutcome::Claimed { file, .. } => {
                    self.logs.clear(file.uid).await;
                    return Ok(NextFileResult::success(file));
                }
                ClaimOutcome::Existing(lease) => {
                    return self.existing(lease.library_file_uid).await
                }
                ClaimOutcome::RunnerBusy => {
                    debug!(runner_uid = %request.runner_uid, "runner的另一个领取请求尚未结束");
                    return Ok(NextFileResult::no_file());
                }
                ClaimOutcome::Exhausted => {
                    debug!(node = %node.name, round, "候选文件均已被领取，重新排序");
                }
            }
        }
    }

    /// 以当前排除集对全部候选排序
    async fn rank_all(&self, node: &ProcessingNode) -> SchedulerResult<Vec<LibraryFile>> {
        let filter = NextFileFilter::new(self.system_info().await?)
            .exclude(self.leases.exclusions().await)
            .page(0, usize::MAX);
        let candidates = self.files.get_by_status(&filter.statuses).await?;
        Ok(self.ranker.rank(
            node,
            &filter,
            candidates,
            self.clock.now_local(),
            self.clock.now(),
        ))
    }

    async fn existing(&self, file_uid: uuid::Uuid) -> SchedulerResult<NextFileResult> {
        match self.files.get_by_id(file_uid).await? {
            Some(file) => Ok(NextFileResult::success(file)),
            None => Err(SchedulerError::LibraryFileNotFound { id: file_uid }),
        }
    }

    /// 按排序规则预览一页候选文件，不领取
    pub async fn preview(
        &self,
        request: &NextFilePreviewRequest,
    ) -> SchedulerResult<Vec<LibraryFile>> {
        let node = self
            .nodes
            .get_by_id(request.node_uid)
            .await?
            .ok_or(SchedulerError::NodeNotFound {
                id: request.node_uid,
            })?;

        let mut filter = NextFileFilter::new(self.system_info().await?)
            .exclude(self.leases.exclusions().await)
            .page(request.skip, request.rows.max(1));
        filter.name_filter = request.name_filter.clone();
        filter.max_size_bytes = request.max_size_bytes;

        let candidates = self.files.get_by_status(&filter.statuses).await?;
        Ok(self.ranker.rank(
            &node,
            &filter,
            candidates,
            self.clock.now_local(),
            self.clock.now(),
        ))
    }
}
