//! 持久化协作方接口
//!
//! 调度核心只依赖这里的三个仓储trait，不关心存储引擎。
//! `LibraryFileRepository::compare_and_set_status` 是唯一要求原子性的操作：
//! 实现必须在同一步骤内检查前置状态并写入，租约管理器依赖它保证一个文件只被领取一次。

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{FileStatus, Library, LibraryFile, ProcessingNode, StatusTransition};
use crate::SchedulerResult;

#[async_trait]
pub trait LibraryRepository: Send + Sync {
    async fn list(&self) -> SchedulerResult<Vec<Library>>;

    async fn get_by_id(&self, uid: Uuid) -> SchedulerResult<Option<Library>>;

    async fn upsert(&self, library: &Library) -> SchedulerResult<()>;
}

#[async_trait]
pub trait ProcessingNodeRepository: Send + Sync {
    async fn list(&self) -> SchedulerResult<Vec<ProcessingNode>>;

    async fn get_by_id(&self, uid: Uuid) -> SchedulerResult<Option<ProcessingNode>>;

    async fn upsert(&self, node: &ProcessingNode) -> SchedulerResult<()>;
}

#[async_trait]
pub trait LibraryFileRepository: Send + Sync {
    async fn get_by_id(&self, uid: Uuid) -> SchedulerResult<Option<LibraryFile>>;

    /// 按状态查询，结果按发现时间升序
    async fn get_by_status(&self, statuses: &[FileStatus]) -> SchedulerResult<Vec<LibraryFile>>;

    async fn upsert(&self, file: &LibraryFile) -> SchedulerResult<()>;

    /// 原子地比较并写入文件状态与节点分配
    ///
    /// 当前状态满足 `transition` 的前置条件时写入并返回 `true`，
    /// 否则不做修改返回 `false`。文件不存在时返回 `LibraryFileNotFound`。
    async fn compare_and_set_status(
        &self,
        uid: Uuid,
        transition: &StatusTransition,
    ) -> SchedulerResult<bool>;
}
