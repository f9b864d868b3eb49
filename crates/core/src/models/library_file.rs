use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Library;

/// 库文件状态
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FileStatus {
    #[default]
    Unprocessed,
    Processing,
    Processed,
    ProcessingFailed,
    FlowNotFound,
    Duplicate,
    MappingIssue,
    MissingLibrary,
    ReprocessByFlow,
}

impl FileStatus {
    /// 通常可被领取的状态集合
    pub const CLAIMABLE: [FileStatus; 2] = [FileStatus::Unprocessed, FileStatus::ReprocessByFlow];

    pub fn is_claimable(self) -> bool {
        Self::CLAIMABLE.contains(&self)
    }

    /// 流水线给出的最终结果状态
    pub fn is_outcome(self) -> bool {
        !matches!(
            self,
            FileStatus::Unprocessed | FileStatus::Processing | FileStatus::ReprocessByFlow
        )
    }
}

/// 文件标记位
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct FileFlags(u32);

impl FileFlags {
    /// 绕过启用状态、调度表、大小与检测规则
    pub const FORCE_PROCESSING: FileFlags = FileFlags(1);

    pub const fn empty() -> Self {
        FileFlags(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: FileFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: FileFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: FileFlags) {
        self.0 &= !other.0;
    }
}

/// 库文件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryFile {
    pub uid: Uuid,
    pub name: String,
    pub library_uid: Uuid,
    pub library_name: String,
    pub status: FileStatus,
    pub original_size: u64,
    pub creation_time: DateTime<Utc>,
    pub last_write_time: DateTime<Utc>,
    /// 扫描发现时间，AsFound 顺序依据
    pub date_created: DateTime<Utc>,
    #[serde(default)]
    pub flags: FileFlags,
    pub node_uid: Option<Uuid>,
    pub worker_uid: Option<Uuid>,
    pub processing_started: Option<DateTime<Utc>>,
    pub processing_ended: Option<DateTime<Utc>>,
}

impl LibraryFile {
    pub fn new(library: &Library, name: impl Into<String>, original_size: u64) -> Self {
        let now = Utc::now();
        Self {
            uid: Uuid::new_v4(),
            name: name.into(),
            library_uid: library.uid,
            library_name: library.name.clone(),
            status: FileStatus::Unprocessed,
            original_size,
            creation_time: now,
            last_write_time: now,
            date_created: now,
            flags: FileFlags::empty(),
            node_uid: None,
            worker_uid: None,
            processing_started: None,
            processing_ended: None,
        }
    }

    pub fn is_forced(&self) -> bool {
        self.flags.contains(FileFlags::FORCE_PROCESSING)
    }

    /// 应用一次状态迁移，不检查前置条件
    pub fn apply_transition(&mut self, transition: &StatusTransition) {
        self.status = transition.status;
        self.node_uid = transition.node_uid;
        self.worker_uid = transition.worker_uid;
        match transition.status {
            FileStatus::Processing => {
                self.processing_started = Some(transition.at);
                self.processing_ended = None;
            }
            FileStatus::Unprocessed | FileStatus::ReprocessByFlow => {
                self.processing_started = None;
                self.processing_ended = None;
            }
            _ => {
                self.processing_ended = Some(transition.at);
            }
        }
    }
}

/// 文件状态的比较并交换（CAS）请求
///
/// 仓储实现必须在同一原子步骤内检查 `expected`/`expected_worker` 并写入。
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub expected: Vec<FileStatus>,
    pub expected_worker: Option<Uuid>,
    pub status: FileStatus,
    pub node_uid: Option<Uuid>,
    pub worker_uid: Option<Uuid>,
    pub at: DateTime<Utc>,
}

impl StatusTransition {
    /// Unprocessed/ReprocessByFlow → Processing
    pub fn claim(node_uid: Uuid, runner_uid: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            expected: FileStatus::CLAIMABLE.to_vec(),
            expected_worker: None,
            status: FileStatus::Processing,
            node_uid: Some(node_uid),
            worker_uid: Some(runner_uid),
            at,
        }
    }

    /// 本runner持有的 Processing → Unprocessed，清除节点分配
    pub fn requeue(runner_uid: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            expected: vec![FileStatus::Processing],
            expected_worker: Some(runner_uid),
            status: FileStatus::Unprocessed,
            node_uid: None,
            worker_uid: None,
            at,
        }
    }

    /// 任意 Processing → Unprocessed，用于对账时回收孤儿文件
    pub fn requeue_orphan(at: DateTime<Utc>) -> Self {
        Self {
            expected: vec![FileStatus::Processing],
            expected_worker: None,
            status: FileStatus::Unprocessed,
            node_uid: None,
            worker_uid: None,
            at,
        }
    }

    /// 本runner持有的 Processing → 最终状态
    pub fn finish(
        node_uid: Uuid,
        runner_uid: Uuid,
        status: FileStatus,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            expected: vec![FileStatus::Processing],
            expected_worker: Some(runner_uid),
            status,
            node_uid: Some(node_uid),
            worker_uid: Some(runner_uid),
            at,
        }
    }

    pub fn is_satisfied_by(&self, file: &LibraryFile) -> bool {
        self.expected.contains(&file.status)
            && self
                .expected_worker
                .map_or(true, |worker| file.worker_uid == Some(worker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let mut flags = FileFlags::empty();
        assert!(!flags.contains(FileFlags::FORCE_PROCESSING));
        flags.insert(FileFlags::FORCE_PROCESSING);
        assert!(flags.contains(FileFlags::FORCE_PROCESSING));
        assert_eq!(flags.bits(), 1);
        flags.remove(FileFlags::FORCE_PROCESSING);
        assert_eq!(flags, FileFlags::empty());
    }

    #[test]
    fn test_claim_then_requeue() {
        let library = Library::new("lib");
        let mut file = LibraryFile::new(&library, "a.mkv", 10);
        let node = Uuid::new_v4();
        let runner = Uuid::new_v4();
        let now = Utc::now();

        let claim = StatusTransition::claim(node, runner, now);
        assert!(claim.is_satisfied_by(&file));
        file.apply_transition(&claim);
        assert_eq!(file.status, FileStatus::Processing);
        assert_eq!(file.node_uid, Some(node));
        assert_eq!(file.processing_started, Some(now));

        // 已被领取的文件不能再次领取
        assert!(!StatusTransition::claim(node, Uuid::new_v4(), now).is_satisfied_by(&file));
        // 其他runner不能回收
        assert!(!StatusTransition::requeue(Uuid::new_v4(), now).is_satisfied_by(&file));

        let requeue = StatusTransition::requeue(runner, now);
        assert!(requeue.is_satisfied_by(&file));
        file.apply_transition(&requeue);
        assert_eq!(file.status, FileStatus::Unprocessed);
        assert_eq!(file.node_uid, None);
        assert_eq!(file.worker_uid, None);
        assert_eq!(file.processing_started, None);
    }

    #[test]
    fn test_finish_records_end_time() {
        let library = Library::new("lib");
        let mut file = LibraryFile::new(&library, "a.mkv", 10);
        let node = Uuid::new_v4();
        let runner = Uuid::new_v4();
        let now = Utc::now();
        file.apply_transition(&StatusTransition::claim(node, runner, now));

        let finish = StatusTransition::finish(node, runner, FileStatus::Processed, now);
        assert!(finish.is_satisfied_by(&file));
        file.apply_transition(&finish);
        assert_eq!(file.status, FileStatus::Processed);
        assert_eq!(file.processing_ended, Some(now));
    }

    #[test]
    fn test_outcome_statuses() {
        assert!(FileStatus::Processed.is_outcome());
        assert!(FileStatus::ProcessingFailed.is_outcome());
        assert!(!FileStatus::Processing.is_outcome());
        assert!(FileStatus::ReprocessByFlow.is_claimable());
        assert!(!FileStatus::Processing.is_claimable());
    }
}
