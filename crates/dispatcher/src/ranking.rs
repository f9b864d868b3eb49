//! 候选文件排序
//!
//! 纯函数实现，不访问存储也不持有锁：调用方负责提供候选文件、库快照和当前时间。

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use fileflow_core::{
    ExecutorInfo, FileStatus, Library, LibraryFile, ProcessingNode, ProcessingOrder,
};

/// 排序时使用的系统快照
#[derive(Debug, Clone, Default)]
pub struct SystemInfo {
    pub libraries: Vec<Library>,
    pub executors: Vec<ExecutorInfo>,
    /// 未授权时所有库按 `AsFound` 处理
    pub licensed_for_processing_order: bool,
}

#[derive(Debug, Clone)]
pub struct NextFileFilter {
    pub statuses: Vec<FileStatus>,
    pub exclude_uids: HashSet<Uuid>,
    /// 覆盖节点的最大文件大小
    pub max_size_bytes: Option<u64>,
    /// 文件名包含（不区分大小写）
    pub name_filter: Option<String>,
    pub skip: usize,
    pub rows: usize,
    pub system_info: SystemInfo,
}

impl NextFileFilter {
    pub fn new(system_info: SystemInfo) -> Self {
        let exclude_uids = system_info
            .executors
            .iter()
            .map(|e| e.library_file_uid)
            .collect();
        Self {
            statuses: FileStatus::CLAIMABLE.to_vec(),
            exclude_uids,
            max_size_bytes: None,
            name_filter: None,
            skip: 0,
            rows: 1,
            system_info,
        }
    }

    pub fn exclude(mut self, uids: impl IntoIterator<Item = Uuid>) -> Self {
        self.exclude_uids.extend(uids);
        self
    }

    pub fn page(mut self, skip: usize, rows: usize) -> Self {
        self.skip = skip;
        self.rows = rows;
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateRanker;

impl CandidateRanker {
    pub fn new() -> Self {
        Self
    }

    /// 过滤并排序候选文件，按 `skip`/`rows` 分页
    pub fn rank(
        &self,
        node: &ProcessingNode,
        filter: &NextFileFilter,
        files: Vec<LibraryFile>,
        now_local: NaiveDateTime,
        now: DateTime<Utc>,
    ) -> Vec<LibraryFile> {
        let libraries: HashMap<Uuid, &Library> = filter
            .system_info
            .libraries
            .iter()
            .map(|l| (l.uid, l))
            .collect();
        let name_filter = filter
            .name_filter
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let max_size = filter.max_size_bytes.or(node.max_file_size_bytes());

        let total = files.len();
        let mut candidates: Vec<(LibraryFile, &Library)> = files
            .into_iter()
            .filter_map(|file| {
                let library = *libraries.get(&file.library_uid)?;
                self.is_candidate(
                    node,
                    filter,
                    &file,
                    library,
                    max_size,
                    name_filter.as_deref(),
                    &now_local,
                    now,
                )
                .then_some((file, library))
            })
            .collect();

        debug!(
            node = %node.name,
            total,
            eligible = candidates.len(),
            "候选文件过滤完成"
        );

        candidates.sort_by(|(a, _), (b, _)| {
            a.date_created.cmp(&b.date_created).then(a.uid.cmp(&b.uid))
        });
        let licensed = filter.system_info.licensed_for_processing_order;
        candidates.sort_by(|(a, lib_a), (b, lib_b)| compare(a, lib_a, b, lib_b, licensed));

        candidates
            .into_iter()
            .map(|(file, _)| file)
            .skip(filter.skip)
            .take(filter.rows)
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn is_candidate(
        &self,
        node: &ProcessingNode,
        filter: &NextFileFilter,
        file: &LibraryFile,
        library: &Library,
        max_size: Option<u64>,
        name_filter: Option<&str>,
        now_local: &NaiveDateTime,
        now: DateTime<Utc>,
    ) -> bool {
        if !filter.statuses.contains(&file.status) {
            return false;
        }
        // 强制处理不能越过节点限制和排除集
        if !node.allows_library(&library.uid) || filter.exclude_uids.contains(&file.uid) {
            return false;
        }
        if let Some(name) = name_filter {
            if !file.name.to_lowercase().contains(name) {
                return false;
            }
        }
        if file.is_forced() {
            return true;
        }

        library.enabled
            && library.is_schedule_open(now_local)
            && max_size.map_or(true, |max| file.original_size <= max)
            && library.matches_detection(file, now)
    }
}

/// 库在排序时实际生效的处理顺序
fn effective_order(library: &Library, licensed: bool) -> ProcessingOrder {
    if licensed {
        library.processing_order
    } else {
        ProcessingOrder::AsFound
    }
}

fn order_rank(order: ProcessingOrder) -> u8 {
    match order {
        ProcessingOrder::AsFound => 0,
        ProcessingOrder::OldestFirst => 1,
        ProcessingOrder::NewestFirst => 2,
        ProcessingOrder::SmallestFirst => 3,
        ProcessingOrder::LargestFirst => 4,
    }
}

/// 优先级降序，同优先级内按各自库的处理顺序；相等时保持发现顺序
fn compare(
    a: &LibraryFile,
    lib_a: &Library,
    b: &LibraryFile,
    lib_b: &Library,
    licensed: bool,
) -> Ordering {
    let order_a = effective_order(lib_a, licensed);
    let order_b = effective_order(lib_b, licensed);

    lib_b
        .priority
        .cmp(&lib_a.priority)
        .then_with(|| order_rank(order_a).cmp(&order_rank(order_b)))
        .then_with(|| match order_a {
            ProcessingOrder::AsFound => Ordering::Equal,
            ProcessingOrder::OldestFirst => a.creation_time.cmp(&b.creation_time),
            ProcessingOrder::NewestFirst => b.creation_time.cmp(&a.creation_time),
            ProcessingOrder::SmallestFirst => a.original_size.cmp(&b.original_size),
            ProcessingOrder::LargestFirst => b.original_size.cmp(&a.original_size),
        })
}
