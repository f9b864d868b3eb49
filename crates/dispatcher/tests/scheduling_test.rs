use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use tokio::sync::{Barrier, Semaphore};
use uuid::Uuid;

use fileflow_core::{
    traits::{LibraryFileRepository, LibraryRepository, ProcessingNodeRepository},
    DetectionRule, ExecutorSnapshot, FileFlags, FileStatus, Library, LibraryFile, ManualClock,
    NextFileRequest, NextFileStatus, ProcessingNode, SchedulerResult, StatusTransition,
};
use fileflow_dispatcher::{
    LeaseManager, LeaseManagerConfig, NextFileConfig, NextFileService,
};
use fileflow_infrastructure::{
    FileLogStore, InMemoryLibraryFileRepository, InMemoryLibraryRepository,
    InMemoryProcessingNodeRepository,
};

struct Fixture {
    libraries: InMemoryLibraryRepository,
    nodes: InMemoryProcessingNodeRepository,
    files: InMemoryLibraryFileRepository,
    clock: Arc<ManualClock>,
    leases: Arc<LeaseManager>,
    service: Arc<NextFileService>,
}

fn fixture() -> Fixture {
    fixture_with(|files| Arc::new(files) as Arc<dyn LibraryFileRepository>)
}

/// 领取路径使用的文件仓储可以被包装，存储本身仍是同一个内存仓储
fn fixture_with(
    wrap: impl FnOnce(InMemoryLibraryFileRepository) -> Arc<dyn LibraryFileRepository>,
) -> Fixture {
    let libraries = InMemoryLibraryRepository::new();
    let nodes = InMemoryProcessingNodeRepository::new();
    let files = InMemoryLibraryFileRepository::new();
    let claim_files = wrap(files.clone());
    // 周六 23:50
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 6, 23, 50, 0).unwrap(),
    ));
    let leases = Arc::new(LeaseManager::new(
        claim_files.clone(),
        clock.clone(),
        LeaseManagerConfig::default(),
    ));
    let service = Arc::new(NextFileService::new(
        Arc::new(libraries.clone()),
        Arc::new(nodes.clone()),
        claim_files,
        leases.clone(),
        FileLogStore::default(),
        clock.clone(),
        NextFileConfig::default(),
    ));
    Fixture {
        libraries,
        nodes,
        files,
        clock,
        leases,
        service,
    }
}

/// 前 `parties` 次 `get_by_status` 在全部到达后才一起返回，
/// 让并发请求基于同一份候选列表排序
struct LockstepFiles {
    inner: InMemoryLibraryFileRepository,
    barrier: Barrier,
    parties: usize,
    calls: AtomicUsize,
}

impl LockstepFiles {
    fn new(inner: InMemoryLibraryFileRepository, parties: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(parties),
            parties,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LibraryFileRepository for LockstepFiles {
    async fn get_by_id(&self, uid: Uuid) -> SchedulerResult<Option<LibraryFile>> {
        self.inner.get_by_id(uid).await
    }

    async fn get_by_status(&self, statuses: &[FileStatus]) -> SchedulerResult<Vec<LibraryFile>> {
        let files = self.inner.get_by_status(statuses).await?;
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.parties {
            self.barrier.wait().await;
        }
        Ok(files)
    }

    async fn upsert(&self, file: &LibraryFile) -> SchedulerResult<()> {
        self.inner.upsert(file).await
    }

    async fn compare_and_set_status(
        &self,
        uid: Uuid,
        transition: &StatusTransition,
    ) -> SchedulerResult<bool> {
        self.inner.compare_and_set_status(uid, transition).await
    }
}

/// `get_by_id` 在放行前一直挂起，模拟很慢的存储
struct StalledReads {
    inner: InMemoryLibraryFileRepository,
    gate: Semaphore,
    waiting: AtomicUsize,
}

#[async_trait]
impl LibraryFileRepository for StalledReads {
    async fn get_by_id(&self, uid: Uuid) -> SchedulerResult<Option<LibraryFile>> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await.unwrap();
        self.inner.get_by_id(uid).await
    }

    async fn get_by_status(&self, statuses: &[FileStatus]) -> SchedulerResult<Vec<LibraryFile>> {
        self.inner.get_by_status(statuses).await
    }

    async fn upsert(&self, file: &LibraryFile) -> SchedulerResult<()> {
        self.inner.upsert(file).await
    }

    async fn compare_and_set_status(
        &self,
        uid: Uuid,
        transition: &StatusTransition,
    ) -> SchedulerResult<bool> {
        self.inner.compare_and_set_status(uid, transition).await
    }
}

fn request(node: &ProcessingNode) -> NextFileRequest {
    NextFileRequest {
        node_uid: node.uid,
        node_version: "1.0.0".to_string(),
        runner_uid: Uuid::new_v4(),
    }
}

#[tokio::test]
async fn test_many_nodes_never_share_a_file() {
    let fx = fixture();
    let library = Library::new("movies");
    fx.libraries.upsert(&library).await.unwrap();
    for i in 0..20 {
        fx.files
            .upsert(&LibraryFile::new(&library, format!("{i}.mkv"), 1))
            .await
            .unwrap();
    }
    let mut nodes = Vec::new();
    for i in 0..8 {
        let node = ProcessingNode::new(format!("node-{i}"), "1.0.0");
        fx.nodes.upsert(&node).await.unwrap();
        nodes.push(node);
    }

    let mut handles = Vec::new();
    for node in nodes {
        let service = fx.service.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            loop {
                let result = service.get_next(&request(&node)).await.unwrap();
                match result.status {
                    NextFileStatus::Success => claimed.push(result.file.unwrap().uid),
                    _ => break,
                }
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let unique: HashSet<Uuid> = all.iter().copied().collect();
    assert_eq!(all.len(), 20);
    assert_eq!(unique.len(), 20);
    assert_eq!(fx.leases.active_count().await, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_nodes_beyond_claim_attempts_all_get_work() {
    let racers = LeaseManagerConfig::default().claim_attempts + 3;
    let fx = fixture_with(|files| {
        Arc::new(LockstepFiles::new(files, racers)) as Arc<dyn LibraryFileRepository>
    });
    let library = Library::new("movies");
    fx.libraries.upsert(&library).await.unwrap();
    for i in 0..20 {
        fx.files
            .upsert(&LibraryFile::new(&library, format!("{i:02}.mkv"), 1))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..racers {
        let node = ProcessingNode::new(format!("node-{i}"), "1.0.0");
        fx.nodes.upsert(&node).await.unwrap();
        let service = fx.service.clone();
        handles.push(tokio::spawn(async move {
            service.get_next(&request(&node)).await.unwrap()
        }));
    }

    let mut claimed = HashSet::new();
    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(result.status, NextFileStatus::Success);
        assert!(claimed.insert(result.file.unwrap().uid), "同一文件被领取两次");
    }
    assert_eq!(claimed.len(), racers);

    let remaining = fx
        .files
        .get_by_status(&[FileStatus::Unprocessed])
        .await
        .unwrap();
    assert_eq!(remaining.len(), 20 - racers);
    assert_eq!(fx.leases.active_count().await, racers);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fleet_drains_queue_without_sharing() {
    let fx = fixture();
    let library = Library::new("tv");
    fx.libraries.upsert(&library).await.unwrap();
    for i in 0..40 {
        fx.files
            .upsert(&LibraryFile::new(&library, format!("{i:02}.mkv"), 1))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..10 {
        let node = ProcessingNode::new(format!("node-{i}"), "1.0.0");
        fx.nodes.upsert(&node).await.unwrap();
        let service = fx.service.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            loop {
                let result = service.get_next(&request(&node)).await.unwrap();
                match result.status {
                    NextFileStatus::Success => claimed.push(result.file.unwrap().uid),
                    _ => break,
                }
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let unique: HashSet<Uuid> = all.iter().copied().collect();
    assert_eq!(all.len(), 40);
    assert_eq!(unique.len(), 40);
    // 任何一个节点看到NoFile时队列都已经空了
    assert!(fx
        .files
        .get_by_status(&FileStatus::CLAIMABLE)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_heartbeat_not_blocked_by_slow_reconcile() {
    let stalled = Arc::new(StalledReads {
        inner: InMemoryLibraryFileRepository::new(),
        gate: Semaphore::new(0),
        waiting: AtomicUsize::new(0),
    });
    let fx = fixture_with({
        let stalled = stalled.clone();
        move |_| stalled as Arc<dyn LibraryFileRepository>
    });
    let library = Library::new("movies");
    fx.libraries.upsert(&library).await.unwrap();
    stalled
        .inner
        .upsert(&LibraryFile::new(&library, "a.mkv", 1))
        .await
        .unwrap();
    let node = ProcessingNode::new("node", "1.0.0");
    fx.nodes.upsert(&node).await.unwrap();

    let req = request(&node);
    assert!(fx.service.get_next(&req).await.unwrap().is_success());

    let reconcile = {
        let leases = fx.leases.clone();
        tokio::spawn(async move { leases.reconcile(Duration::minutes(5)).await })
    };
    while stalled.waiting.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    // 对账卡在存储读取上，心跳和租约查询仍然立即返回
    let renewed = tokio::time::timeout(
        std::time::Duration::from_secs(1),
        fx.leases.heartbeat(req.runner_uid, &ExecutorSnapshot::default()),
    )
    .await
    .unwrap();
    assert!(renewed);
    assert!(tokio::time::timeout(
        std::time::Duration::from_secs(1),
        fx.leases.lease_for_runner(req.runner_uid),
    )
    .await
    .unwrap()
    .is_some());

    stalled.gate.add_permits(16);
    let report = reconcile.await.unwrap().unwrap();
    assert!(report.dropped.is_empty());
    assert_eq!(fx.leases.active_count().await, 1);
}

#[tokio::test]
async fn test_schedule_window_uses_local_slot() {
    let fx = fixture();
    let mut library = Library::new("tv");
    library.schedule = fileflow_core::WeeklySchedule::never();
    // 周日 00:00 开放
    library
        .schedule
        .set(fileflow_core::WeeklySchedule::slot_index(chrono::Weekday::Sun, 0, 0), true);
    fx.libraries.upsert(&library).await.unwrap();
    fx.files
        .upsert(&LibraryFile::new(&library, "episode.mkv", 1))
        .await
        .unwrap();
    let node = ProcessingNode::new("node", "1.0.0");
    fx.nodes.upsert(&node).await.unwrap();

    let result = fx.service.get_next(&request(&node)).await.unwrap();
    assert_eq!(result.status, NextFileStatus::NoFile);

    fx.clock.advance(Duration::minutes(10));
    let result = fx.service.get_next(&request(&node)).await.unwrap();
    assert_eq!(result.status, NextFileStatus::Success);
}

#[tokio::test]
async fn test_forced_file_skips_size_and_detection() {
    let fx = fixture();
    let mut library = Library::new("lib");
    library.detect_file_size = DetectionRule::between(100, 500);
    fx.libraries.upsert(&library).await.unwrap();

    let mut huge = LibraryFile::new(&library, "huge.mkv", 2 * 1024 * 1024);
    fx.files.upsert(&huge).await.unwrap();
    let mut node = ProcessingNode::new("node", "1.0.0");
    node.max_file_size_mb = Some(1);
    fx.nodes.upsert(&node).await.unwrap();

    assert_eq!(
        fx.service.get_next(&request(&node)).await.unwrap().status,
        NextFileStatus::NoFile
    );

    huge.flags = FileFlags::FORCE_PROCESSING;
    fx.files.upsert(&huge).await.unwrap();
    let result = fx.service.get_next(&request(&node)).await.unwrap();
    assert_eq!(result.file.unwrap().uid, huge.uid);

    let stored = fx.files.get_by_id(huge.uid).await.unwrap().unwrap();
    assert_eq!(stored.status, FileStatus::Processing);
    assert_eq!(stored.node_uid, Some(node.uid));
}
