use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use fileflow_core::{
    traits::{LibraryFileRepository, LibraryRepository, ProcessingNodeRepository},
    Clock, Library, LibraryFile, ManualClock, ProcessingNode,
};
use fileflow_infrastructure::{
    FileLogStore, InMemoryLibraryFileRepository, InMemoryLibraryRepository,
    InMemoryProcessingNodeRepository,
};

use crate::lease_manager::{LeaseManager, LeaseManagerConfig};
use crate::next_file::{NextFileConfig, NextFileService};
use crate::runner_hub::{RunnerChannels, RunnerHub};

/// 周三 10:00 UTC
pub fn test_start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 3, 10, 0, 0).unwrap()
}

/// 基于内存仓储和手动时钟组装的调度核心
pub struct TestHarness {
    pub libraries: InMemoryLibraryRepository,
    pub nodes: InMemoryProcessingNodeRepository,
    pub files: InMemoryLibraryFileRepository,
    pub clock: Arc<ManualClock>,
    pub logs: FileLogStore,
    pub leases: Arc<LeaseManager>,
    pub service: Arc<NextFileService>,
    pub hub: Arc<RunnerHub>,
    sequence: AtomicI64,
}

impl TestHarness {
    pub fn new() -> Self {
        let libraries = InMemoryLibraryRepository::new();
        let nodes = InMemoryProcessingNodeRepository::new();
        let files = InMemoryLibraryFileRepository::new();
        let clock = Arc::new(ManualClock::new(test_start_time()));
        let logs = FileLogStore::new(100);

        let leases = Arc::new(LeaseManager::new(
            Arc::new(files.clone()),
            clock.clone(),
            LeaseManagerConfig::default(),
        ));
        let service = Arc::new(NextFileService::new(
            Arc::new(libraries.clone()),
            Arc::new(nodes.clone()),
            Arc::new(files.clone()),
            leases.clone(),
            logs.clone(),
            clock.clone(),
            NextFileConfig::default(),
        ));
        let hub = Arc::new(RunnerHub::new(
            leases.clone(),
            logs.clone(),
            Arc::new(RunnerChannels::new()),
        ));

        Self {
            libraries,
            nodes,
            files,
            clock,
            logs,
            leases,
            service,
            hub,
            sequence: AtomicI64::new(0),
        }
    }

    pub async fn add_library(&self, configure: impl FnOnce(&mut Library)) -> Library {
        let mut library = Library::new(format!(
            "library-{}",
            self.sequence.fetch_add(1, Ordering::SeqCst)
        ));
        configure(&mut library);
        self.libraries.upsert(&library).await.unwrap();
        library
    }

    /// 新文件的发现时间按添加顺序递增，创建时间为一小时前
    pub async fn add_file(&self, library: &Library, name: &str, size: u64) -> LibraryFile {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let now = self.clock.now();
        let mut file = LibraryFile::new(library, name, size);
        file.creation_time = now - Duration::hours(1);
        file.last_write_time = file.creation_time;
        file.date_created = now - Duration::hours(1) + Duration::seconds(seq);
        self.files.upsert(&file).await.unwrap();
        file
    }

    pub async fn add_library_with_file(&self, name: &str, size: u64) -> (Library, LibraryFile) {
        let library = self.add_library(|_| {}).await;
        let file = self.add_file(&library, name, size).await;
        (library, file)
    }

    pub async fn add_node(&self, configure: impl FnOnce(&mut ProcessingNode)) -> ProcessingNode {
        let mut node = ProcessingNode::new(
            format!("node-{}", self.sequence.fetch_add(1, Ordering::SeqCst)),
            "1.0.0",
        );
        configure(&mut node);
        self.nodes.upsert(&node).await.unwrap();
        node
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
