use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fileflow_core::{
    traits::LibraryFileRepository, FileStatus, LibraryFile, SchedulerError, SchedulerResult,
    StatusTransition,
};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct InMemoryLibraryFileRepository {
    files: Arc<RwLock<HashMap<Uuid, LibraryFile>>>,
    /// 模拟存储不可用，所有操作返回 `Persistence` 错误
    unavailable: Arc<AtomicBool>,
}

impl InMemoryLibraryFileRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(files: Vec<LibraryFile>) -> Self {
        let map = files.into_iter().map(|f| (f.uid, f)).collect();
        Self {
            files: Arc::new(RwLock::new(map)),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn count(&self) -> usize {
        self.files.read().await.len()
    }

    fn check_available(&self) -> SchedulerResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SchedulerError::Persistence("库文件存储不可用".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LibraryFileRepository for InMemoryLibraryFileRepository {
    async fn get_by_id(&self, uid: Uuid) -> SchedulerResult<Option<LibraryFile>> {
        self.check_available()?;
        Ok(self.files.read().await.get(&uid).cloned())
    }

    async fn get_by_status(&self, statuses: &[FileStatus]) -> SchedulerResult<Vec<LibraryFile>> {
        self.check_available()?;
        let files = self.files.read().await;
        let mut matched: Vec<LibraryFile> = files
            .values()
            .filter(|f| statuses.contains(&f.status))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.date_created.cmp(&b.date_created).then(a.uid.cmp(&b.uid)));
        Ok(matched)
    }

    async fn upsert(&self, file: &LibraryFile) -> SchedulerResult<()> {
        self.check_available()?;
        self.files.write().await.insert(file.uid, file.clone());
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        uid: Uuid,
        transition: &StatusTransition,
    ) -> SchedulerResult<bool> {
        self.check_available()?;
        let mut files = self.files.write().await;
        let file = files
            .get_mut(&uid)
            .ok_or(SchedulerError::LibraryFileNotFound { id: uid })?;

        if !transition.is_satisfied_by(file) {
            debug!(
                file_uid = %uid,
                current = ?file.status,
                target = ?transition.status,
                "状态比较失败，跳过写入"
            );
            return Ok(false);
        }

        file.apply_transition(transition);
        Ok(true)
    }
}
