use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct LogBuffer {
    lines: VecDeque<String>,
    finished_at: Option<DateTime<Utc>>,
}

/// 按文件保存的处理日志
///
/// 每个文件一把锁：不同文件的追加互不阻塞，同一文件的追加按到达顺序排列。
/// 超过 `max_lines` 时丢弃最早的行。处理结束的文件日志由 [`evict_finished`]
/// 按结束时间回收。
///
/// [`evict_finished`]: FileLogStore::evict_finished
#[derive(Debug, Clone)]
pub struct FileLogStore {
    logs: Arc<RwLock<HashMap<Uuid, Arc<Mutex<LogBuffer>>>>>,
    max_lines: usize,
}

impl FileLogStore {
    pub fn new(max_lines: usize) -> Self {
        Self {
            logs: Arc::new(RwLock::new(HashMap::new())),
            max_lines: max_lines.max(1),
        }
    }

    async fn entry(&self, file_uid: Uuid) -> Arc<Mutex<LogBuffer>> {
        if let Some(entry) = self.logs.read().await.get(&file_uid) {
            return entry.clone();
        }
        self.logs
            .write()
            .await
            .entry(file_uid)
            .or_default()
            .clone()
    }

    pub async fn append(&self, file_uid: Uuid, line: impl Into<String>) {
        let entry = self.entry(file_uid).await;
        let mut buffer = entry.lock().await;
        buffer.lines.push_back(line.into());
        while buffer.lines.len() > self.max_lines {
            buffer.lines.pop_front();
        }
    }

    pub async fn read(&self, file_uid: Uuid) -> Vec<String> {
        let entry = self.logs.read().await.get(&file_uid).cloned();
        match entry {
            Some(entry) => entry.lock().await.lines.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// 文件重新开始处理前清空旧日志
    pub async fn clear(&self, file_uid: Uuid) {
        if self.logs.write().await.remove(&file_uid).is_some() {
            debug!(file_uid = %file_uid, "已清空文件日志");
        }
    }

    /// 记录文件处理结束的时间，之后的追加不会重置它
    pub async fn mark_finished(&self, file_uid: Uuid, at: DateTime<Utc>) {
        let entry = self.logs.read().await.get(&file_uid).cloned();
        if let Some(entry) = entry {
            entry.lock().await.finished_at.get_or_insert(at);
        }
    }

    /// 回收在 `before` 之前结束的文件日志，返回回收的文件数
    ///
    /// 正被追加或读取的条目本轮跳过。
    pub async fn evict_finished(&self, before: DateTime<Utc>) -> usize {
        let mut logs = self.logs.write().await;
        let total = logs.len();
        logs.retain(|_, entry| match entry.try_lock() {
            Ok(buffer) => !matches!(buffer.finished_at, Some(at) if at < before),
            Err(_) => true,
        });
        let evicted = total - logs.len();
        if evicted > 0 {
            debug!(evicted, "已回收结束文件的日志");
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.logs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.logs.read().await.is_empty()
    }
}

impl Default for FileLogStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}
