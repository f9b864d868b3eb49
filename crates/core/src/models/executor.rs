use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Runner在心跳中上报的执行快照
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutorSnapshot {
    pub current_step: u32,
    pub current_step_name: Option<String>,
    /// 0-100
    pub progress: f32,
}

/// 当前执行器视图中的一项
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorInfo {
    pub runner_uid: Uuid,
    pub node_uid: Uuid,
    pub library_file_uid: Uuid,
    pub library_uid: Uuid,
    pub library_file_name: String,
    pub current_step: u32,
    pub current_step_name: Option<String>,
    pub progress: f32,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl ExecutorInfo {
    pub fn apply_snapshot(&mut self, snapshot: &ExecutorSnapshot, now: DateTime<Utc>) {
        self.current_step = snapshot.current_step;
        self.current_step_name = snapshot.current_step_name.clone();
        self.progress = snapshot.progress.clamp(0.0, 100.0);
        self.last_update = now;
    }
}
