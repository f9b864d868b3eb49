use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 租约状态
///
/// ```text
/// Pending → Active → Completed
///    ↓        ↓   ↘ Cancelled
///  Expired  Expired
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LeaseState {
    Pending,
    Active,
    Completed,
    Cancelled,
    Expired,
}

impl LeaseState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LeaseState::Completed | LeaseState::Cancelled | LeaseState::Expired
        )
    }
}

/// 一个文件在一个runner上的排他、限时处理权
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lease {
    pub library_file_uid: Uuid,
    pub library_uid: Uuid,
    pub node_uid: Uuid,
    pub runner_uid: Uuid,
    pub state: LeaseState,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(
        library_file_uid: Uuid,
        library_uid: Uuid,
        node_uid: Uuid,
        runner_uid: Uuid,
        now: DateTime<Utc>,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            library_file_uid,
            library_uid,
            node_uid,
            runner_uid,
            state: LeaseState::Pending,
            created_at: now,
            last_heartbeat: None,
            expires_at: now + heartbeat_timeout,
        }
    }

    /// 收到心跳：进入Active并顺延截止时间；终态租约不可续期
    pub fn renew(&mut self, now: DateTime<Utc>, heartbeat_timeout: Duration) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = LeaseState::Active;
        self.last_heartbeat = Some(now);
        self.expires_at = now + heartbeat_timeout;
        true
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.state.is_terminal() && now > self.expires_at
    }

    /// 迁移到终态，已是终态时返回false
    pub fn finish(&mut self, state: LeaseState) -> bool {
        if self.state.is_terminal() || !state.is_terminal() {
            return false;
        }
        self.state = state;
        true
    }
}
