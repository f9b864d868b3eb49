use std::sync::Mutex;

use chrono::{DateTime, Duration, Local, NaiveDateTime, Utc};

/// 时间来源，通过构造函数注入以便测试时固定时间
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// 节点本地时间，用于调度表匹配
    fn now_local(&self) -> NaiveDateTime {
        self.now().with_timezone(&Local).naive_local()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动推进的时钟，本地时间等同于UTC时间
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now_local(&self) -> NaiveDateTime {
        self.now().naive_utc()
    }
}
