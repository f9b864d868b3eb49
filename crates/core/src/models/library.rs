use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DetectionRule, LibraryFile, WeeklySchedule};
use crate::SchedulerResult;

/// 库处理优先级，声明顺序即大小顺序
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum ProcessingPriority {
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
}

/// 库内文件的处理顺序
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProcessingOrder {
    #[default]
    AsFound,
    OldestFirst,
    NewestFirst,
    SmallestFirst,
    LargestFirst,
}

/// 库：一组共享扫描与调度规则的文件来源
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    pub uid: Uuid,
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub priority: ProcessingPriority,
    #[serde(default)]
    pub processing_order: ProcessingOrder,
    #[serde(default)]
    pub schedule: WeeklySchedule,
    #[serde(default)]
    pub detect_file_creation: DetectionRule,
    #[serde(default)]
    pub detect_file_last_written: DetectionRule,
    #[serde(default)]
    pub detect_file_size: DetectionRule,
}

impl Library {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            name: name.into(),
            enabled: true,
            priority: ProcessingPriority::default(),
            processing_order: ProcessingOrder::default(),
            schedule: WeeklySchedule::always(),
            detect_file_creation: DetectionRule::any(),
            detect_file_last_written: DetectionRule::any(),
            detect_file_size: DetectionRule::any(),
        }
    }

    /// 保存前校验检测规则的上下界约束
    pub fn validate(&self) -> SchedulerResult<()> {
        self.detect_file_creation.validate("detect_file_creation")?;
        self.detect_file_last_written
            .validate("detect_file_last_written")?;
        self.detect_file_size.validate("detect_file_size")?;
        Ok(())
    }

    pub fn is_schedule_open(&self, now_local: &NaiveDateTime) -> bool {
        self.schedule.is_in_schedule(now_local)
    }

    /// 创建时间、最后写入时间、大小三条规则同时满足
    pub fn matches_detection(&self, file: &LibraryFile, now: DateTime<Utc>) -> bool {
        self.detect_file_creation
            .matches_age(file.creation_time, now)
            && self
                .detect_file_last_written
                .matches_age(file.last_write_time, now)
            && (self.detect_file_size.is_any()
                || self
                    .detect_file_size
                    .matches(file.original_size.min(i64::MAX as u64) as i64))
    }
}
