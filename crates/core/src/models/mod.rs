//! # 数据模型
//!
//! 库、库文件、处理节点、租约与Runner协议的数据结构。
//!
//! 时间字段统一使用 `DateTime<Utc>`；只有调度表按节点本地时间匹配，
//! 调用方需传入 `NaiveDateTime`。

pub mod detection;
pub mod executor;
pub mod lease;
pub mod library;
pub mod library_file;
pub mod next_file;
pub mod processing_node;
pub mod runner;
pub mod schedule;

pub use detection::{DetectionRule, MatchRange};
pub use executor::{ExecutorInfo, ExecutorSnapshot};
pub use lease::{Lease, LeaseState};
pub use library::{Library, ProcessingOrder, ProcessingPriority};
pub use library_file::{FileFlags, FileStatus, LibraryFile, StatusTransition};
pub use next_file::{NextFilePreviewRequest, NextFileRequest, NextFileResult, NextFileStatus};
pub use processing_node::{LibraryRestriction, ProcessingNode};
pub use runner::{
    ChannelFrame, CompletionReport, HelloRequest, HelloResponse, LogAppendRequest,
    RunnerCommand, RunnerLaunchParameters,
};
pub use schedule::{WeeklySchedule, MINUTES_PER_SLOT, SCHEDULE_SLOTS, SLOTS_PER_DAY, SLOTS_PER_HOUR};
