use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SchedulerError, SchedulerResult};

/// 检测规则的比较方式
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MatchRange {
    #[default]
    Any,
    GreaterThan,
    LessThan,
    Between,
    NotBetween,
}

impl MatchRange {
    /// GreaterThan/LessThan 为严格比较；Between 两端闭区间；NotBetween 为 Between 的补集
    pub fn matches(self, lower: i64, upper: i64, value: i64) -> bool {
        match self {
            MatchRange::Any => true,
            MatchRange::GreaterThan => value > lower,
            MatchRange::LessThan => value < lower,
            MatchRange::Between => lower <= value && value <= upper,
            MatchRange::NotBetween => !(lower <= value && value <= upper),
        }
    }

    pub fn requires_upper(self) -> bool {
        matches!(self, MatchRange::Between | MatchRange::NotBetween)
    }
}

/// 单条检测规则：创建时间、最后写入时间（分钟）或文件大小（字节）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectionRule {
    pub range: MatchRange,
    pub lower: i64,
    pub upper: Option<i64>,
}

impl DetectionRule {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn greater_than(lower: i64) -> Self {
        Self {
            range: MatchRange::GreaterThan,
            lower,
            upper: None,
        }
    }

    pub fn less_than(lower: i64) -> Self {
        Self {
            range: MatchRange::LessThan,
            lower,
            upper: None,
        }
    }

    pub fn between(lower: i64, upper: i64) -> Self {
        Self {
            range: MatchRange::Between,
            lower,
            upper: Some(upper),
        }
    }

    pub fn not_between(lower: i64, upper: i64) -> Self {
        Self {
            range: MatchRange::NotBetween,
            lower,
            upper: Some(upper),
        }
    }

    pub fn is_any(&self) -> bool {
        self.range == MatchRange::Any
    }

    pub fn matches(&self, value: i64) -> bool {
        self.range
            .matches(self.lower, self.upper.unwrap_or(self.lower), value)
    }

    /// 按 `now - timestamp` 的整分钟数匹配
    pub fn matches_age(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if self.is_any() {
            return true;
        }
        self.matches((now - timestamp).num_minutes())
    }

    /// 保存时校验：Between/NotBetween 必须带上界且上界不小于下界
    pub fn validate(&self, rule_name: &str) -> SchedulerResult<()> {
        match (self.range.requires_upper(), self.upper) {
            (true, None) => Err(SchedulerError::Configuration(format!(
                "{rule_name}: {:?} 规则缺少上界",
                self.range
            ))),
            (true, Some(upper)) if upper < self.lower => {
                Err(SchedulerError::Configuration(format!(
                    "{rule_name}: 上界 {upper} 小于下界 {}",
                    self.lower
                )))
            }
            (false, Some(_)) if self.range != MatchRange::Any => {
                Err(SchedulerError::Configuration(format!(
                    "{rule_name}: {:?} 规则只接受下界",
                    self.range
                )))
            }
            _ => Ok(()),
        }
    }
}
