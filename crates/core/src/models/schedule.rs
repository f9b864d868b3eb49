//! 每周调度表
//!
//! 一周按15分钟切分为672个时段（7天 × 24小时 × 4），索引0对应本地时间周一00:00。
//! 每个时段一位，置位表示该时段允许处理。

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{SchedulerError, SchedulerResult};

pub const SLOTS_PER_HOUR: usize = 4;
pub const SLOTS_PER_DAY: usize = 24 * SLOTS_PER_HOUR;
pub const SCHEDULE_SLOTS: usize = 7 * SLOTS_PER_DAY;
pub const MINUTES_PER_SLOT: u32 = 15;

const WORDS: usize = SCHEDULE_SLOTS.div_ceil(64);

/// 672位的每周调度位图
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WeeklySchedule {
    bits: [u64; WORDS],
}

impl WeeklySchedule {
    /// 全部时段开放
    pub fn always() -> Self {
        let mut schedule = Self::never();
        for slot in 0..SCHEDULE_SLOTS {
            schedule.set(slot, true);
        }
        schedule
    }

    /// 全部时段关闭
    pub fn never() -> Self {
        Self { bits: [0; WORDS] }
    }

    /// 计算某一时刻所在的时段索引
    pub fn slot_index(weekday: Weekday, hour: u32, minute: u32) -> usize {
        weekday.num_days_from_monday() as usize * SLOTS_PER_DAY
            + hour as usize * SLOTS_PER_HOUR
            + (minute / MINUTES_PER_SLOT) as usize
    }

    pub fn slot_of(at: &NaiveDateTime) -> usize {
        Self::slot_index(at.weekday(), at.hour(), at.minute())
    }

    pub fn get(&self, slot: usize) -> bool {
        slot < SCHEDULE_SLOTS && self.bits[slot / 64] & (1u64 << (slot % 64)) != 0
    }

    /// 设置单个时段；越界索引被忽略
    pub fn set(&mut self, slot: usize, open: bool) {
        if slot >= SCHEDULE_SLOTS {
            return;
        }
        let mask = 1u64 << (slot % 64);
        if open {
            self.bits[slot / 64] |= mask;
        } else {
            self.bits[slot / 64] &= !mask;
        }
    }

    /// 设置某天 [start_hour, end_hour) 区间内的全部时段
    pub fn set_hours(&mut self, weekday: Weekday, start_hour: u32, end_hour: u32, open: bool) {
        let start = Self::slot_index(weekday, start_hour.min(24), 0);
        let end = Self::slot_index(weekday, 0, 0) + end_hour.min(24) as usize * SLOTS_PER_HOUR;
        for slot in start..end {
            self.set(slot, open);
        }
    }

    /// 当前本地时间是否处于开放时段
    pub fn is_in_schedule(&self, now_local: &NaiveDateTime) -> bool {
        self.get(Self::slot_of(now_local))
    }

    pub fn is_never(&self) -> bool {
        self.bits.iter().all(|word| *word == 0)
    }

    pub fn open_slots(&self) -> usize {
        self.bits.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// 解析旧格式的672位"0/1"字符串
    ///
    /// 空字符串视为从未开放；其他长度或字符属于配置错误。
    pub fn from_digits(digits: &str) -> SchedulerResult<Self> {
        if digits.is_empty() {
            return Ok(Self::never());
        }
        if digits.len() != SCHEDULE_SLOTS {
            return Err(SchedulerError::Configuration(format!(
                "调度表长度必须为{SCHEDULE_SLOTS}，实际为{}",
                digits.len()
            )));
        }

        let mut schedule = Self::never();
        for (slot, ch) in digits.chars().enumerate() {
            match ch {
                '1' => schedule.set(slot, true),
                '0' => {}
                other => {
                    return Err(SchedulerError::Configuration(format!(
                        "调度表第{slot}位包含非法字符: {other:?}"
                    )))
                }
            }
        }
        Ok(schedule)
    }

    pub fn to_digits(&self) -> String {
        (0..SCHEDULE_SLOTS)
            .map(|slot| if self.get(slot) { '1' } else { '0' })
            .collect()
    }
}

impl Default for WeeklySchedule {
    fn default() -> Self {
        Self::always()
    }
}

impl Serialize for WeeklySchedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_digits())
    }
}

impl<'de> Deserialize<'de> for WeeklySchedule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let digits = String::deserialize(deserializer)?;
        Self::from_digits(&digits).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_slot_index_monday_midnight_is_zero() {
        // 2024-01-01 是周一
        assert_eq!(WeeklySchedule::slot_of(&at(2024, 1, 1, 0, 0)), 0);
        assert_eq!(WeeklySchedule::slot_of(&at(2024, 1, 1, 0, 14)), 0);
        assert_eq!(WeeklySchedule::slot_of(&at(2024, 1, 1, 0, 15)), 1);
        assert_eq!(WeeklySchedule::slot_of(&at(2024, 1, 1, 1, 0)), 4);
    }

    #[test]
    fn test_slot_index_sunday_last_slot() {
        // 2024-01-07 是周日
        assert_eq!(
            WeeklySchedule::slot_of(&at(2024, 1, 7, 23, 59)),
            SCHEDULE_SLOTS - 1
        );
        assert_eq!(
            WeeklySchedule::slot_index(Weekday::Wed, 13, 47),
            2 * 96 + 13 * 4 + 3
        );
    }

    #[test]
    fn test_always_and_never() {
        let now = at(2024, 3, 14, 9, 30);
        assert!(WeeklySchedule::always().is_in_schedule(&now));
        assert!(!WeeklySchedule::never().is_in_schedule(&now));
        assert!(WeeklySchedule::never().is_never());
        assert_eq!(WeeklySchedule::always().open_slots(), SCHEDULE_SLOTS);
    }

    #[test]
    fn test_set_hours_opens_only_that_window() {
        let mut schedule = WeeklySchedule::never();
        schedule.set_hours(Weekday::Tue, 22, 24, true);

        assert!(schedule.is_in_schedule(&at(2024, 1, 2, 22, 0)));
        assert!(schedule.is_in_schedule(&at(2024, 1, 2, 23, 45)));
        assert!(!schedule.is_in_schedule(&at(2024, 1, 2, 21, 59)));
        assert!(!schedule.is_in_schedule(&at(2024, 1, 3, 0, 0)));
        assert_eq!(schedule.open_slots(), 8);
    }

    #[test]
    fn test_digits_round_trip_and_errors() {
        let mut schedule = WeeklySchedule::never();
        schedule.set(0, true);
        schedule.set(671, true);
        let digits = schedule.to_digits();
        assert_eq!(digits.len(), SCHEDULE_SLOTS);
        assert_eq!(WeeklySchedule::from_digits(&digits).unwrap(), schedule);

        assert!(WeeklySchedule::from_digits("").unwrap().is_never());
        assert!(WeeklySchedule::from_digits("101").is_err());
        let bad = "2".repeat(SCHEDULE_SLOTS);
        assert!(WeeklySchedule::from_digits(&bad).is_err());
    }

    #[test]
    fn test_serde_uses_digit_string() {
        let json = serde_json::to_string(&WeeklySchedule::never()).unwrap();
        assert_eq!(json.len(), SCHEDULE_SLOTS + 2);

        let err = serde_json::from_str::<WeeklySchedule>("\"0101\"");
        assert!(err.is_err());
    }
}
