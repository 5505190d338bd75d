//! 拟人化时长模型：打字速度、动作停顿、工作时段与随机小憩

use std::time::Duration;

use chrono::{Local, Timelike};
use rand::Rng;
use tracing::warn;

use crate::config::HumanizeSection;
use crate::humanize::{Humanizer, PauseKind};

/// 不在工作时段时，两次检查之间的间隔
const SCHEDULE_POLL: Duration = Duration::from_secs(300);

/// [start, end) 小时区间；start > end 表示跨过午夜
fn in_window(hour: u32, (start, end): (u32, u32)) -> bool {
    if start <= end {
        start <= hour && hour < end
    } else {
        hour >= start || hour < end
    }
}

/// 工作时段：[start, end) 小时内工作（可跨午夜，start == end 表示全天），
/// 午休 [lunch_start, lunch_end) 除外
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSchedule {
    pub work: (u32, u32),
    pub lunch: (u32, u32),
}

impl WorkSchedule {
    /// Err 为不能工作的原因
    pub fn check(&self, hour: u32) -> Result<(), String> {
        let (start, end) = self.work;
        if start != end && !in_window(hour, self.work) {
            return Err(format!(
                "outside work hours ({hour}:00, working {start}:00-{end}:00)"
            ));
        }
        let (ls, le) = self.lunch;
        if in_window(hour, self.lunch) {
            return Err(format!("lunch break ({ls}:00-{le}:00)"));
        }
        Ok(())
    }

    /// 一天中至少有一个小时可以工作
    pub fn allows_any_hour(&self) -> bool {
        (0..24).any(|h| self.check(h).is_ok())
    }

    /// 距离可以工作还有多少小时（粗略，仅用于日志）
    pub fn hours_until_work(&self, hour: u32) -> u32 {
        (1..=24)
            .find(|ahead| self.check((hour + ahead) % 24).is_ok())
            .unwrap_or(24)
    }
}

/// 启用拟人化时的实现
#[derive(Debug, Clone)]
pub struct HumanTiming {
    wpm: (u32, u32),
    schedule: Option<WorkSchedule>,
    break_probability: f64,
    break_secs: (u64, u64),
}

impl HumanTiming {
    pub fn new(cfg: &HumanizeSection) -> Self {
        let wpm_min = cfg.typing_wpm_min.max(1);
        let schedule = WorkSchedule {
            work: (cfg.work_hours.0 % 24, cfg.work_hours.1 % 24),
            lunch: (cfg.lunch_break.0 % 24, cfg.lunch_break.1 % 24),
        };
        let schedule = if !cfg.schedule_enabled {
            None
        } else if schedule.allows_any_hour() {
            Some(schedule)
        } else {
            warn!(?schedule, "work schedule leaves no working hour, schedule disabled");
            None
        };
        Self {
            wpm: (wpm_min, cfg.typing_wpm_max.max(wpm_min)),
            schedule,
            break_probability: cfg.break_probability.clamp(0.0, 1.0),
            break_secs: (cfg.break_secs.0, cfg.break_secs.1.max(cfg.break_secs.0)),
        }
    }
}

impl Humanizer for HumanTiming {
    /// 按单词切分；每个字符耗时 60/(wpm*5) 秒上下浮动，标点稍慢，词间额外停顿
    fn typing_plan(&self, text: &str) -> Vec<(String, Duration)> {
        let mut rng = rand::rng();
        let wpm = rng.random_range(self.wpm.0..=self.wpm.1);
        let per_char = 60.0 / f64::from(wpm * 5);

        let mut plan = Vec::new();
        for word in text.split_inclusive(char::is_whitespace) {
            let mut secs = 0.0;
            for c in word.chars() {
                let mut d = per_char * rng.random_range(0.5..=1.5);
                if matches!(c, '.' | ',' | '!' | '?' | ';' | ':') {
                    d *= rng.random_range(1.2..=2.0);
                }
                if c.is_whitespace() {
                    d = per_char * rng.random_range(2.0..=4.0);
                }
                secs += d;
            }
            plan.push((word.to_string(), Duration::from_secs_f64(secs)));
        }
        if plan.is_empty() {
            plan.push((String::new(), Duration::ZERO));
        }
        plan
    }

    fn pause_for(&self, kind: PauseKind) -> Duration {
        let (lo, hi) = kind.range_secs();
        Duration::from_secs_f64(rand::rng().random_range(lo..=hi))
    }

    fn schedule_wait(&self) -> Option<(Duration, String)> {
        let schedule = self.schedule?;
        let hour = Local::now().hour();
        schedule.check(hour).err().map(|reason| {
            let reason = format!(
                "{reason}, ~{}h until work resumes",
                schedule.hours_until_work(hour)
            );
            (SCHEDULE_POLL, reason)
        })
    }

    fn break_after_request(&self) -> Option<Duration> {
        self.schedule?;
        let mut rng = rand::rng();
        if rng.random_bool(self.break_probability) {
            Some(Duration::from_secs(
                rng.random_range(self.break_secs.0..=self.break_secs.1),
            ))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> WorkSchedule {
        WorkSchedule {
            work: (9, 18),
            lunch: (13, 14),
        }
    }

    #[test]
    fn test_work_hours() {
        assert!(schedule().check(10).is_ok());
        assert!(schedule().check(17).is_ok());
        assert!(schedule().check(8).is_err());
        assert!(schedule().check(18).is_err());
        assert!(schedule().check(13).unwrap_err().contains("lunch"));
    }

    #[test]
    fn test_hours_until_work() {
        assert_eq!(schedule().hours_until_work(7), 2);
        assert_eq!(schedule().hours_until_work(13), 1);
        assert_eq!(schedule().hours_until_work(20), 13);
    }

    #[test]
    fn test_overnight_work_hours() {
        let night = WorkSchedule {
            work: (22, 6),
            lunch: (2, 3),
        };
        assert!(night.check(23).is_ok());
        assert!(night.check(0).is_ok());
        assert!(night.check(5).is_ok());
        assert!(night.check(2).unwrap_err().contains("lunch"));
        assert!(night.check(6).is_err());
        assert!(night.check(12).is_err());
        assert_eq!(night.hours_until_work(12), 10);
        assert_eq!(night.hours_until_work(2), 1);
    }

    #[test]
    fn test_schedule_without_working_hours_is_disabled() {
        let cfg = HumanizeSection {
            enabled: true,
            schedule_enabled: true,
            work_hours: (9, 18),
            lunch_break: (8, 19),
            ..HumanizeSection::default()
        };
        let timing = HumanTiming::new(&cfg);
        assert!(timing.schedule_wait().is_none());

        let all_day = WorkSchedule {
            work: (0, 0),
            lunch: (13, 13),
        };
        assert!((0..24).all(|h| all_day.check(h).is_ok()));
    }

    #[test]
    fn test_typing_plan_reassembles_text() {
        let cfg = HumanizeSection {
            enabled: true,
            ..HumanizeSection::default()
        };
        let timing = HumanTiming::new(&cfg);
        let text = "Explain borrow checking, briefly.";
        let plan = timing.typing_plan(text);
        assert_eq!(plan.len(), 4);
        let joined: String = plan.iter().map(|(chunk, _)| chunk.as_str()).collect();
        assert_eq!(joined, text);
        assert!(plan.iter().all(|(_, d)| *d > Duration::ZERO));
    }

    #[test]
    fn test_pause_ranges() {
        let timing = HumanTiming::new(&HumanizeSection::default());
        for _ in 0..50 {
            let d = timing.pause_for(PauseKind::Navigating).as_secs_f64();
            assert!((1.0..=3.0).contains(&d));
        }
    }

    #[test]
    fn test_no_breaks_without_schedule() {
        let timing = HumanTiming::new(&HumanizeSection {
            break_probability: 1.0,
            ..HumanizeSection::default()
        });
        assert!(timing.break_after_request().is_none());
        assert!(timing.schedule_wait().is_none());
    }
}
