//! 节奏控制
//!
//! - **Pacer**: 请求之间的间隔（固定或随机），核心只把它当作时长提供者
//! - **Humanizer**: 可选的拟人化行为（分段输入、动作停顿、工作时段、随机小憩），默认关闭
//!
//! 两者只计算时长，真正的挂起由调用方通过 Sleeper 完成，便于测试与取消。

mod timing;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::config::{HumanizeSection, PacingMode, PacingSection};

pub use timing::{HumanTiming, WorkSchedule};

/// 请求间隔提供者
pub trait Pacer: Send + Sync {
    fn next_delay(&self) -> Duration;
}

/// 固定间隔
#[derive(Debug, Clone, Copy)]
pub struct FixedPacer(pub Duration);

impl Pacer for FixedPacer {
    fn next_delay(&self) -> Duration {
        self.0
    }
}

/// 随机间隔：在 [min, max] 内均匀取值，可叠加 0~3 次 0.5~2 秒的微停顿
#[derive(Debug, Clone)]
pub struct RandomPacer {
    min_secs: f64,
    max_secs: f64,
    micro_pauses: bool,
}

impl RandomPacer {
    pub fn new(min_secs: f64, max_secs: f64, micro_pauses: bool) -> Self {
        let (min_secs, max_secs) = if min_secs <= max_secs {
            (min_secs.max(0.0), max_secs.max(0.0))
        } else {
            (max_secs.max(0.0), min_secs.max(0.0))
        };
        Self {
            min_secs,
            max_secs,
            micro_pauses,
        }
    }
}

impl Pacer for RandomPacer {
    fn next_delay(&self) -> Duration {
        let mut rng = rand::rng();
        let mut secs = rng.random_range(self.min_secs..=self.max_secs);
        if self.micro_pauses {
            for _ in 0..rng.random_range(0..=3) {
                secs += rng.random_range(0.5..=2.0);
            }
        }
        Duration::from_secs_f64(secs)
    }
}

pub fn pacer_from_config(cfg: &PacingSection) -> Arc<dyn Pacer> {
    match cfg.mode {
        PacingMode::Fixed => Arc::new(FixedPacer(Duration::from_secs(cfg.delay_secs))),
        PacingMode::Random => Arc::new(RandomPacer::new(cfg.min_secs, cfg.max_secs, cfg.micro_pauses)),
    }
}

/// 需要停顿的动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseKind {
    Thinking,
    Reading,
    Typing,
    Navigating,
    Verifying,
}

impl PauseKind {
    /// 停顿范围（秒）
    pub fn range_secs(&self) -> (f64, f64) {
        match self {
            PauseKind::Thinking => (2.0, 8.0),
            PauseKind::Reading => (5.0, 20.0),
            PauseKind::Typing => (0.5, 2.0),
            PauseKind::Navigating => (1.0, 3.0),
            PauseKind::Verifying => (2.0, 5.0),
        }
    }
}

/// 拟人化策略；默认实现即「关闭」：一次性输入、不停顿、不限制时段
pub trait Humanizer: Send + Sync {
    /// 把提示词拆成 (片段, 输入该片段后的停顿)
    fn typing_plan(&self, text: &str) -> Vec<(String, Duration)> {
        vec![(text.to_string(), Duration::ZERO)]
    }

    fn pause_for(&self, _kind: PauseKind) -> Duration {
        Duration::ZERO
    }

    /// 当前不允许工作时返回 (下次检查前的等待, 原因)
    fn schedule_wait(&self) -> Option<(Duration, String)> {
        None
    }

    /// 请求结束后是否小憩
    fn break_after_request(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHumanizer;

impl Humanizer for NoopHumanizer {}

pub fn humanizer_from_config(cfg: &HumanizeSection) -> Arc<dyn Humanizer> {
    if cfg.enabled {
        Arc::new(HumanTiming::new(cfg))
    } else {
        Arc::new(NoopHumanizer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_pacer() {
        let pacer = pacer_from_config(&PacingSection::default());
        assert_eq!(pacer.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_random_pacer_bounds() {
        let pacer = RandomPacer::new(15.0, 45.0, true);
        for _ in 0..200 {
            let d = pacer.next_delay().as_secs_f64();
            assert!((15.0..=51.0).contains(&d), "delay {d} out of range");
        }
        let plain = RandomPacer::new(3.0, 1.0, false);
        for _ in 0..50 {
            let d = plain.next_delay().as_secs_f64();
            assert!((1.0..=3.0).contains(&d));
        }
    }

    #[test]
    fn test_noop_humanizer_types_in_one_chunk() {
        let plan = NoopHumanizer.typing_plan("hello world");
        assert_eq!(plan, vec![("hello world".to_string(), Duration::ZERO)]);
        assert!(NoopHumanizer.schedule_wait().is_none());
        assert_eq!(NoopHumanizer.pause_for(PauseKind::Reading), Duration::ZERO);
    }
}
