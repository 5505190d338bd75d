//! 请求级重试
//!
//! 最多执行 max_attempts 次。失败不可重试（分类为致命或操作员已拒绝）时立即返回，
//! 不做退避；否则在下一次尝试前等待 base 或 base·2^(n-1)（上限 max_delay）。
//! 尝试耗尽后返回最后一次失败。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{BackoffMode, RetrySection};
use crate::core::clock::Sleeper;
use crate::core::{ErrorClass, Failure};

/// 可被重试的一次尝试；n 从 1 开始
#[async_trait]
pub trait Attempt: Send {
    type Output: Send;

    async fn attempt(&mut self, n: u32) -> Result<Self::Output, Failure>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: BackoffMode,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetrySection) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_secs(cfg.base_delay_secs),
            backoff: cfg.backoff,
            max_delay: Duration::from_secs(cfg.max_delay_secs),
        }
    }

    /// 第 attempt 次失败之后、下一次尝试之前的等待
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffMode::Fixed => self.base_delay,
            BackoffMode::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.base_delay.saturating_mul(factor).min(self.max_delay)
            }
        }
    }
}

/// 重试结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome<T> {
    pub success: bool,
    pub result: Option<T>,
    pub class: Option<ErrorClass>,
    pub message: String,
    pub attempts_used: u32,
    /// 最后一次失败来自操作员的停止选择
    pub terminal: bool,
}

impl<T> RetryOutcome<T> {
    fn succeeded(result: T, attempts_used: u32) -> Self {
        Self {
            success: true,
            result: Some(result),
            class: None,
            message: String::new(),
            attempts_used,
            terminal: false,
        }
    }

    fn failed(failure: Failure, attempts_used: u32) -> Self {
        Self {
            success: false,
            result: None,
            class: Some(failure.class),
            message: failure.message,
            attempts_used,
            terminal: failure.terminal,
        }
    }
}

pub struct RetryOrchestrator {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryOrchestrator {
    pub fn new(policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn run<A: Attempt>(&self, op: &mut A) -> RetryOutcome<A::Output> {
        let max = self.policy.max_attempts.max(1);
        let mut last = Failure::new(ErrorClass::Unknown, "no attempt made");

        for n in 1..=max {
            match op.attempt(n).await {
                Ok(value) => {
                    if n > 1 {
                        info!(attempt = n, max, "succeeded after retry");
                    }
                    return RetryOutcome::succeeded(value, n);
                }
                Err(failure) => {
                    warn!(
                        attempt = n,
                        max,
                        class = %failure.class,
                        message = %failure.message,
                        "attempt failed"
                    );
                    if !failure.is_retriable() {
                        warn!(class = %failure.class, "not retriable, giving up");
                        return RetryOutcome::failed(failure, n);
                    }
                    if n < max {
                        let delay = self.policy.delay_after(n);
                        info!(delay_secs = delay.as_secs_f64(), next_attempt = n + 1, "backing off");
                        self.sleeper.sleep(delay).await;
                    }
                    last = failure;
                }
            }
        }

        RetryOutcome::failed(last, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    /// 按脚本依次返回结果
    struct Scripted {
        results: Vec<Result<&'static str, Failure>>,
        calls: u32,
    }

    #[async_trait]
    impl Attempt for Scripted {
        type Output = &'static str;

        async fn attempt(&mut self, _n: u32) -> Result<&'static str, Failure> {
            self.calls += 1;
            let idx = (self.calls as usize - 1).min(self.results.len() - 1);
            self.results[idx].clone()
        }
    }

    fn orchestrator(sleeper: Arc<RecordingSleeper>, max: u32) -> RetryOrchestrator {
        let policy = RetryPolicy::from_config(&RetrySection {
            max_attempts: max,
            ..RetrySection::default()
        });
        RetryOrchestrator::new(policy, sleeper)
    }

    #[test]
    fn test_exponential_delays_capped() {
        let policy = RetryPolicy::from_config(&RetrySection::default());
        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(2), Duration::from_secs(10));
        assert_eq!(policy.delay_after(4), Duration::from_secs(40));
        assert_eq!(policy.delay_after(5), Duration::from_secs(60));
        assert_eq!(policy.delay_after(30), Duration::from_secs(60));
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::from_config(&RetrySection {
            backoff: BackoffMode::Fixed,
            ..RetrySection::default()
        });
        assert_eq!(policy.delay_after(3), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_network_twice_then_success() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut op = Scripted {
            results: vec![
                Err(Failure::new(ErrorClass::Network, "Network error")),
                Err(Failure::new(ErrorClass::Network, "Network error")),
                Ok("answer"),
            ],
            calls: 0,
        };
        let outcome = orchestrator(sleeper.clone(), 3).run(&mut op).await;
        assert!(outcome.success);
        assert_eq!(outcome.attempts_used, 3);
        assert_eq!(outcome.result, Some("answer"));
        assert_eq!(
            *sleeper.slept.lock().unwrap(),
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
    }

    #[tokio::test]
    async fn test_fatal_classes_stop_after_one_attempt() {
        for class in [ErrorClass::Auth, ErrorClass::RateLimit] {
            let sleeper = Arc::new(RecordingSleeper::default());
            let mut op = Scripted {
                results: vec![Err(Failure::new(class, "blocked")), Ok("never")],
                calls: 0,
            };
            let outcome = orchestrator(sleeper.clone(), 3).run(&mut op).await;
            assert!(!outcome.success);
            assert_eq!(outcome.attempts_used, 1);
            assert_eq!(outcome.class, Some(class));
            assert_eq!(op.calls, 1);
            assert!(sleeper.slept.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_never_exceeds_max_attempts() {
        for max in 1..=5 {
            let sleeper = Arc::new(RecordingSleeper::default());
            let mut op = Scripted {
                results: vec![Err(Failure::new(ErrorClass::Timeout, "slow"))],
                calls: 0,
            };
            let outcome = orchestrator(sleeper.clone(), max).run(&mut op).await;
            assert_eq!(op.calls, max);
            assert_eq!(outcome.attempts_used, max);
            assert_eq!(outcome.class, Some(ErrorClass::Timeout));
            assert_eq!(sleeper.slept.lock().unwrap().len() as u32, max - 1);
        }
    }

    #[tokio::test]
    async fn test_operator_stop_is_not_retried() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut op = Scripted {
            results: vec![Err(Failure::terminal(ErrorClass::Unknown, "declined")), Ok("never")],
            calls: 0,
        };
        let outcome = orchestrator(sleeper, 3).run(&mut op).await;
        assert_eq!(outcome.attempts_used, 1);
        assert!(outcome.terminal);
    }

    #[tokio::test]
    async fn test_last_failure_is_reported() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut op = Scripted {
            results: vec![
                Err(Failure::new(ErrorClass::Network, "first")),
                Err(Failure::new(ErrorClass::Empty, "second")),
            ],
            calls: 0,
        };
        let outcome = orchestrator(sleeper, 2).run(&mut op).await;
        assert_eq!(outcome.class, Some(ErrorClass::Empty));
        assert_eq!(outcome.message, "second");
    }
}
