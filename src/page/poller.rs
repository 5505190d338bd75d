//! 就绪轮询：用界面信号代替固定等待
//!
//! 生成期间输入框被禁用，生成结束后恢复可用。就绪等待每轮先做错误扫描（错误优先于继续等待），
//! 再检查输入框；回复开始等待只看新消息是否出现。所有循环都有明确的上限，超时不抛错，
//! 只返回未就绪与原因。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::core::clock::Sleeper;
use crate::page::{ChatPage, Detection, ErrorClassifier};

/// 一次等待的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyOutcome {
    pub ready: bool,
    pub reason: String,
    /// 等待因检测到错误而中止
    pub detection: Option<Detection>,
}

impl ReadyOutcome {
    fn ready(reason: impl Into<String>) -> Self {
        Self {
            ready: true,
            reason: reason.into(),
            detection: None,
        }
    }

    fn detected(detection: Detection) -> Self {
        Self {
            ready: false,
            reason: detection.message.clone(),
            detection: Some(detection),
        }
    }

    fn timed_out(reason: String) -> Self {
        Self {
            ready: false,
            reason,
            detection: None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        !self.ready && self.detection.is_none()
    }
}

pub struct ReadinessPoller {
    page: Arc<ChatPage>,
    classifier: Arc<ErrorClassifier>,
    sleeper: Arc<dyn Sleeper>,
    interval: Duration,
}

impl ReadinessPoller {
    pub fn new(
        page: Arc<ChatPage>,
        classifier: Arc<ErrorClassifier>,
        sleeper: Arc<dyn Sleeper>,
        interval: Duration,
    ) -> Self {
        Self {
            page,
            classifier,
            sleeper,
            interval,
        }
    }

    async fn pause_until(&self, deadline: Instant) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.sleeper.sleep(self.interval.min(remaining)).await;
    }

    /// 等待输入框重新可用（即助手生成结束）
    pub async fn wait_until_ready(&self, max_wait: Duration) -> ReadyOutcome {
        let started = Instant::now();
        let deadline = started + max_wait;
        let mut polls = 0u32;
        loop {
            polls += 1;
            if let Some(found) = self.classifier.check(&self.page).await {
                debug!(class = %found.class, polls, "readiness wait aborted by page error");
                return ReadyOutcome::detected(found);
            }

            let status = self.page.is_input_enabled(None).await;
            if status.enabled {
                debug!(
                    polls,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "input ready"
                );
                return ReadyOutcome::ready(status.reason);
            }

            if Instant::now() >= deadline {
                return ReadyOutcome::timed_out(format!(
                    "input not ready after {}s ({})",
                    max_wait.as_secs(),
                    status.reason
                ));
            }
            self.pause_until(deadline).await;
        }
    }

    /// 等待第一条新的助手消息出现（消息数超过提交前的基线）；超时后的错误扫描由调用方负责
    pub async fn wait_until_response_starts(&self, baseline: usize, timeout: Duration) -> ReadyOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            match self.page.assistant_message_count().await {
                Ok(count) if count > baseline => {
                    return ReadyOutcome::ready(format!("assistant message #{count} appeared"));
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "assistant message count unavailable"),
            }

            if Instant::now() >= deadline {
                return ReadyOutcome::timed_out(format!(
                    "no response started within {}s",
                    timeout.as_secs()
                ));
            }
            self.pause_until(deadline).await;
        }
    }
}
