//! 批处理主循环
//!
//! 按表格顺序逐条处理待处理请求：先写 in_progress，再跑带重试的生命周期，
//! 结束后立即写回最终状态。请求之间按节奏器停顿。rate_limit / auth 或操作员拒绝的失败
//! 会暂停整批，询问是否继续。取消令牌在每个顶层等待点生效。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::core::clock::Sleeper;
use crate::core::lifecycle::{LifecycleAttempt, RequestLifecycle};
use crate::core::retry::{RetryOrchestrator, RetryOutcome, RetryPolicy};
use crate::core::{BatchError, ErrorClass};
use crate::export::JsonExporter;
use crate::humanize::{pacer_from_config, Humanizer, Pacer};
use crate::operator::Operator;
use crate::sheet::{OutcomeSink, PromptRequest, RequestSource, RequestStatus};
use crate::stats::{BatchStats, RequestRecord};

/// 一个请求的最终结果
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub id: usize,
    pub success: bool,
    pub response: Option<String>,
    pub class: Option<ErrorClass>,
    /// 失败描述；成功时为空
    pub detail: String,
    pub attempts: u32,
    pub duration: Duration,
    /// 操作员选择了停止
    pub terminal: bool,
}

impl RequestOutcome {
    fn from_retry(id: usize, outcome: RetryOutcome<String>, duration: Duration) -> Self {
        Self {
            id,
            success: outcome.success,
            response: outcome.result,
            class: outcome.class,
            detail: outcome.message,
            attempts: outcome.attempts_used,
            duration,
            terminal: outcome.terminal,
        }
    }

    pub fn status(&self) -> RequestStatus {
        if self.success {
            RequestStatus::Success
        } else {
            RequestStatus::Error(self.class.unwrap_or(ErrorClass::Unknown))
        }
    }

    /// 失败需要操作员决定整批是否继续
    fn pauses_batch(&self) -> bool {
        !self.success && (self.terminal || self.class.is_some_and(|c| c.pauses_batch()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    /// 本次运行开始时的待处理请求数
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 因中断或操作员选择而提前结束
    pub aborted: bool,
    pub outcomes: Vec<RequestOutcome>,
}

impl BatchSummary {
    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }
}

pub struct BatchDriver {
    lifecycle: RequestLifecycle,
    retry: RetryOrchestrator,
    pacer: Arc<dyn Pacer>,
    operator: Arc<dyn Operator>,
    sleeper: Arc<dyn Sleeper>,
    exporter: Option<JsonExporter>,
    cancel: CancellationToken,
}

impl BatchDriver {
    pub fn new(
        lifecycle: RequestLifecycle,
        operator: Arc<dyn Operator>,
        sleeper: Arc<dyn Sleeper>,
        cancel: CancellationToken,
        cfg: &AppConfig,
    ) -> Self {
        Self {
            lifecycle,
            retry: RetryOrchestrator::new(RetryPolicy::from_config(&cfg.retry), sleeper.clone()),
            pacer: pacer_from_config(&cfg.pacing),
            operator,
            sleeper,
            exporter: cfg
                .export
                .enabled
                .then(|| JsonExporter::new(cfg.export.dir.clone())),
            cancel,
        }
    }

    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_exporter(mut self, exporter: Option<JsonExporter>) -> Self {
        self.exporter = exporter;
        self
    }

    /// 处理 sheet 中所有待处理请求
    pub async fn run<S>(&mut self, sheet: &mut S) -> Result<BatchSummary, BatchError>
    where
        S: RequestSource + OutcomeSink + Send,
    {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("batch", %run_id);
        self.run_inner(sheet).instrument(span).await
    }

    async fn run_inner<S>(&mut self, sheet: &mut S) -> Result<BatchSummary, BatchError>
    where
        S: RequestSource + OutcomeSink + Send,
    {
        let pending = sheet.pending();
        let total = pending.len();
        let mut summary = BatchSummary {
            total,
            ..BatchSummary::default()
        };
        if pending.is_empty() {
            info!("nothing to process");
            return Ok(summary);
        }

        info!(
            total,
            max_attempts = self.retry.policy().max_attempts,
            "batch started"
        );
        let humanizer = self.lifecycle.humanizer().clone();
        let mut stats = BatchStats::new();
        stats.start();

        for (index, request) in pending.iter().enumerate() {
            if !self.wait_for_schedule(humanizer.as_ref()).await {
                summary.aborted = true;
                break;
            }

            info!(
                request_id = request.id,
                position = index + 1,
                total,
                chat_mode = request.chat_mode.as_str(),
                project = request.project.as_deref().unwrap_or("-"),
                model = request.model.as_deref().unwrap_or("-"),
                "processing request"
            );
            sheet.record(request.id, RequestStatus::InProgress, None, None)?;

            let Some(outcome) = self.process(request).await else {
                warn!(request_id = request.id, "interrupted, request stays in progress");
                summary.aborted = true;
                break;
            };

            sheet.record(
                request.id,
                outcome.status(),
                outcome.response.as_deref(),
                (!outcome.success).then_some(outcome.detail.as_str()),
            )?;
            self.export(request, &outcome);

            stats.add(RequestRecord {
                id: outcome.id,
                success: outcome.success,
                duration: outcome.duration,
                attempts: outcome.attempts,
                class: outcome.class,
            });
            stats.log_progress(index + 1, total);

            let stop = outcome.pauses_batch() && !self.confirm_continue(&outcome).await;
            if outcome.success {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            summary.outcomes.push(outcome);
            if stop {
                warn!("batch stopped by operator");
                summary.aborted = true;
                break;
            }

            if index + 1 < total && !self.pace(humanizer.as_ref()).await {
                summary.aborted = true;
                break;
            }
        }

        stats.finish();
        stats.log_summary();
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            processed = summary.processed(),
            total,
            aborted = summary.aborted,
            "batch finished"
        );
        Ok(summary)
    }

    /// 带重试地处理一个请求；被取消时返回 None
    async fn process(&mut self, request: &PromptRequest) -> Option<RequestOutcome> {
        let started = Instant::now();
        let mut attempt = LifecycleAttempt {
            lifecycle: &mut self.lifecycle,
            request,
        };
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            outcome = self.retry.run(&mut attempt) => outcome,
        };
        let outcome = RequestOutcome::from_retry(request.id, outcome, started.elapsed());

        if outcome.success {
            info!(
                request_id = request.id,
                attempts = outcome.attempts,
                secs = outcome.duration.as_secs_f64(),
                "request succeeded"
            );
        } else {
            error!(
                request_id = request.id,
                attempts = outcome.attempts,
                class = %outcome.status(),
                detail = %outcome.detail,
                "request failed"
            );
        }
        Some(outcome)
    }

    fn export(&self, request: &PromptRequest, outcome: &RequestOutcome) {
        let Some(exporter) = &self.exporter else {
            return;
        };
        if let Err(e) = exporter.save(request, outcome) {
            warn!(request_id = request.id, error = %e, "JSON export failed");
        }
    }

    async fn confirm_continue(&self, outcome: &RequestOutcome) -> bool {
        let class = outcome.class.unwrap_or(ErrorClass::Unknown);
        let question = format!(
            "Request {} failed with {class} ({}). Continue with the next request?",
            outcome.id, outcome.detail
        );
        self.operator.confirm(&question).await
    }

    /// 可取消的停顿；被取消时返回 false
    async fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = self.sleeper.sleep(duration) => true,
        }
    }

    async fn wait_for_schedule(&self, humanizer: &dyn Humanizer) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        while let Some((wait, reason)) = humanizer.schedule_wait() {
            info!(%reason, wait_secs = wait.as_secs(), "outside working hours, waiting");
            if !self.pause(wait).await {
                return false;
            }
        }
        true
    }

    async fn pace(&self, humanizer: &dyn Humanizer) -> bool {
        let delay = self.pacer.next_delay();
        info!(secs = format!("{:.1}", delay.as_secs_f64()), "pause before next request");
        if !self.pause(delay).await {
            return false;
        }
        if let Some(rest) = humanizer.break_after_request() {
            info!(secs = rest.as_secs(), "taking a break");
            return self.pause(rest).await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(success: bool, class: Option<ErrorClass>, terminal: bool) -> RequestOutcome {
        RequestOutcome {
            id: 2,
            success,
            response: success.then(|| "ok".to_string()),
            class,
            detail: String::new(),
            attempts: 1,
            duration: Duration::from_secs(1),
            terminal,
        }
    }

    #[test]
    fn test_status_from_outcome() {
        assert_eq!(outcome(true, None, false).status(), RequestStatus::Success);
        assert_eq!(
            outcome(false, Some(ErrorClass::Empty), false).status(),
            RequestStatus::Error(ErrorClass::Empty)
        );
        assert_eq!(
            outcome(false, None, false).status(),
            RequestStatus::Error(ErrorClass::Unknown)
        );
    }

    #[test]
    fn test_which_failures_pause_the_batch() {
        assert!(outcome(false, Some(ErrorClass::RateLimit), false).pauses_batch());
        assert!(outcome(false, Some(ErrorClass::Auth), false).pauses_batch());
        assert!(outcome(false, Some(ErrorClass::Unknown), true).pauses_batch());
        assert!(!outcome(false, Some(ErrorClass::Timeout), false).pauses_batch());
        assert!(!outcome(true, None, false).pauses_batch());
    }
}
