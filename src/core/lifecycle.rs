//! 单个请求的一次尝试
//!
//! Idle → ContextSwitching → ChatPreparing → AwaitingInputReady → Submitting
//! → AwaitingResponseStart → AwaitingGenerationDone → ReadingResponse → Succeeded | Failed
//!
//! 每次尝试返回 `Result<String, Failure>`；失败分类作为普通数据交给重试层。
//! 页面错误的即时恢复只在 ChatPreparing 做一次。回复开始前检测到的错误结束本次尝试；
//! 生成过程中出现的错误不丢弃已有回复，先读，读不到才按该错误失败。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::context::{ContextSwitcher, ConversationContext, UiContextSwitcher};
use crate::core::clock::Sleeper;
use crate::core::recovery::RecoveryEngine;
use crate::core::retry::Attempt;
use crate::core::state::{RequestState, StateTrace};
use crate::core::{ErrorClass, Failure};
use crate::humanize::{humanizer_from_config, Humanizer, PauseKind};
use crate::operator::Operator;
use crate::page::{ChatPage, Detection, ErrorClassifier, ReadinessPoller, ResponseReader};
use crate::sheet::{ChatMode, PromptRequest};

/// 生命周期各阶段的等待上限
#[derive(Debug, Clone, Copy)]
struct StageTimeouts {
    input_ready: Duration,
    response_start: Duration,
    generation_max: Duration,
    settle: Duration,
    new_chat: Duration,
}

fn detected(d: Detection) -> Failure {
    Failure::new(d.class, d.message)
}

pub struct RequestLifecycle {
    page: Arc<ChatPage>,
    classifier: Arc<ErrorClassifier>,
    poller: ReadinessPoller,
    reader: ResponseReader,
    recovery: RecoveryEngine,
    switcher: Arc<dyn ContextSwitcher>,
    humanizer: Arc<dyn Humanizer>,
    sleeper: Arc<dyn Sleeper>,
    timeouts: StageTimeouts,
    context: ConversationContext,
    last_trace: StateTrace,
}

impl RequestLifecycle {
    pub fn new(
        page: Arc<ChatPage>,
        operator: Arc<dyn Operator>,
        sleeper: Arc<dyn Sleeper>,
        cfg: &AppConfig,
    ) -> Self {
        let t = &cfg.timeouts;
        let classifier = Arc::new(ErrorClassifier::new(
            &cfg.classifier.phrases,
            t.classifier_budget(),
        ));
        let poller = ReadinessPoller::new(
            page.clone(),
            classifier.clone(),
            sleeper.clone(),
            t.poll_interval(),
        );
        let reader = ResponseReader::new(page.clone(), sleeper.clone(), &cfg.reader);
        let recovery = RecoveryEngine::new(page.clone(), operator, sleeper.clone(), &cfg.recovery);
        let switcher = Arc::new(UiContextSwitcher::new(
            page.clone(),
            sleeper.clone(),
            cfg.app.start_url.clone(),
            Duration::from_secs(t.project_switch_delay_secs),
            Duration::from_secs(t.model_switch_delay_secs),
        ));

        Self {
            page,
            classifier,
            poller,
            reader,
            recovery,
            switcher,
            humanizer: humanizer_from_config(&cfg.humanize),
            sleeper,
            timeouts: StageTimeouts {
                input_ready: t.input_ready(),
                response_start: t.response_start(),
                generation_max: t.generation_max(),
                settle: t.settle(),
                new_chat: Duration::from_millis(t.new_chat_delay_ms),
            },
            context: ConversationContext::default(),
            last_trace: StateTrace::default(),
        }
    }

    pub fn with_switcher(mut self, switcher: Arc<dyn ContextSwitcher>) -> Self {
        self.switcher = switcher;
        self
    }

    pub fn with_humanizer(mut self, humanizer: Arc<dyn Humanizer>) -> Self {
        self.humanizer = humanizer;
        self
    }

    pub fn humanizer(&self) -> &Arc<dyn Humanizer> {
        &self.humanizer
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    /// 最近一次尝试经过的状态
    pub fn last_trace(&self) -> &StateTrace {
        &self.last_trace
    }

    /// 执行一次尝试；attempt 从 1 开始
    pub async fn execute(&mut self, request: &PromptRequest, attempt: u32) -> Result<String, Failure> {
        let mut trace = StateTrace::start();
        let result = self.drive(request, attempt, &mut trace).await;
        match &result {
            Ok(text) => {
                trace.advance(RequestState::Succeeded);
                info!(request_id = request.id, attempt, chars = text.chars().count(), "response received");
            }
            Err(f) => {
                let at = trace.current();
                trace.advance(RequestState::Failed);
                debug!(request_id = request.id, attempt, class = %f.class, state = %at, "attempt failed");
            }
        }
        self.last_trace = trace;
        result
    }

    async fn drive(
        &mut self,
        request: &PromptRequest,
        attempt: u32,
        trace: &mut StateTrace,
    ) -> Result<String, Failure> {
        let mut fresh = false;
        if request.project.is_some() || request.model.is_some() {
            trace.advance(RequestState::ContextSwitching);
            fresh = self.apply_context(request).await;
        }

        trace.advance(RequestState::ChatPreparing);
        self.prepare_conversation(request.chat_mode, attempt, fresh).await;
        self.check_and_recover().await?;

        trace.advance(RequestState::AwaitingInputReady);
        let input = self.page.locate_input().await?;
        let status = self.page.is_input_enabled(Some(&input)).await;
        if !status.enabled {
            debug!(reason = %status.reason, "input busy, waiting");
            let ready = self.poller.wait_until_ready(self.timeouts.input_ready).await;
            if !ready.ready {
                return Err(match ready.detection {
                    Some(d) => detected(d),
                    None => Failure::new(ErrorClass::Timeout, ready.reason),
                });
            }
        }

        trace.advance(RequestState::Submitting);
        let baseline = self.page.assistant_message_count().await?;
        self.sleeper.sleep(self.humanizer.pause_for(PauseKind::Thinking)).await;
        self.page
            .submit(&input, &request.prompt, self.humanizer.as_ref())
            .await?;
        info!(request_id = request.id, attempt, baseline, "prompt submitted");

        trace.advance(RequestState::AwaitingResponseStart);
        let started = self
            .poller
            .wait_until_response_starts(baseline, self.timeouts.response_start)
            .await;
        if !started.ready {
            if let Some(d) = self.classifier.check(&self.page).await {
                return Err(detected(d));
            }
            return Err(Failure::new(ErrorClass::Timeout, started.reason));
        }

        trace.advance(RequestState::AwaitingGenerationDone);
        let done = self.poller.wait_until_ready(self.timeouts.generation_max).await;
        let interrupted = done.detection;
        if let Some(d) = &interrupted {
            warn!(request_id = request.id, class = %d.class, message = %d.message, "page error during generation, reading what is there");
        } else if !done.ready {
            warn!(request_id = request.id, reason = %done.reason, "generation still running, reading what is there");
        }
        self.sleeper.sleep(self.timeouts.settle).await;

        trace.advance(RequestState::ReadingResponse);
        let read = self.reader.read_final().await;
        match read.text {
            Some(text) if read.success => {
                if read.partial {
                    warn!(request_id = request.id, "{}", read.message);
                }
                self.sleeper.sleep(self.humanizer.pause_for(PauseKind::Reading)).await;
                Ok(text)
            }
            _ => Err(match interrupted {
                Some(d) => detected(d),
                None => Failure::new(read.class.unwrap_or(ErrorClass::Empty), read.message),
            }),
        }
    }

    /// 切换项目与模型；失败只告警。返回切换是否打开了新对话
    async fn apply_context(&mut self, request: &PromptRequest) -> bool {
        let mut fresh = false;

        if let Some(project) = request.project.as_deref() {
            if self.context.in_project(project) {
                debug!(project, "already in project");
            } else if self.switcher.switch_project(project).await
                && self.switcher.verify_current_project(project).await
            {
                self.context.project = Some(project.trim().to_string());
                self.context.series_open = false;
                fresh = true;
            } else {
                warn!(request_id = request.id, project, "project switch failed, continuing in current context");
            }
        }

        if let Some(model) = request.model.as_deref() {
            if self.context.on_model(model) {
                debug!(model, "model already selected");
            } else if self.switcher.switch_model(model).await {
                self.context.model = Some(model.trim().to_string());
            } else {
                warn!(request_id = request.id, model, "model switch failed, continuing with current model");
            }
        }

        fresh
    }

    /// 按对话模式决定是否开新对话；新对话只在请求的第一次尝试时打开
    async fn prepare_conversation(&mut self, mode: ChatMode, attempt: u32, fresh: bool) {
        let wants_new = match mode {
            ChatMode::New => {
                self.context.series_open = false;
                attempt == 1
            }
            ChatMode::Series => !std::mem::replace(&mut self.context.series_open, true),
            ChatMode::Continue => false,
        };
        if !wants_new {
            return;
        }
        if fresh {
            debug!("context switch already opened a new conversation");
            return;
        }
        self.sleeper.sleep(self.humanizer.pause_for(PauseKind::Navigating)).await;
        if self.page.start_new_conversation().await {
            debug!("new conversation opened");
            self.sleeper.sleep(self.timeouts.new_chat).await;
        } else {
            debug!("new chat control not found, assuming fresh conversation");
        }
    }

    /// 提交前的错误扫描；恢复后仍存在的错误结束本次尝试
    async fn check_and_recover(&self) -> Result<(), Failure> {
        let Some(found) = self.classifier.check(&self.page).await else {
            return Ok(());
        };
        self.recovery.recover(&found).await?;
        match self.classifier.check(&self.page).await {
            Some(still) => Err(Failure::new(
                still.class,
                format!("{} (still present after recovery)", still.message),
            )),
            None => Ok(()),
        }
    }
}

/// 把生命周期绑定到一个请求，交给重试层
pub struct LifecycleAttempt<'a> {
    pub lifecycle: &'a mut RequestLifecycle,
    pub request: &'a PromptRequest,
}

#[async_trait]
impl Attempt for LifecycleAttempt<'_> {
    type Output = String;

    async fn attempt(&mut self, n: u32) -> Result<String, Failure> {
        self.lifecycle.execute(self.request, n).await
    }
}
