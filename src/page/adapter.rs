//! ChatPage：页面交互适配器
//!
//! 把输入框、发送、助手消息列表、「停止生成」按钮等元素的发现封装成稳定调用，
//! 隔离 DOM 选择器的变动。元素过期（页面重渲染）在这里内部重试，耗尽后归一化为 exception。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;

use crate::core::clock::Sleeper;
use crate::core::{ErrorClass, Failure};
use crate::humanize::{Humanizer, PauseKind};
use crate::page::{DriverError, ElementHandle, Locator, LocatorChain, PageDriver};

const LOCATE_POLL: Duration = Duration::from_millis(250);
const STALE_PAUSE: Duration = Duration::from_millis(200);

/// 页面各元素的定位器链（[selectors] 段）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub input: LocatorChain,
    pub stop_button: LocatorChain,
    pub assistant_message: LocatorChain,
    pub user_message: LocatorChain,
    /// 消息内部的「仍在生成」标记
    pub loading_indicator: LocatorChain,
    pub new_chat: LocatorChain,
    pub dialog: LocatorChain,
    pub project_link: LocatorChain,
    pub model_switcher: LocatorChain,
    pub legacy_models: LocatorChain,
    pub model_option: LocatorChain,
    /// 输入框 placeholder 中表示「助手正在输入」的片段（小写比较）
    pub busy_placeholders: Vec<String>,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            input: vec![
                Locator::css("#prompt-textarea"),
                Locator::css("textarea[placeholder*='Message']"),
                Locator::css("textarea[placeholder*='Новый чат']"),
                Locator::xpath("//textarea"),
            ]
            .into(),
            stop_button: vec![
                Locator::css("button[data-testid='stop-button']"),
                Locator::xpath(
                    "//button[contains(text(), 'Stop')] | //button[contains(text(), 'Остановить')]",
                ),
            ]
            .into(),
            assistant_message: vec![Locator::css("[data-message-author-role='assistant']")].into(),
            user_message: vec![Locator::css("[data-message-author-role='user']")].into(),
            loading_indicator: vec![
                Locator::css(".result-streaming"),
                Locator::css(".result-thinking"),
            ]
            .into(),
            new_chat: vec![
                Locator::css("[data-testid='create-new-chat-button']"),
                Locator::xpath("//button[contains(., 'Новый чат')]"),
                Locator::xpath("//a[contains(., 'Новый чат')]"),
                Locator::xpath("//button[contains(., 'New chat')]"),
                Locator::xpath("//a[contains(., 'New chat')]"),
            ]
            .into(),
            dialog: vec![
                Locator::css("[role='dialog']"),
                Locator::css(".modal"),
                Locator::css(".error-message"),
            ]
            .into(),
            project_link: vec![Locator::css("a[href*='/project']")].into(),
            model_switcher: vec![
                Locator::css("button[data-testid='model-switcher-dropdown-button']"),
                Locator::xpath("//button[contains(., 'ChatGPT')]"),
            ]
            .into(),
            legacy_models: vec![
                Locator::xpath("//div[text()='Устаревшие модели']"),
                Locator::xpath("//*[contains(text(), 'Устаревшие модели')]"),
                Locator::xpath("//div[contains(text(), 'Legacy')]"),
            ]
            .into(),
            model_option: vec![
                Locator::css("[role='menuitem']"),
                Locator::css("[role='menuitemradio']"),
            ]
            .into(),
            busy_placeholders: vec!["typing".to_string(), "печатает".to_string()],
        }
    }
}

/// 输入框可用性：是否可输入 + 第一个未通过的检查项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputStatus {
    pub enabled: bool,
    pub reason: String,
}

impl InputStatus {
    fn ready() -> Self {
        Self {
            enabled: true,
            reason: "input ready".to_string(),
        }
    }

    fn blocked(reason: impl Into<String>) -> Self {
        Self {
            enabled: false,
            reason: reason.into(),
        }
    }
}

/// 页面交互适配器
pub struct ChatPage {
    driver: Arc<dyn PageDriver>,
    selectors: Selectors,
    element_wait: Duration,
    stale_retries: u32,
    sleeper: Arc<dyn Sleeper>,
}

impl ChatPage {
    pub fn new(
        driver: Arc<dyn PageDriver>,
        selectors: Selectors,
        element_wait: Duration,
        stale_retries: u32,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            driver,
            selectors,
            element_wait,
            stale_retries,
            sleeper,
        }
    }

    pub fn driver(&self) -> &Arc<dyn PageDriver> {
        &self.driver
    }

    pub fn selectors(&self) -> &Selectors {
        &self.selectors
    }

    /// 对话区（用户与助手消息）的全部定位器
    pub fn conversation_locators(&self) -> Vec<Locator> {
        self.selectors
            .user_message
            .iter()
            .chain(self.selectors.assistant_message.iter())
            .cloned()
            .collect()
    }

    /// 元素过期时重试 op，其余错误原样返回
    async fn retry_stale<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, DriverError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        let mut retries = 0;
        loop {
            match op().await {
                Err(DriverError::Stale(msg)) if retries < self.stale_retries => {
                    retries += 1;
                    debug!(what, retries, %msg, "stale element, retrying");
                    self.sleeper.sleep(STALE_PAUSE).await;
                }
                other => return other,
            }
        }
    }

    /// 单轮查找：按链的优先级返回第一个命中的元素
    async fn first_in_chain(&self, chain: &LocatorChain) -> Option<ElementHandle> {
        for locator in chain.iter() {
            match self.driver.find_all(locator).await {
                Ok(found) => {
                    if let Some(el) = found.into_iter().next() {
                        return Some(el);
                    }
                }
                Err(e) => debug!(%locator, error = %e, "locator lookup failed"),
            }
        }
        None
    }

    /// 在链中找第一个可见元素（任意定位器的任意匹配）
    pub async fn first_visible(&self, chain: &LocatorChain) -> Option<ElementHandle> {
        for locator in chain.iter() {
            let Ok(found) = self.driver.find_all(locator).await else {
                continue;
            };
            for el in found {
                if let Ok(state) = self.driver.element_state(&el).await {
                    if state.visible {
                        return Some(el);
                    }
                }
            }
        }
        None
    }

    /// 定位输入框：在 element_wait 内按优先级轮询各定位策略
    pub async fn locate_input(&self) -> Result<ElementHandle, Failure> {
        let deadline = Instant::now() + self.element_wait;
        loop {
            if let Some(el) = self.first_in_chain(&self.selectors.input).await {
                debug!(locator = %el.locator, "input located");
                return Ok(el);
            }
            if Instant::now() >= deadline {
                return Err(Failure::new(
                    ErrorClass::NotFound,
                    format!("Prompt input not found within {}s", self.element_wait.as_secs()),
                ));
            }
            self.sleeper.sleep(LOCATE_POLL).await;
        }
    }

    /// 「现在能输入吗」的唯一判定
    ///
    /// 依次检查：存在且可见、未 disabled、未 readonly、placeholder 不是「正在输入」、
    /// 页面上没有可见的停止生成按钮。第一个未通过的检查项短路返回。
    pub async fn is_input_enabled(&self, handle: Option<&ElementHandle>) -> InputStatus {
        let located;
        let el = match handle {
            Some(el) => el,
            None => match self.first_in_chain(&self.selectors.input).await {
                Some(el) => {
                    located = el;
                    &located
                }
                None => return InputStatus::blocked("input not found"),
            },
        };

        let driver = &self.driver;
        let state = match self
            .retry_stale("input state", move || driver.element_state(el))
            .await
        {
            Ok(s) => s,
            Err(DriverError::Stale(_)) => return InputStatus::blocked("input element is stale"),
            Err(e) => return InputStatus::blocked(format!("input check failed: {e}")),
        };

        if !state.visible {
            return InputStatus::blocked("input not visible");
        }
        if state.disabled {
            return InputStatus::blocked("input disabled");
        }
        if state.readonly {
            return InputStatus::blocked("input read-only");
        }
        if let Some(placeholder) = state.placeholder.as_deref() {
            let placeholder = placeholder.to_lowercase();
            if self
                .selectors
                .busy_placeholders
                .iter()
                .any(|p| placeholder.contains(&p.to_lowercase()))
            {
                return InputStatus::blocked("assistant is composing");
            }
        }
        if self.stop_control_visible().await {
            return InputStatus::blocked("stop-generation control visible");
        }
        InputStatus::ready()
    }

    pub async fn stop_control_visible(&self) -> bool {
        self.first_visible(&self.selectors.stop_button).await.is_some()
    }

    /// 聚焦 → 清空 → 输入（可按拟人化计划分段）→ 核对 → 提交
    pub async fn submit(
        &self,
        handle: &ElementHandle,
        text: &str,
        humanizer: &dyn Humanizer,
    ) -> Result<(), Failure> {
        let driver = &self.driver;
        self.retry_stale("focus input", move || driver.focus_and_clear(handle))
            .await
            .map_err(|e| Failure::new(ErrorClass::Exception, format!("Failed to clear input: {e}")))?;
        self.sleeper.sleep(humanizer.pause_for(PauseKind::Typing)).await;

        for (chunk, delay) in humanizer.typing_plan(text) {
            let chunk = chunk.as_str();
            self.retry_stale("type prompt", move || driver.insert_text(handle, chunk))
                .await
                .map_err(|e| Failure::new(ErrorClass::Exception, format!("Failed to type prompt: {e}")))?;
            self.sleeper.sleep(delay).await;
        }
        self.sleeper.sleep(humanizer.pause_for(PauseKind::Verifying)).await;

        self.retry_stale("submit prompt", move || driver.press_enter(handle))
            .await
            .map_err(|e| Failure::new(ErrorClass::Exception, format!("Failed to submit prompt: {e}")))
    }

    /// 所有助手消息（文档顺序）：取第一个有命中的定位器
    async fn assistant_messages(&self) -> Result<Vec<ElementHandle>, Failure> {
        for locator in self.selectors.assistant_message.iter() {
            let found = self
                .driver
                .find_all(locator)
                .await
                .map_err(|e| Failure::new(ErrorClass::Exception, e.to_string()))?;
            if !found.is_empty() {
                return Ok(found);
            }
        }
        Ok(Vec::new())
    }

    pub async fn assistant_message_count(&self) -> Result<usize, Failure> {
        Ok(self.assistant_messages().await?.len())
    }

    /// 最新一条助手消息（文档顺序中的最后一个）
    pub async fn latest_assistant_message(&self) -> Result<Option<ElementHandle>, Failure> {
        Ok(self.assistant_messages().await?.pop())
    }

    /// 实时读取消息文本；过期重试耗尽后报 exception
    pub async fn extract_text(&self, el: &ElementHandle) -> Result<String, Failure> {
        let driver = &self.driver;
        self.retry_stale("extract text", move || driver.text_of(el))
            .await
            .map_err(|e| Failure::new(ErrorClass::Exception, e.to_string()))
    }

    /// 消息内部是否仍有加载标记
    pub async fn is_streaming(&self, el: &ElementHandle) -> bool {
        for locator in self.selectors.loading_indicator.iter() {
            if let Ok(true) = self.driver.contains(el, locator).await {
                return true;
            }
        }
        false
    }

    /// 点击「新对话」；找不到控件时返回 false（视为已经处在新对话中）
    pub async fn start_new_conversation(&self) -> bool {
        let Some(button) = self.first_visible(&self.selectors.new_chat).await else {
            return false;
        };
        match self.driver.click(&button).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "new chat click failed");
                false
            }
        }
    }

    pub async fn reload(&self) -> Result<(), DriverError> {
        self.driver.reload().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::TokioSleeper;
    use crate::humanize::NoopHumanizer;
    use crate::page::mock::ScriptedPage;

    fn chat_page(page: Arc<ScriptedPage>) -> ChatPage {
        ChatPage::new(
            page,
            Selectors::default(),
            Duration::from_secs(2),
            3,
            Arc::new(TokioSleeper),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_locate_input_not_found() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        page.set_input_present(false);
        let err = chat_page(page).locate_input().await.unwrap_err();
        assert_eq!(err.class, ErrorClass::NotFound);
    }

    #[tokio::test]
    async fn test_input_checks_short_circuit_in_order() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        let adapter = chat_page(page.clone());
        let input = adapter.locate_input().await.unwrap();

        page.set_input_disabled(true);
        page.set_stop_visible(true);
        let status = adapter.is_input_enabled(Some(&input)).await;
        assert!(!status.enabled);
        assert_eq!(status.reason, "input disabled");

        page.set_input_disabled(false);
        let status = adapter.is_input_enabled(Some(&input)).await;
        assert_eq!(status.reason, "stop-generation control visible");

        page.set_stop_visible(false);
        page.set_placeholder(Some("ChatGPT is typing..."));
        let status = adapter.is_input_enabled(Some(&input)).await;
        assert_eq!(status.reason, "assistant is composing");

        page.set_placeholder(None);
        assert!(adapter.is_input_enabled(None).await.enabled);
    }

    #[tokio::test]
    async fn test_submit_clears_existing_content() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        page.set_input_value("leftover draft");
        let adapter = chat_page(page.clone());
        let input = adapter.locate_input().await.unwrap();
        adapter.submit(&input, "hello", &NoopHumanizer).await.unwrap();
        assert_eq!(page.submissions(), vec!["hello".to_string()]);
    }

    /// 记录每次停顿类型的拟人化策略
    #[derive(Default)]
    struct RecordingHumanizer(std::sync::Mutex<Vec<PauseKind>>);

    impl Humanizer for RecordingHumanizer {
        fn pause_for(&self, kind: PauseKind) -> Duration {
            self.0.lock().unwrap().push(kind);
            Duration::from_secs(1)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_pauses_before_typing_and_before_enter() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        let adapter = chat_page(page.clone());
        let input = adapter.locate_input().await.unwrap();
        let humanizer = RecordingHumanizer::default();
        adapter.submit(&input, "hello", &humanizer).await.unwrap();
        assert_eq!(
            *humanizer.0.lock().unwrap(),
            vec![PauseKind::Typing, PauseKind::Verifying]
        );
        assert_eq!(page.submissions(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_conversation_locators_cover_both_authors() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        let locators = chat_page(page).conversation_locators();
        assert_eq!(locators.len(), 2);
        assert!(locators.iter().any(|l| l.value().contains("'user'")));
        assert!(locators.iter().any(|l| l.value().contains("'assistant'")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extract_text_survives_stale_reads() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        page.push_assistant_message("final answer");
        page.set_stale_reads(2);
        let adapter = chat_page(page);
        let msg = adapter.latest_assistant_message().await.unwrap().unwrap();
        assert_eq!(adapter.extract_text(&msg).await.unwrap(), "final answer");
    }

    #[tokio::test(start_paused = true)]
    async fn test_extract_text_stale_exhausted_is_exception() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        page.push_assistant_message("final answer");
        page.set_stale_reads(10);
        let adapter = chat_page(page);
        let msg = adapter.latest_assistant_message().await.unwrap().unwrap();
        let err = adapter.extract_text(&msg).await.unwrap_err();
        assert_eq!(err.class, ErrorClass::Exception);
    }

    #[tokio::test]
    async fn test_latest_message_is_last_in_document_order() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        page.push_assistant_message("first");
        page.push_assistant_message("second");
        let adapter = chat_page(page);
        let msg = adapter.latest_assistant_message().await.unwrap().unwrap();
        assert_eq!(msg.index, 1);
        assert_eq!(adapter.extract_text(&msg).await.unwrap(), "second");
    }
}
