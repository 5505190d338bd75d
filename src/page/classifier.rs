//! 错误分类器：扫描页面文本与可见弹窗
//!
//! 只扫描对话区之外的文本（横幅、提示条、弹窗），提示词和回复里出现的短语不算页面错误。
//! 短语表按顺序匹配（不区分大小写），第一个命中的分类胜出；
//! 没有短语命中但有可见且带文本的弹窗时归为 unknown。
//! 检查本身是只读的，读取失败视为「没有检测到错误」，不会向上抛出。

use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::ErrorClass;
use crate::page::ChatPage;

const DIALOG_MESSAGE_LIMIT: usize = 200;

/// 一个分类及其触发短语
#[derive(Debug, Clone, Deserialize)]
pub struct PhraseSet {
    pub class: ErrorClass,
    pub phrases: Vec<String>,
}

impl PhraseSet {
    fn new(class: ErrorClass, phrases: &[&str]) -> Self {
        Self {
            class,
            phrases: phrases.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// 内置短语表（英文 + 俄文界面），顺序即优先级
    pub fn defaults() -> Vec<PhraseSet> {
        vec![
            PhraseSet::new(
                ErrorClass::RateLimit,
                &[
                    "You've reached our limit",
                    "Too many requests",
                    "Rate limit",
                    "превышен лимит",
                    "слишком много запросов",
                ],
            ),
            PhraseSet::new(
                ErrorClass::Network,
                &[
                    "Network error",
                    "Unable to load",
                    "Connection failed",
                    "ошибка сети",
                    "не удалось загрузить",
                ],
            ),
            PhraseSet::new(
                ErrorClass::Capacity,
                &["at capacity", "high demand", "перегружен", "высокая нагрузка"],
            ),
            PhraseSet::new(
                ErrorClass::Auth,
                &[
                    "Sign in",
                    "Log in",
                    "Authentication required",
                    "войдите",
                    "требуется авторизация",
                ],
            ),
        ]
    }
}

/// 一次检测结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub class: ErrorClass,
    pub message: String,
}

pub struct ErrorClassifier {
    /// 已转小写的短语表
    phrases: Vec<PhraseSet>,
    budget: Duration,
}

impl ErrorClassifier {
    pub fn new(phrases: &[PhraseSet], budget: Duration) -> Self {
        let phrases = phrases
            .iter()
            .map(|set| PhraseSet {
                class: set.class,
                phrases: set.phrases.iter().map(|p| p.to_lowercase()).collect(),
            })
            .collect();
        Self { phrases, budget }
    }

    /// 纯文本分类，不接触页面
    pub fn classify_text(&self, text: &str) -> Option<Detection> {
        let lowered = text.to_lowercase();
        for set in &self.phrases {
            if let Some(phrase) = set.phrases.iter().find(|p| lowered.contains(p.as_str())) {
                return Some(Detection {
                    class: set.class,
                    message: format!("Page reports '{phrase}'"),
                });
            }
        }
        None
    }

    /// 扫描当前页面；超出时间预算只告警，结果照常返回
    pub async fn check(&self, page: &ChatPage) -> Option<Detection> {
        let started = Instant::now();
        let found = self.scan(page).await;
        let elapsed = started.elapsed();
        if elapsed > self.budget {
            warn!(
                budget_ms = self.budget.as_millis() as u64,
                elapsed_ms = elapsed.as_millis() as u64,
                "error scan exceeded budget"
            );
        }
        found
    }

    async fn scan(&self, page: &ChatPage) -> Option<Detection> {
        match page.driver().body_text(&page.conversation_locators()).await {
            Ok(body) => {
                if let Some(found) = self.classify_text(&body) {
                    debug!(class = %found.class, "error phrase detected");
                    return Some(found);
                }
            }
            Err(e) => debug!(error = %e, "body text unavailable"),
        }
        self.scan_dialogs(page).await
    }

    async fn scan_dialogs(&self, page: &ChatPage) -> Option<Detection> {
        let driver = page.driver();
        for locator in page.selectors().dialog.iter() {
            let Ok(found) = driver.find_all(locator).await else {
                continue;
            };
            for el in found {
                let visible = matches!(driver.element_state(&el).await, Ok(s) if s.visible);
                if !visible {
                    continue;
                }
                let Ok(text) = driver.text_of(&el).await else {
                    continue;
                };
                let text = text.trim();
                if !text.is_empty() {
                    return Some(Detection {
                        class: ErrorClass::Unknown,
                        message: text.chars().take(DIALOG_MESSAGE_LIMIT).collect(),
                    });
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::TokioSleeper;
    use crate::page::{Reply, ScriptedPage, Selectors};
    use std::sync::Arc;

    fn classifier() -> ErrorClassifier {
        ErrorClassifier::new(&PhraseSet::defaults(), Duration::from_millis(300))
    }

    fn chat_page(page: Arc<ScriptedPage>) -> ChatPage {
        ChatPage::new(
            page,
            Selectors::default(),
            Duration::from_secs(1),
            3,
            Arc::new(TokioSleeper),
        )
    }

    #[test]
    fn test_case_insensitive_match() {
        let found = classifier().classify_text("TOO MANY REQUESTS in 1 hour").unwrap();
        assert_eq!(found.class, ErrorClass::RateLimit);
    }

    #[test]
    fn test_first_class_in_table_order_wins() {
        // 同时包含 network 与 auth 短语
        let found = classifier()
            .classify_text("Network error. Please log in again.")
            .unwrap();
        assert_eq!(found.class, ErrorClass::Network);
    }

    #[test]
    fn test_cyrillic_phrases() {
        let found = classifier().classify_text("Сервис ПЕРЕГРУЖЕН").unwrap();
        assert_eq!(found.class, ErrorClass::Capacity);
        assert!(classifier().classify_text("всё хорошо").is_none());
    }

    #[tokio::test]
    async fn test_visible_dialog_is_unknown_and_truncated() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        page.show_dialog(&"x".repeat(500));
        let found = classifier().check(&chat_page(page)).await.unwrap();
        assert_eq!(found.class, ErrorClass::Unknown);
        assert_eq!(found.message.chars().count(), 200);
    }

    #[tokio::test]
    async fn test_check_is_idempotent() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        page.set_body_text("Something went wrong. Network error.");
        let adapter = chat_page(page);
        let c = classifier();
        let first = c.check(&adapter).await;
        let second = c.check(&adapter).await;
        assert_eq!(first, second);
        assert_eq!(first.unwrap().class, ErrorClass::Network);
    }

    #[tokio::test]
    async fn test_conversation_text_is_not_a_page_error() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        page.push_reply(Reply::text("Sign in is temporarily at capacity, try later."));
        page.submit_prompt("Too many requests when I log in, why?");
        let adapter = chat_page(page.clone());
        assert!(classifier().check(&adapter).await.is_none());

        page.set_body_text("Network error. Please retry.");
        assert_eq!(classifier().check(&adapter).await.unwrap().class, ErrorClass::Network);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_scan_still_reports_detection() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        page.set_body_text("You've reached our limit of messages.");
        page.set_read_latency(Duration::from_secs(2));
        let found = classifier().check(&chat_page(page)).await.unwrap();
        assert_eq!(found.class, ErrorClass::RateLimit);
    }

    #[tokio::test]
    async fn test_clean_page_has_no_detection() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        page.set_body_text("How can I help you today?");
        assert!(classifier().check(&chat_page(page)).await.is_none());
    }
}
