//! 最终回复读取
//!
//! 每次都重新定位最新的助手消息并实时读取文本。以下情况会短暂停顿后重读：
//! 还没有消息、文本为空、消息内仍有加载标记、文本过短、以省略号结尾。
//! 重读耗尽后，非空但不完整的文本按部分结果视为成功；仍为空则失败（empty）。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ReaderSection;
use crate::core::clock::Sleeper;
use crate::core::ErrorClass;
use crate::page::ChatPage;

/// 读取结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    pub success: bool,
    pub text: Option<String>,
    pub class: Option<ErrorClass>,
    pub message: String,
    /// 成功但未通过完整性检查
    pub partial: bool,
}

pub struct ResponseReader {
    page: Arc<ChatPage>,
    sleeper: Arc<dyn Sleeper>,
    max_attempts: u32,
    pause: Duration,
    min_complete_chars: usize,
}

/// 不完整的原因；None 表示看起来已经完整
fn incomplete_reason(text: &str, streaming: bool, min_chars: usize) -> Option<&'static str> {
    if streaming {
        Some("loading indicator still present")
    } else if text.chars().count() < min_chars {
        Some("text suspiciously short")
    } else if text.ends_with("...") || text.ends_with('…') {
        Some("text ends with an ellipsis")
    } else {
        None
    }
}

impl ResponseReader {
    pub fn new(page: Arc<ChatPage>, sleeper: Arc<dyn Sleeper>, cfg: &ReaderSection) -> Self {
        Self {
            page,
            sleeper,
            max_attempts: cfg.max_attempts.max(1),
            pause: Duration::from_millis(cfg.retry_pause_ms),
            min_complete_chars: cfg.min_complete_chars,
        }
    }

    pub async fn read_final(&self) -> ReadOutcome {
        let mut partial: Option<String> = None;
        let mut last_class = ErrorClass::Empty;
        let mut last_reason = String::from("no assistant message");

        for attempt in 1..=self.max_attempts {
            match self.page.latest_assistant_message().await {
                Ok(None) => {
                    last_class = ErrorClass::Empty;
                    last_reason = "no assistant message".to_string();
                }
                Err(f) => {
                    last_class = f.class;
                    last_reason = f.message;
                }
                Ok(Some(el)) => match self.page.extract_text(&el).await {
                    Err(f) => {
                        last_class = f.class;
                        last_reason = f.message;
                    }
                    Ok(raw) => {
                        let text = raw.trim();
                        if text.is_empty() {
                            last_class = ErrorClass::Empty;
                            last_reason = "response text is empty".to_string();
                        } else {
                            let streaming = self.page.is_streaming(&el).await;
                            match incomplete_reason(text, streaming, self.min_complete_chars) {
                                None => {
                                    debug!(attempt, chars = text.chars().count(), "response read");
                                    return ReadOutcome {
                                        success: true,
                                        text: Some(text.to_string()),
                                        class: None,
                                        message: format!("read on attempt {attempt}"),
                                        partial: false,
                                    };
                                }
                                Some(why) => {
                                    partial = Some(text.to_string());
                                    last_reason = why.to_string();
                                }
                            }
                        }
                    }
                },
            }

            debug!(attempt, reason = %last_reason, "response not final yet");
            if attempt < self.max_attempts {
                self.sleeper.sleep(self.pause).await;
            }
        }

        if let Some(text) = partial {
            warn!(reason = %last_reason, "returning possibly incomplete response");
            return ReadOutcome {
                success: true,
                text: Some(text),
                class: None,
                message: format!("partial response: {last_reason}"),
                partial: true,
            };
        }

        ReadOutcome {
            success: false,
            text: None,
            class: Some(last_class),
            message: last_reason,
            partial: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::TokioSleeper;
    use crate::page::{ScriptedPage, Selectors};

    fn reader(page: Arc<ScriptedPage>) -> ResponseReader {
        let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
        let adapter = Arc::new(ChatPage::new(
            page,
            Selectors::default(),
            Duration::from_secs(1),
            3,
            sleeper.clone(),
        ));
        ResponseReader::new(adapter, sleeper, &ReaderSection::default())
    }

    #[test]
    fn test_incomplete_reasons() {
        assert!(incomplete_reason("Hello world", false, 2).is_none());
        assert!(incomplete_reason("Hello world", true, 2).is_some());
        assert!(incomplete_reason("a", false, 2).is_some());
        assert!(incomplete_reason("Let me think...", false, 2).is_some());
        assert!(incomplete_reason("Let me think…", false, 2).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_on_every_attempt_fails_with_empty() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        page.push_assistant_message("   ");
        let outcome = reader(page).read_final().await;
        assert!(!outcome.success);
        assert_eq!(outcome.text, None);
        assert_eq!(outcome.class, Some(ErrorClass::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_message_fails_with_empty() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        let outcome = reader(page).read_final().await;
        assert!(!outcome.success);
        assert_eq!(outcome.class, Some(ErrorClass::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_truncated_twice_then_complete() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        page.push_assistant_reads(&["The answer is...", "The answer is 4 and...", "The answer is 42."]);
        let outcome = reader(page).read_final().await;
        assert!(outcome.success);
        assert!(!outcome.partial);
        assert_eq!(outcome.text.as_deref(), Some("The answer is 42."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_after_exhaustion_is_partial_success() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        page.push_assistant_message("Still going...");
        let outcome = reader(page).read_final().await;
        assert!(outcome.success);
        assert!(outcome.partial);
        assert_eq!(outcome.text.as_deref(), Some("Still going..."));
    }
}
