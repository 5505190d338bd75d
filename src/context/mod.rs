//! 会话上下文：项目（对话分组）与模型
//!
//! ContextSwitcher 是生命周期在 ContextSwitching 状态调用的协作者；
//! ConversationContext 记录当前所在项目、模型以及系列对话是否已经打开。

mod ui;

use async_trait::async_trait;

pub use ui::{model_variants, UiContextSwitcher};

/// 项目 / 模型切换
#[async_trait]
pub trait ContextSwitcher: Send + Sync {
    async fn switch_project(&self, name: &str) -> bool;
    async fn switch_model(&self, name: &str) -> bool;
    async fn verify_current_project(&self, name: &str) -> bool;
}

/// 表示「回到主页、不使用项目」的名称
pub fn is_default_project(name: &str) -> bool {
    matches!(name.trim().to_lowercase().as_str(), "" | "none" | "default" | "main")
}

/// 表示「保持当前模型」的名称
pub fn is_default_model(name: &str) -> bool {
    matches!(name.trim().to_lowercase().as_str(), "" | "none" | "default")
}

/// 当前浏览器所处的上下文
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationContext {
    pub project: Option<String>,
    pub model: Option<String>,
    /// series 模式的对话已打开，后续 series 请求复用它
    pub series_open: bool,
}

impl ConversationContext {
    pub fn in_project(&self, name: &str) -> bool {
        self.project
            .as_deref()
            .is_some_and(|p| p.eq_ignore_ascii_case(name.trim()))
    }

    pub fn on_model(&self, name: &str) -> bool {
        self.model
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case(name.trim()))
    }
}

/// 不切换任何上下文（测试与「无项目」批次使用）
#[derive(Debug, Default)]
pub struct NoopSwitcher;

#[async_trait]
impl ContextSwitcher for NoopSwitcher {
    async fn switch_project(&self, _name: &str) -> bool {
        false
    }

    async fn switch_model(&self, _name: &str) -> bool {
        false
    }

    async fn verify_current_project(&self, _name: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        assert!(is_default_project("Main"));
        assert!(is_default_project(" none "));
        assert!(!is_default_project("Research"));
        assert!(is_default_model("DEFAULT"));
        assert!(!is_default_model("gpt-4o"));
    }

    #[test]
    fn test_context_matching_ignores_case() {
        let ctx = ConversationContext {
            project: Some("Research".to_string()),
            model: Some("gpt-4o".to_string()),
            series_open: false,
        };
        assert!(ctx.in_project("research"));
        assert!(ctx.on_model("GPT-4o"));
        assert!(!ctx.in_project("Drafts"));
    }
}
