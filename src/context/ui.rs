//! 通过页面界面切换项目与模型

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::context::{is_default_model, is_default_project, ContextSwitcher};
use crate::core::clock::Sleeper;
use crate::page::{ChatPage, ElementHandle, LocatorChain};

/// 菜单项文本超过该长度视为说明文字而非选项
const MAX_OPTION_CHARS: usize = 50;

/// 模型名 → (是否在「旧版模型」子菜单, 菜单中可能的显示文本)
pub fn model_variants(name: &str) -> (bool, Vec<String>) {
    let key = name.trim().to_lowercase();
    let legacy: &[&str] = match key.as_str() {
        "gpt-5.2" => &["GPT-5.2"],
        "gpt-5.1" => &["GPT-5.1 Instant", "GPT-5.1 Thinking"],
        "gpt-5" => &["GPT-5 Instant", "GPT-5 Thinking mini", "GPT-5 Thinking"],
        "gpt-4o" => &["GPT-4o"],
        "gpt-4" => &["GPT-4.1"],
        "o3" => &["o3"],
        "o4-mini" => &["o4-mini"],
        _ => &[],
    };
    if !legacy.is_empty() {
        return (true, legacy.iter().map(|s| s.to_string()).collect());
    }
    let main = match key.as_str() {
        "auto" => "Auto",
        "instant" => "Instant",
        "thinking" => "Thinking",
        _ => name.trim(),
    };
    (false, vec![main.to_string()])
}

fn first_line(text: &str) -> &str {
    text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}

pub struct UiContextSwitcher {
    page: Arc<ChatPage>,
    sleeper: Arc<dyn Sleeper>,
    home_url: String,
    project_delay: Duration,
    model_delay: Duration,
}

impl UiContextSwitcher {
    pub fn new(
        page: Arc<ChatPage>,
        sleeper: Arc<dyn Sleeper>,
        home_url: impl Into<String>,
        project_delay: Duration,
        model_delay: Duration,
    ) -> Self {
        Self {
            page,
            sleeper,
            home_url: home_url.into(),
            project_delay,
            model_delay,
        }
    }

    /// 在链中找文本（首行）满足条件的第一个元素
    async fn find_by_text(
        &self,
        chain: &LocatorChain,
        matches: impl Fn(&str) -> bool,
    ) -> Option<ElementHandle> {
        let driver = self.page.driver();
        for locator in chain.iter() {
            let Ok(found) = driver.find_all(locator).await else {
                continue;
            };
            for el in found {
                match driver.text_of(&el).await {
                    Ok(text) if matches(&text) => return Some(el),
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "menu item unreadable"),
                }
            }
        }
        None
    }
}

#[async_trait]
impl ContextSwitcher for UiContextSwitcher {
    async fn switch_project(&self, name: &str) -> bool {
        if is_default_project(name) {
            info!("returning to main page");
            if let Err(e) = self.page.driver().navigate(&self.home_url).await {
                warn!(error = %e, "failed to open main page");
                return false;
            }
            self.sleeper.sleep(self.project_delay).await;
            return true;
        }

        info!(project = name, "switching project");
        let wanted = name.trim().to_lowercase();
        let link = self
            .find_by_text(&self.page.selectors().project_link, |text| {
                text.lines().any(|l| l.trim().to_lowercase() == wanted)
            })
            .await;
        let Some(link) = link else {
            warn!(project = name, "project not found in sidebar");
            return false;
        };
        if let Err(e) = self.page.driver().click(&link).await {
            warn!(project = name, error = %e, "project click failed");
            return false;
        }
        self.sleeper.sleep(self.project_delay).await;
        true
    }

    async fn verify_current_project(&self, name: &str) -> bool {
        if is_default_project(name) {
            return true;
        }
        match self.page.driver().current_url().await {
            Ok(url) => url.contains("/project"),
            Err(e) => {
                debug!(error = %e, "current url unavailable");
                false
            }
        }
    }

    async fn switch_model(&self, name: &str) -> bool {
        if is_default_model(name) {
            return true;
        }
        let (legacy, variants) = model_variants(name);
        info!(model = name, legacy, "switching model");

        let Some(switcher) = self.page.first_visible(&self.page.selectors().model_switcher).await else {
            warn!("model switcher not found");
            return false;
        };
        if self.page.driver().click(&switcher).await.is_err() {
            return false;
        }
        self.sleeper.sleep(self.model_delay).await;

        if legacy {
            match self.page.first_visible(&self.page.selectors().legacy_models).await {
                Some(submenu) => {
                    let _ = self.page.driver().click(&submenu).await;
                    self.sleeper.sleep(self.model_delay).await;
                }
                None => warn!("legacy models submenu not found"),
            }
        }

        for variant in &variants {
            let option = self
                .find_by_text(&self.page.selectors().model_option, |text| {
                    let line = first_line(text);
                    line == variant && line.chars().count() < MAX_OPTION_CHARS
                })
                .await;
            if let Some(option) = option {
                if self.page.driver().click(&option).await.is_ok() {
                    info!(model = name, option = %variant, "model switched");
                    self.sleeper.sleep(self.model_delay).await;
                    return true;
                }
            }
        }

        warn!(model = name, "model option not found in menu");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::TokioSleeper;
    use crate::page::{ScriptedPage, Selectors};

    fn switcher(page: Arc<ScriptedPage>) -> UiContextSwitcher {
        let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
        let adapter = Arc::new(ChatPage::new(
            page,
            Selectors::default(),
            Duration::from_secs(1),
            3,
            sleeper.clone(),
        ));
        UiContextSwitcher::new(
            adapter,
            sleeper,
            "https://chatgpt.com/",
            Duration::from_secs(3),
            Duration::from_secs(2),
        )
    }

    #[test]
    fn test_model_variants() {
        assert_eq!(model_variants("GPT-4"), (true, vec!["GPT-4.1".to_string()]));
        assert_eq!(model_variants("gpt-5").1.len(), 3);
        assert_eq!(model_variants("thinking"), (false, vec!["Thinking".to_string()]));
        assert_eq!(model_variants("Custom GPT"), (false, vec!["Custom GPT".to_string()]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_project_case_insensitive() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        page.set_projects(&["Drafts", "Research Notes"]);
        let s = switcher(page.clone());
        assert!(s.switch_project("research notes").await);
        assert!(s.verify_current_project("research notes").await);
        assert_eq!(page.current_project().as_deref(), Some("Research Notes"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_project_is_reported() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        page.set_projects(&["Drafts"]);
        let s = switcher(page);
        assert!(!s.switch_project("Archive").await);
        assert!(!s.verify_current_project("Archive").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_legacy_model_opens_submenu() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        let s = switcher(page.clone());
        assert!(s.switch_model("gpt-4o").await);
        assert_eq!(page.selected_model().as_deref(), Some("GPT-4o"));
        assert!(page.clicks().contains(&"legacy_models".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_main_menu_model() {
        let page = Arc::new(ScriptedPage::new(Selectors::default()));
        let s = switcher(page.clone());
        assert!(s.switch_model("instant").await);
        assert_eq!(page.selected_model().as_deref(), Some("Instant"));
        assert!(!page.clicks().contains(&"legacy_models".to_string()));
    }
}
