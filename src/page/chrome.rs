//! Chrome 驱动：通过 headless_chrome 控制真实浏览器
//!
//! 需启用 feature "browser" 且系统已安装 Chrome/Chromium。
//! 每次操作都在页面里按定位器重新解析元素（不缓存节点），下标越界即视为元素过期。
//! headless_chrome 是同步 API，所有调用放进 spawn_blocking。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::protocol::cdp::Input;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::Deserialize;
use serde_json::Value;

use crate::config::BrowserSection;
use crate::page::{DriverError, ElementHandle, ElementState, Locator, PageDriver};

const STALE_MARK: &str = "__stale__";

/// 定位器 → 返回元素数组的 JS 表达式
fn resolve_js(locator: &Locator) -> String {
    let q = Value::String(locator.value().to_string()).to_string();
    match locator {
        Locator::Css(_) => format!("Array.from(document.querySelectorAll({q}))"),
        Locator::Xpath(_) => format!(
            "(function() {{ const r = document.evaluate({q}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); \
             const a = []; for (let i = 0; i < r.snapshotLength; i++) a.push(r.snapshotItem(i)); return a; }})()"
        ),
    }
}

/// 包装一段作用于单个元素 `el` 的脚本；元素不存在时返回过期标记
fn with_element(el: &ElementHandle, body: &str) -> String {
    format!(
        "(function() {{ const el = {}[{}]; if (!el) return '{STALE_MARK}'; {body} }})()",
        resolve_js(&el.locator),
        el.index
    )
}

/// 页面可见文本；跳过脚本、隐藏节点与 exclude 匹配元素内部的文本节点（只读，不改 DOM）
fn body_text_js(exclude: &[Locator]) -> String {
    if exclude.is_empty() {
        return "document.body ? document.body.innerText : ''".to_string();
    }
    let skip: Vec<String> = exclude.iter().map(resolve_js).collect();
    format!(
        "(function() {{ if (!document.body) return ''; \
         const skip = [].concat({}); \
         const w = document.createTreeWalker(document.body, NodeFilter.SHOW_TEXT); \
         const parts = []; let n; \
         while ((n = w.nextNode())) {{ \
           const p = n.parentElement; \
           if (!p || p.closest('script,style,noscript')) continue; \
           if (p.offsetParent === null && getComputedStyle(p).position !== 'fixed') continue; \
           if (skip.some(s => s.contains(n))) continue; \
           const t = n.textContent.trim(); if (t) parts.push(t); \
         }} \
         return parts.join('\\n'); }})()",
        skip.join(", ")
    )
}

#[derive(Debug, Deserialize)]
struct RawState {
    visible: bool,
    disabled: bool,
    readonly: bool,
    placeholder: Option<String>,
}

/// 真实浏览器页面（单个标签页）
pub struct ChromePage {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromePage {
    /// 启动浏览器；profile_dir 保存登录态，首次运行需要人工登录
    pub async fn launch(cfg: &BrowserSection) -> Result<Self, DriverError> {
        let headless = cfg.headless;
        let path: Option<PathBuf> = cfg.executable.clone();
        let profile = cfg.profile_dir.clone();
        let size = (cfg.window_width, cfg.window_height);

        tokio::task::spawn_blocking(move || {
            let options = LaunchOptions::default_builder()
                .headless(headless)
                .path(path)
                .user_data_dir(Some(profile))
                .window_size(Some(size))
                .idle_browser_timeout(Duration::from_secs(3600))
                .build()
                .map_err(|e| DriverError::Launch(e.to_string()))?;
            let browser = Browser::new(options).map_err(|e| DriverError::Launch(e.to_string()))?;
            let tab = browser
                .new_tab()
                .map_err(|e| DriverError::Launch(format!("Browser tab failed: {e}")))?;
            tracing::info!(headless, "browser launched");
            Ok(Self {
                _browser: browser,
                tab,
            })
        })
        .await
        .map_err(|e| DriverError::Launch(format!("Task join: {e}")))?
    }

    async fn eval(&self, js: String) -> Result<Option<Value>, DriverError> {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || {
            tab.evaluate(&js, false)
                .map(|r| r.value)
                .map_err(|e| DriverError::Script(e.to_string()))
        })
        .await
        .map_err(|e| DriverError::Script(format!("Task join: {e}")))?
    }

    /// 对单个元素求值；识别过期标记
    async fn eval_on(&self, el: &ElementHandle, body: &str) -> Result<Option<Value>, DriverError> {
        let value = self.eval(with_element(el, body)).await?;
        if matches!(&value, Some(Value::String(s)) if s == STALE_MARK) {
            return Err(DriverError::Stale(format!("{} #{}", el.locator, el.index)));
        }
        Ok(value)
    }

    async fn on_tab<T, F>(&self, op: F) -> Result<T, DriverError>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> Result<T, DriverError> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || op(&tab))
            .await
            .map_err(|e| DriverError::Script(format!("Task join: {e}")))?
    }
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementHandle>, DriverError> {
        let js = format!("{}.length", resolve_js(locator));
        let count = self
            .eval(js)
            .await?
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        Ok((0..count).map(|i| ElementHandle::new(locator.clone(), i)).collect())
    }

    async fn element_state(&self, el: &ElementHandle) -> Result<ElementState, DriverError> {
        let body = "const st = window.getComputedStyle(el); \
            const visible = !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length) && st.visibility !== 'hidden'; \
            return JSON.stringify({ visible: visible, \
              disabled: !!el.disabled || el.getAttribute('aria-disabled') === 'true', \
              readonly: !!el.readOnly || el.getAttribute('contenteditable') === 'false', \
              placeholder: el.getAttribute('placeholder') || el.getAttribute('data-placeholder') || null });";
        let raw = self.eval_on(el, body).await?;
        let json = raw.and_then(|v| v.as_str().map(String::from)).unwrap_or_default();
        let state: RawState =
            serde_json::from_str(&json).map_err(|e| DriverError::Script(format!("bad element state: {e}")))?;
        Ok(ElementState {
            visible: state.visible,
            disabled: state.disabled,
            readonly: state.readonly,
            placeholder: state.placeholder,
        })
    }

    async fn text_of(&self, el: &ElementHandle) -> Result<String, DriverError> {
        let raw = self
            .eval_on(el, "return el.innerText || el.textContent || '';")
            .await?;
        Ok(raw.and_then(|v| v.as_str().map(String::from)).unwrap_or_default())
    }

    async fn contains(&self, el: &ElementHandle, locator: &Locator) -> Result<bool, DriverError> {
        let q = Value::String(locator.value().to_string()).to_string();
        let body = match locator {
            Locator::Css(_) => format!("return el.querySelector({q}) !== null;"),
            Locator::Xpath(_) => format!(
                "return document.evaluate({q}, el, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue !== null;"
            ),
        };
        let raw = self.eval_on(el, &body).await?;
        Ok(raw.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    async fn body_text(&self, exclude: &[Locator]) -> Result<String, DriverError> {
        let raw = self.eval(body_text_js(exclude)).await?;
        Ok(raw.and_then(|v| v.as_str().map(String::from)).unwrap_or_default())
    }

    async fn click(&self, el: &ElementHandle) -> Result<(), DriverError> {
        self.eval_on(el, "el.scrollIntoView({ block: 'center' }); el.click(); return true;")
            .await
            .map(|_| ())
    }

    async fn focus_and_clear(&self, el: &ElementHandle) -> Result<(), DriverError> {
        let body = "el.focus(); \
            if ('value' in el) { el.value = ''; el.dispatchEvent(new Event('input', { bubbles: true })); } \
            else { document.execCommand('selectAll', false, null); document.execCommand('delete', false, null); } \
            return true;";
        self.eval_on(el, body).await.map(|_| ())
    }

    async fn insert_text(&self, el: &ElementHandle, text: &str) -> Result<(), DriverError> {
        self.eval_on(el, "el.focus(); return true;").await?;
        let text = text.to_string();
        self.on_tab(move |tab| {
            tab.call_method(Input::InsertText { text })
                .map(|_| ())
                .map_err(|e| DriverError::Script(format!("insertText failed: {e}")))
        })
        .await
    }

    async fn press_enter(&self, el: &ElementHandle) -> Result<(), DriverError> {
        self.eval_on(el, "el.focus(); return true;").await?;
        self.on_tab(|tab| {
            tab.press_key("Enter")
                .map(|_| ())
                .map_err(|e| DriverError::Script(format!("Enter failed: {e}")))
        })
        .await
    }

    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let url = url.to_string();
        self.on_tab(move |tab| {
            tab.navigate_to(&url)
                .and_then(|t| t.wait_until_navigated())
                .map(|_| ())
                .map_err(|e| DriverError::Navigation(format!("{url}: {e}")))
        })
        .await
    }

    async fn reload(&self) -> Result<(), DriverError> {
        self.on_tab(|tab| {
            tab.reload(false, None)
                .and_then(|t| t.wait_until_navigated())
                .map(|_| ())
                .map_err(|e| DriverError::Navigation(format!("reload: {e}")))
        })
        .await
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        self.on_tab(|tab| Ok(tab.get_url())).await
    }
}
