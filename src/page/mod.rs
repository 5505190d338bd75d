//! 页面交互层
//!
//! - **PageDriver**: 最底层的浏览器操作（查找、读状态、点击、输入、刷新），由 Chrome 或 ScriptedPage 实现
//! - **adapter**: ChatPage，把输入框 / 停止按钮 / 助手消息等发现逻辑封装成稳定调用
//! - **classifier**: 扫描页面文本与弹窗，给出错误分类
//! - **poller**: 用输入框可用性轮询代替固定等待
//! - **reader**: 读取并校验最终回复

pub mod adapter;
pub mod classifier;
pub mod locator;
pub mod mock;
pub mod poller;
pub mod reader;

#[cfg(feature = "browser")]
pub mod chrome;

use async_trait::async_trait;
use thiserror::Error;

pub use adapter::{ChatPage, InputStatus, Selectors};
pub use classifier::{Detection, ErrorClassifier, PhraseSet};
pub use locator::{Locator, LocatorChain};
pub use mock::{Reply, ScriptedPage};
pub use poller::{ReadinessPoller, ReadyOutcome};
pub use reader::{ReadOutcome, ResponseReader};

#[cfg(feature = "browser")]
pub use chrome::ChromePage;

/// 元素句柄：定位器 + 文档顺序中的下标
///
/// 不缓存节点，每次使用都重新解析；页面重渲染后下标越界即报 Stale。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub locator: Locator,
    pub index: usize,
}

impl ElementHandle {
    pub fn new(locator: Locator, index: usize) -> Self {
        Self { locator, index }
    }
}

/// 元素的可交互状态快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementState {
    pub visible: bool,
    pub disabled: bool,
    pub readonly: bool,
    pub placeholder: Option<String>,
}

/// 浏览器层错误（只在 page 模块内部出现，向上会被归一化为 ErrorClass）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Stale element: {0}")]
    Stale(String),

    #[error("Script failed: {0}")]
    Script(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Browser launch failed: {0}")]
    Launch(String),
}

/// 浏览器页面驱动：所有读写都基于实时 DOM，而非快照
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// 按文档顺序返回所有匹配元素
    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementHandle>, DriverError>;

    async fn element_state(&self, el: &ElementHandle) -> Result<ElementState, DriverError>;

    /// 元素的纯文本内容（textContent）
    async fn text_of(&self, el: &ElementHandle) -> Result<String, DriverError>;

    /// 元素内部是否存在匹配 locator 的后代
    async fn contains(&self, el: &ElementHandle, locator: &Locator) -> Result<bool, DriverError>;

    /// 整页可见文本；落在 exclude 任一定位器匹配元素内部的文本不计入
    async fn body_text(&self, exclude: &[Locator]) -> Result<String, DriverError>;

    async fn click(&self, el: &ElementHandle) -> Result<(), DriverError>;

    /// 聚焦并清空已有内容
    async fn focus_and_clear(&self, el: &ElementHandle) -> Result<(), DriverError>;

    /// 在光标处插入文本（触发框架的 input 事件）
    async fn insert_text(&self, el: &ElementHandle, text: &str) -> Result<(), DriverError>;

    /// 触发提交（等价于按下 Enter）
    async fn press_enter(&self, el: &ElementHandle) -> Result<(), DriverError>;

    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    async fn reload(&self) -> Result<(), DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;
}
