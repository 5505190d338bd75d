//! 错误分类与恢复动作
//!
//! ErrorClass 是封闭的九类错误，以普通数据的形式逐层上传（不会以异常穿透组件边界）；
//! RecoveryEngine 据此决定生命周期内的即时恢复动作，RetryOrchestrator 据此决定是否重试。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 请求失败的分类（封闭集合，运行期不可扩展）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    RateLimit,
    Network,
    Capacity,
    Auth,
    NotFound,
    Timeout,
    Empty,
    Exception,
    Unknown,
}

/// 重试层对某类错误的态度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retriability {
    Retriable,
    /// 不重试，需要人工处理
    Fatal,
    /// 由操作员在生命周期内的恢复提示中决定
    OperatorChoice,
}

/// 生命周期内检测到错误时尝试的即时恢复动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 询问操作员：长时间等待后继续，或放弃
    WaitOrAbort,
    /// 刷新页面并短暂停顿
    ReloadPage,
    /// 固定停顿后继续
    Pause,
    /// 阻塞等待操作员重新登录
    ManualReauth,
    /// 询问操作员 y/n
    AskOperator,
    /// 不做处理，交给重试层
    None,
}

impl ErrorClass {
    pub const ALL: [ErrorClass; 9] = [
        ErrorClass::RateLimit,
        ErrorClass::Network,
        ErrorClass::Capacity,
        ErrorClass::Auth,
        ErrorClass::NotFound,
        ErrorClass::Timeout,
        ErrorClass::Empty,
        ErrorClass::Exception,
        ErrorClass::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::RateLimit => "rate_limit",
            ErrorClass::Network => "network",
            ErrorClass::Capacity => "capacity",
            ErrorClass::Auth => "auth",
            ErrorClass::NotFound => "not_found",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Empty => "empty",
            ErrorClass::Exception => "exception",
            ErrorClass::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }

    pub fn retriability(&self) -> Retriability {
        match self {
            ErrorClass::RateLimit | ErrorClass::Auth => Retriability::Fatal,
            ErrorClass::Unknown => Retriability::OperatorChoice,
            _ => Retriability::Retriable,
        }
    }

    /// 重试层是否可以再试一次；OperatorChoice 在操作员没有拒绝时视为可重试
    pub fn is_retriable(&self) -> bool {
        !matches!(self.retriability(), Retriability::Fatal)
    }

    pub fn recovery_action(&self) -> RecoveryAction {
        match self {
            ErrorClass::RateLimit => RecoveryAction::WaitOrAbort,
            ErrorClass::Network => RecoveryAction::ReloadPage,
            ErrorClass::Capacity => RecoveryAction::Pause,
            ErrorClass::Auth => RecoveryAction::ManualReauth,
            ErrorClass::Unknown => RecoveryAction::AskOperator,
            ErrorClass::NotFound
            | ErrorClass::Timeout
            | ErrorClass::Empty
            | ErrorClass::Exception => RecoveryAction::None,
        }
    }

    /// 出现该类终态错误时，整批暂停等待操作员决定
    pub fn pauses_batch(&self) -> bool {
        matches!(self, ErrorClass::RateLimit | ErrorClass::Auth)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单次尝试的失败结果：分类 + 可读描述
///
/// `terminal` 表示操作员在恢复提示中选择了停止，此时无论分类如何都不再重试。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{class}: {message}")]
pub struct Failure {
    pub class: ErrorClass,
    pub message: String,
    pub terminal: bool,
}

impl Failure {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            terminal: false,
        }
    }

    /// 操作员拒绝继续后的终态失败
    pub fn terminal(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            terminal: true,
        }
    }

    pub fn is_retriable(&self) -> bool {
        !self.terminal && self.class.is_retriable()
    }
}

/// 批处理外围设施的错误（表格、配置、浏览器启动）
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Sheet error: {0}")]
    Sheet(#[from] crate::sheet::SheetError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Browser error: {0}")]
    Browser(String),
}
