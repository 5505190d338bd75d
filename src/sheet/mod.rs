//! 请求表：请求来源与结果落盘
//!
//! - **RequestSource**: 按表格顺序给出待处理请求（状态不是 success 的非空行）
//! - **OutcomeSink**: 写回状态 / 回复 / 错误；每次写入立即持久化
//! - **CsvSheet**: 以 CSV 文件实现两者
//! - **backup**: 运行前的表格备份与轮转

pub mod backup;
mod csv_sheet;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::ErrorClass;

pub use backup::{BackupEntry, BackupManager};
pub use csv_sheet::{CsvSheet, SheetStats, EXPECTED_HEADER};

#[derive(Error, Debug)]
pub enum SheetError {
    #[error("Sheet not found: {0}")]
    NotFound(PathBuf),

    #[error("Sheet has no header row")]
    MissingHeader,

    #[error("No such request row: {0}")]
    UnknownRow(usize),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 对话模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// 每个请求一个新对话
    #[default]
    New,
    /// 在当前对话中继续
    Continue,
    /// 一组请求共用一个对话
    Series,
}

impl ChatMode {
    /// 空值与无法识别的值都按 new 处理
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "continue" => ChatMode::Continue,
            "series" => ChatMode::Series,
            _ => ChatMode::New,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::New => "new",
            ChatMode::Continue => "continue",
            ChatMode::Series => "series",
        }
    }
}

/// 一条待处理请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    /// 表格行号（表头为第 1 行）
    pub id: usize,
    pub prompt: String,
    pub project: Option<String>,
    pub model: Option<String>,
    pub chat_mode: ChatMode,
}

impl PromptRequest {
    pub fn new(id: usize, prompt: impl Into<String>) -> Self {
        Self {
            id,
            prompt: prompt.into(),
            project: None,
            model: None,
            chat_mode: ChatMode::New,
        }
    }
}

/// 写回表格的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    InProgress,
    Success,
    Error(ErrorClass),
}

impl RequestStatus {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        match s {
            "in_progress" => Some(RequestStatus::InProgress),
            "success" => Some(RequestStatus::Success),
            _ => s
                .strip_prefix("error_")
                .and_then(ErrorClass::parse)
                .map(RequestStatus::Error),
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::InProgress => f.write_str("in_progress"),
            RequestStatus::Success => f.write_str("success"),
            RequestStatus::Error(class) => write!(f, "error_{class}"),
        }
    }
}

pub trait RequestSource {
    fn pending(&self) -> Vec<PromptRequest>;
}

pub trait OutcomeSink {
    fn record(
        &mut self,
        id: usize,
        status: RequestStatus,
        response: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), SheetError>;
}
