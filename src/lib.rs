//! chatbatch - 驱动真实浏览器，把表格中的提示词逐条提交给网页版对话助手并回写结果
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、恢复、请求状态机、重试、批处理主循环、中断
//! - **page**: 页面驱动抽象、页面适配器、错误扫描、就绪轮询、回复读取
//! - **context**: 项目 / 模型切换
//! - **sheet**: CSV 请求表与备份
//! - **export**: 每个请求的 JSON 导出
//! - **humanize**: 请求节奏与可选的拟人化策略
//! - **operator**: 操作员交互
//! - **stats**: 批次统计
//! - **preflight**: 运行前检查
//! - **observability**: 日志初始化

pub mod config;
pub mod context;
pub mod core;
pub mod export;
pub mod humanize;
pub mod observability;
pub mod operator;
pub mod page;
pub mod preflight;
pub mod sheet;
pub mod stats;

pub use crate::core::{BatchDriver, BatchSummary, ErrorClass, RequestLifecycle};
