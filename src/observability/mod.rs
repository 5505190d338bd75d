//! 可观测性：控制台日志 + 按天滚动的日志文件

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSection;

const LOG_FILE_PREFIX: &str = "chatbatch.log";

/// 安装全局订阅者；RUST_LOG 优先于配置中的级别
///
/// 返回文件写入线程的 guard，调用方需持有到进程退出，否则尾部日志会丢失。
pub fn init(cfg: &LoggingSection) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    let (file_layer, guard) = if cfg.file_enabled {
        let appender = tracing_appender::rolling::daily(&cfg.dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(true);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init();

    match installed {
        Ok(()) => {
            tracing::debug!(level = %cfg.level, file = cfg.file_enabled, dir = %cfg.dir.display(), "logging initialized");
            guard
        }
        // 已有全局订阅者（例如测试中重复初始化）
        Err(_) => None,
    }
}
