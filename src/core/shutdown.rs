//! 中断处理
//!
//! Ctrl+C / SIGTERM 触发取消令牌；批处理在每个顶层等待点检查它。
//! 已完成请求的结果在各自结束时就已落盘，中断最多丢失正在处理的那一个（下次运行仍为待处理）。

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

/// 中断原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
}

#[derive(Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
    /// 第一次触发的原因
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// 取消令牌（传给 BatchDriver）
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        tracing::info!(?reason, "shutdown requested");
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().cloned()
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::warn!("Received Ctrl+C, abandoning in-flight request");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::warn!("Received SIGTERM, abandoning in-flight request");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_follows_manager() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!token.is_cancelled());
        manager.shutdown(ShutdownReason::Signal);
        assert!(manager.is_shutdown());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_first_reason_is_kept() {
        let manager = ShutdownManager::new();
        assert_eq!(manager.reason(), None);
        manager.shutdown(ShutdownReason::UserInitiated);
        manager.clone().shutdown(ShutdownReason::Signal);
        assert_eq!(manager.reason(), Some(ShutdownReason::UserInitiated));
    }
}
