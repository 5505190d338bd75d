//! 错误恢复引擎
//!
//! 根据 ErrorClass 的恢复动作在生命周期内做一次即时处理：刷新页面、固定停顿、
//! 询问操作员或等待重新登录。恢复成功则继续当前尝试；操作员拒绝时返回终态失败。

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::RecoverySection;
use crate::core::clock::Sleeper;
use crate::core::{Failure, RecoveryAction};
use crate::operator::Operator;
use crate::page::{ChatPage, Detection};

pub struct RecoveryEngine {
    page: Arc<ChatPage>,
    operator: Arc<dyn Operator>,
    sleeper: Arc<dyn Sleeper>,
    rate_limit_wait: Duration,
    capacity_pause: Duration,
    network_pause: Duration,
}

impl RecoveryEngine {
    pub fn new(
        page: Arc<ChatPage>,
        operator: Arc<dyn Operator>,
        sleeper: Arc<dyn Sleeper>,
        cfg: &RecoverySection,
    ) -> Self {
        Self {
            page,
            operator,
            sleeper,
            rate_limit_wait: Duration::from_secs(cfg.rate_limit_wait_secs),
            capacity_pause: Duration::from_secs(cfg.capacity_pause_secs),
            network_pause: Duration::from_secs(cfg.network_pause_secs),
        }
    }

    /// 尝试一次恢复；Ok 表示可以继续当前尝试
    pub async fn recover(&self, detection: &Detection) -> Result<(), Failure> {
        let class = detection.class;
        let action = class.recovery_action();
        warn!(%class, ?action, message = %detection.message, "page error detected");

        match action {
            RecoveryAction::WaitOrAbort => {
                let minutes = self.rate_limit_wait.as_secs() / 60;
                let question = format!(
                    "Rate limit reached ({}). Wait {minutes} minutes and continue?",
                    detection.message
                );
                if self.operator.confirm(&question).await {
                    info!(minutes, "waiting out rate limit");
                    self.sleeper.sleep(self.rate_limit_wait).await;
                    Ok(())
                } else {
                    Err(Failure::terminal(class, "operator stopped after rate limit"))
                }
            }
            RecoveryAction::ReloadPage => {
                info!("reloading page after network error");
                if let Err(e) = self.page.reload().await {
                    warn!(error = %e, "reload failed");
                }
                self.sleeper.sleep(self.network_pause).await;
                Ok(())
            }
            RecoveryAction::Pause => {
                info!(secs = self.capacity_pause.as_secs(), "service at capacity, pausing");
                self.sleeper.sleep(self.capacity_pause).await;
                Ok(())
            }
            RecoveryAction::ManualReauth => {
                self.operator
                    .acknowledge("Authentication required. Log in in the browser window.")
                    .await;
                Ok(())
            }
            RecoveryAction::AskOperator => {
                let question = format!("Unexpected page message: {}. Continue?", detection.message);
                if self.operator.confirm(&question).await {
                    Ok(())
                } else {
                    Err(Failure::terminal(class, detection.message.clone()))
                }
            }
            RecoveryAction::None => Err(Failure::new(class, detection.message.clone())),
        }
    }
}
