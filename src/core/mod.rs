//! 核心层：错误分类与恢复、请求状态机、重试、批处理主循环、中断

pub mod batch;
pub mod clock;
pub mod error;
pub mod lifecycle;
pub mod recovery;
pub mod retry;
pub mod shutdown;
pub mod state;

pub use batch::{BatchDriver, BatchSummary, RequestOutcome};
pub use clock::{Sleeper, TokioSleeper};
pub use error::{BatchError, ErrorClass, Failure, RecoveryAction, Retriability};
pub use lifecycle::{LifecycleAttempt, RequestLifecycle};
pub use recovery::RecoveryEngine;
pub use retry::{Attempt, RetryOrchestrator, RetryOutcome, RetryPolicy};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{RequestState, StateTrace};
