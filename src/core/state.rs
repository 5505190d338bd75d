//! 单个请求的生命周期状态

use std::fmt;

use serde::Serialize;

/// 请求生命周期状态（一次尝试内从 Idle 走到 Succeeded / Failed）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RequestState {
    Idle,
    ContextSwitching,
    ChatPreparing,
    AwaitingInputReady,
    Submitting,
    AwaitingResponseStart,
    AwaitingGenerationDone,
    ReadingResponse,
    Succeeded,
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Succeeded | RequestState::Failed)
    }

    /// 合法的下一状态
    pub fn can_advance_to(&self, next: RequestState) -> bool {
        use RequestState::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Idle, ContextSwitching)
                | (Idle, ChatPreparing)
                | (ContextSwitching, ChatPreparing)
                | (ChatPreparing, AwaitingInputReady)
                | (AwaitingInputReady, Submitting)
                | (Submitting, AwaitingResponseStart)
                | (AwaitingResponseStart, AwaitingGenerationDone)
                | (AwaitingGenerationDone, ReadingResponse)
                | (ReadingResponse, Succeeded)
        )
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 一次尝试经过的状态序列
#[derive(Clone, Debug, Default, Serialize)]
pub struct StateTrace {
    states: Vec<RequestState>,
}

impl StateTrace {
    pub fn start() -> Self {
        Self {
            states: vec![RequestState::Idle],
        }
    }

    pub fn current(&self) -> RequestState {
        self.states.last().copied().unwrap_or(RequestState::Idle)
    }

    /// 记录迁移；非法迁移只记日志，不中断请求
    pub fn advance(&mut self, next: RequestState) {
        let from = self.current();
        if !from.can_advance_to(next) {
            tracing::warn!(%from, to = %next, "unexpected state transition");
        }
        tracing::debug!(%from, to = %next, "state");
        self.states.push(next);
    }

    pub fn states(&self) -> &[RequestState] {
        &self.states
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_is_legal() {
        use RequestState::*;
        let path = [
            Idle,
            ContextSwitching,
            ChatPreparing,
            AwaitingInputReady,
            Submitting,
            AwaitingResponseStart,
            AwaitingGenerationDone,
            ReadingResponse,
            Succeeded,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_failed_reachable_until_terminal() {
        assert!(RequestState::Submitting.can_advance_to(RequestState::Failed));
        assert!(!RequestState::Succeeded.can_advance_to(RequestState::Failed));
        assert!(!RequestState::Idle.can_advance_to(RequestState::Submitting));
    }

    #[test]
    fn test_trace_records_order() {
        let mut trace = StateTrace::start();
        trace.advance(RequestState::ChatPreparing);
        trace.advance(RequestState::Failed);
        assert_eq!(trace.current(), RequestState::Failed);
        assert_eq!(trace.states().len(), 3);
    }
}
