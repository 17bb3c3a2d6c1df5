//! Per-request execution state machine

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::types::RequestId;

/// Lifecycle position of one execution request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionState {
    Received,
    Validated,
    CompileSkipped,
    Compiling,
    Compiled,
    CompileFailed,
    Executing,
    Completed,
    TimedOut,
    Crashed,
    Cancelled,
    WorkspaceReleased,
    Terminal,
}

impl ExecutionState {
    /// Whether `next` is a legal successor of `self`
    ///
    /// Requests rejected before a workspace exists go straight to
    /// `Terminal`; every path that provisioned one passes through
    /// `WorkspaceReleased` first.
    pub fn can_advance_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;

        match self {
            Received => matches!(next, Validated | Terminal),
            Validated => matches!(next, CompileSkipped | Compiling | Cancelled | Terminal),
            CompileSkipped => matches!(next, Executing | Cancelled | WorkspaceReleased),
            Compiling => matches!(next, Compiled | CompileFailed | Cancelled | WorkspaceReleased),
            Compiled => matches!(next, Executing | Cancelled | WorkspaceReleased),
            CompileFailed => next == WorkspaceReleased,
            Executing => matches!(
                next,
                Completed | TimedOut | Crashed | Cancelled | WorkspaceReleased
            ),
            Completed | TimedOut | Crashed => next == WorkspaceReleased,
            Cancelled => matches!(next, WorkspaceReleased | Terminal),
            WorkspaceReleased => next == Terminal,
            Terminal => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ExecutionState::Terminal
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Receives every state transition of every request
pub trait StateObserver: Send + Sync + fmt::Debug {
    fn on_transition(&self, request: RequestId, state: ExecutionState);
}

/// Current state of one request, with logging and observer fan-out
#[derive(Debug)]
pub(crate) struct StateTracker {
    request: RequestId,
    state: ExecutionState,
    observer: Option<Arc<dyn StateObserver>>,
}

impl StateTracker {
    pub(crate) fn new(request: RequestId, observer: Option<Arc<dyn StateObserver>>) -> Self {
        if let Some(ref observer) = observer {
            observer.on_transition(request, ExecutionState::Received);
        }
        Self {
            request,
            state: ExecutionState::Received,
            observer,
        }
    }

    pub(crate) fn current(&self) -> ExecutionState {
        self.state
    }

    pub(crate) fn advance(&mut self, next: ExecutionState) {
        if !self.state.can_advance_to(next) {
            warn!(
                request = %self.request,
                from = %self.state,
                to = %next,
                "illegal state transition"
            );
        }
        debug!(request = %self.request, from = %self.state, to = %next, "state transition");
        self.state = next;
        if let Some(ref observer) = self.observer {
            observer.on_transition(self.request, next);
        }
    }
}
