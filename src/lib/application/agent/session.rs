use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
    Aborted,
}

/// Counters for one agentic run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSession {
    iteration_count: usize,
    consecutive_error_count: usize,
    max_iterations: usize,
    max_consecutive_errors: usize,
    state: RunState,
}

impl AgentSession {
    pub fn new(max_iterations: usize, max_consecutive_errors: usize) -> Self {
        Self {
            iteration_count: 0,
            consecutive_error_count: 0,
            max_iterations,
            max_consecutive_errors,
            state: RunState::Idle,
        }
    }

    pub fn start(&mut self) {
        if self.state == RunState::Idle {
            self.state = RunState::Running;
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn iteration_count(&self) -> usize {
        self.iteration_count
    }

    pub fn consecutive_error_count(&self) -> usize {
        self.consecutive_error_count
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn max_consecutive_errors(&self) -> usize {
        self.max_consecutive_errors
    }

    pub fn iteration_cap_reached(&self) -> bool {
        self.iteration_count >= self.max_iterations
    }

    /// One tool-call round, successful or not.
    pub fn begin_iteration(&mut self) {
        self.iteration_count += 1;
    }

    pub fn record_success(&mut self) {
        self.consecutive_error_count = 0;
    }

    /// Returns true once the consecutive-error cap is reached.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_error_count += 1;
        self.consecutive_error_count >= self.max_consecutive_errors
    }

    pub fn finish(&mut self, state: RunState) {
        if self.state == RunState::Running {
            self.state = state;
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            RunState::Completed | RunState::Failed | RunState::Aborted
        )
    }
}

/// Cooperative stop flag, checked between steps of a run.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
