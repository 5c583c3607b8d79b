//! # Agent Module
//!
//! The orchestration loop: a model is asked for its next move, the first
//! `<tool_use>` block in its reply is executed, and the result is fed back as a
//! `<tool_use_result>` turn.
//!
//! ## Key Types
//!
//! - [`Agent`] - The loop driver
//! - [`AgentOptions`] - Limits and conversation for one run
//! - [`AgentOutcome`] - Final status, turns and executed steps
//! - [`EventBus`] - Typed status events for observers
//!
//! ## Termination
//!
//! 1. A reply without a tool use is the answer
//! 2. `attempt_completion` ends the run with its `result`
//! 3. The iteration cap or the consecutive-error cap fails the run
//! 4. A [`CancelHandle`] aborts it at the next checkpoint

mod errors;
mod events;
mod models;
mod parser;
mod runner;
mod session;

pub use errors::AgentError;
pub use events::{AgentEvent, EventBus};
pub use models::{AgentOptions, AgentOutcome, AgentStep, FailureReason, RunStatus};
pub use parser::{ParsedTurn, ToolUseBlock, parse_turn};
pub use runner::Agent;
pub use session::{AgentSession, CancelHandle, RunState};

#[cfg(test)]
mod tests;
