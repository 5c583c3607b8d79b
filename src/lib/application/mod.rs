//! # Application Module
//!
//! Core logic of the tool-calling client.
//!
//! ## Submodules
//!
//! - [`agent`] - The orchestration loop that drives a model through tool calls
//! - [`prompt`] - System prompt compilation from the live tool catalog
//! - [`tooling`] - Tool server connections, transports and the tool catalog

pub mod agent;
pub mod prompt;
pub mod tooling;
